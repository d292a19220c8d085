use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wotdisc_link::{is_thing_resource, parse};

const SINGLE_LINK: &str = r#"</test>;rt="wot.thing";ct=432"#;

const RD_LOOKUP: &str = "</rd-lookup/res>;rt=core.rd-lookup-res;ct=40,\
</rd-lookup/ep>;rt=core.rd-lookup-ep;ct=40,\
</rd>;rt=core.rd;ct=40";

fn large_document(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                r#"<coap://[fe80::{:x}]:5683/things/{}>;rt="wot.thing oic.r.sensor";ct="50 432";title="Device {}""#,
                i + 1,
                i,
                i
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn bench_parse(c: &mut Criterion) {
    let large = large_document(200);

    c.bench_function("parse_single_link", |b| {
        b.iter(|| parse(black_box(SINGLE_LINK)))
    });

    c.bench_function("parse_rd_lookup", |b| b.iter(|| parse(black_box(RD_LOOKUP))));

    c.bench_function("parse_and_filter_200_links", |b| {
        b.iter(|| {
            parse(black_box(&large))
                .iter()
                .filter(|link| is_thing_resource(link))
                .count()
        })
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
