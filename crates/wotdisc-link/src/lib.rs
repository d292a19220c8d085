//! CoRE Link-Format parsing and filtering
//!
//! Parses RFC 6690 documents returned by `/.well-known/core` and Resource
//! Directory lookups, and filters the links that name Thing Descriptions or
//! RD lookup endpoints.
//!
//! # Example
//!
//! ```
//! use wotdisc_link::{parse, is_thing_resource};
//!
//! let links = parse(r#"</test>;rt="wot.thing";ct=432, </other>;rt=x"#);
//! let things: Vec<_> = links.iter().filter(|l| is_thing_resource(l)).collect();
//! assert_eq!(things.len(), 1);
//! assert_eq!(things[0].uri, "/test");
//! ```

pub mod filter;
pub mod parser;

pub use filter::{
    is_resource_directory_lookup_endpoint, is_thing_resource, matches, LinkFilter,
    RD_LOOKUP_RESOURCE_TYPE, WOT_THING_RESOURCE_TYPE,
};
pub use parser::{parse, parse_link_value, serialize, Link};
