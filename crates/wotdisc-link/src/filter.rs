//! Link filters
//!
//! Decide whether a parsed link names a resource of interest for a
//! discovery phase, by its `rt` and `ct` attributes.

use crate::parser::Link;
use std::fmt;
use wotdisc_core::types::ContentFormat;

/// Resource type of WoT Thing Description resources
pub const WOT_THING_RESOURCE_TYPE: &str = "wot.thing";

/// Resource type of a Resource Directory resource lookup endpoint
pub const RD_LOOKUP_RESOURCE_TYPE: &str = "core.rd-lookup-res";

/// Requires a link to list both a resource type and a content format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFilter {
    pub resource_type: &'static str,
    pub content_format: u16,
}

impl LinkFilter {
    /// Thing Description resources: `rt=wot.thing`, `ct=432`
    pub const THING_RESOURCE: LinkFilter = LinkFilter {
        resource_type: WOT_THING_RESOURCE_TYPE,
        content_format: ContentFormat::TD_JSON_CODE,
    };

    /// RD lookup endpoints: `rt=core.rd-lookup-res`, `ct=40`
    pub const RD_LOOKUP_ENDPOINT: LinkFilter = LinkFilter {
        resource_type: RD_LOOKUP_RESOURCE_TYPE,
        content_format: ContentFormat::LINK_FORMAT_CODE,
    };

    /// Evaluates the filter against a link.
    #[inline]
    pub fn evaluate(&self, link: &Link) -> bool {
        matches(link, self.resource_type, &self.content_format.to_string())
    }

    /// Query string selecting this filter's resource type.
    pub fn query(&self) -> String {
        format!("rt={}", self.resource_type)
    }
}

impl fmt::Display for LinkFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rt={} ct={}", self.resource_type, self.content_format)
    }
}

/// True iff the link's `rt` list contains `resource_type` and its `ct` list
/// contains `content_format`. A missing attribute is no match.
pub fn matches(link: &Link, resource_type: &str, content_format: &str) -> bool {
    link.has_value("rt", resource_type) && link.has_value("ct", content_format)
}

pub fn is_thing_resource(link: &Link) -> bool {
    LinkFilter::THING_RESOURCE.evaluate(link)
}

pub fn is_resource_directory_lookup_endpoint(link: &Link) -> bool {
    LinkFilter::RD_LOOKUP_ENDPOINT.evaluate(link)
}
