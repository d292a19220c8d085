//! Follow-up request targets
//!
//! Turns the URI of a matching link into the endpoint, path and query of
//! the next request. An absolute `coap://` URI names its own host; a
//! relative reference is resolved against the address the link-format
//! response came from.

use std::net::{IpAddr, SocketAddr};
use url::Url;
use wotdisc_core::error::{DiscoveryError, Result};
use wotdisc_core::types::{Endpoint, Host, COAP_DEFAULT_PORT, COAP_SCHEME};

use crate::transport::CoapRequest;

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub endpoint: Endpoint,
    pub path: String,
    /// Query parameters carried by the link itself
    pub query: Vec<String>,
}

impl LinkTarget {
    /// Builds a GET request for this target.
    pub fn request(&self) -> CoapRequest {
        let mut request = CoapRequest::get(self.endpoint.clone(), self.path.clone());
        request.query = self.query.clone();
        request
    }
}

/// Resolves a link URI against the responder's address.
pub fn resolve_link_target(uri: &str, responder: SocketAddr) -> Result<LinkTarget> {
    match Url::parse(uri) {
        Ok(url) => from_absolute(&url, uri, Some(responder)),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(from_relative(uri, responder)),
        Err(e) => Err(DiscoveryError::invalid_link_target(uri, e.to_string())),
    }
}

/// Parses an absolute `coap://` URL, as given to a direct fetch.
pub fn parse_coap_url(uri: &str) -> Result<LinkTarget> {
    let url = Url::parse(uri).map_err(|e| DiscoveryError::invalid_link_target(uri, e.to_string()))?;
    from_absolute(&url, uri, None)
}

fn from_absolute(url: &Url, uri: &str, responder: Option<SocketAddr>) -> Result<LinkTarget> {
    if url.scheme() != COAP_SCHEME {
        return Err(DiscoveryError::unsupported_scheme(url.scheme(), uri));
    }

    let endpoint = match (url.host(), responder) {
        (Some(host), _) => Endpoint {
            host: convert_host(host),
            port: url.port().unwrap_or(COAP_DEFAULT_PORT),
            scope_id: 0,
        },
        (None, Some(responder)) => Endpoint::from_socket_addr(responder),
        (None, None) => return Err(DiscoveryError::invalid_link_target(uri, "URI has no host")),
    };

    let path = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };

    Ok(LinkTarget {
        endpoint,
        path,
        query: split_query(url.query()),
    })
}

fn from_relative(uri: &str, responder: SocketAddr) -> LinkTarget {
    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri, None),
    };

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    LinkTarget {
        endpoint: Endpoint::from_socket_addr(responder),
        path,
        query: split_query(query),
    }
}

/// `coap` is not a special scheme, so IPv4 literals arrive as domains.
fn convert_host(host: url::Host<&str>) -> Host {
    match host {
        url::Host::Ipv4(v4) => Host::Ip(IpAddr::V4(v4)),
        url::Host::Ipv6(v6) => Host::Ip(IpAddr::V6(v6)),
        url::Host::Domain(domain) => match domain.parse::<IpAddr>() {
            Ok(ip) => Host::Ip(ip),
            Err(_) => Host::Name(domain.to_string()),
        },
    }
}

fn split_query(query: Option<&str>) -> Vec<String> {
    query
        .map(|q| {
            q.split('&')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
