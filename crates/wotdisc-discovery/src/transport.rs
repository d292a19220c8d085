//! CoAP transport seam
//!
//! The orchestrator issues GET requests through [`CoapTransport`] and
//! consumes the responses as a stream. A multicast request may yield any
//! number of responses before the listen window closes; a unicast request
//! yields at most one. The UDP implementation lives in `wotdisc-coap`;
//! tests script responses through an in-memory implementation.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use wotdisc_core::error::TransportError;
use wotdisc_core::types::{ContentFormat, Endpoint};

/// CoAP response code 2.05 Content
pub const CONTENT: u8 = 0x45;

/// A CoAP GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapRequest {
    /// Destination host and port
    pub endpoint: Endpoint,
    /// Absolute path, starting with `/`
    pub path: String,
    /// Query parameters, one `name=value` entry per option
    pub query: Vec<String>,
    /// Sent to a group: collect responses until the window closes
    pub multicast: bool,
    /// Block2 size exponent to request, if any
    pub block2_szx: Option<u8>,
}

impl CoapRequest {
    /// Creates a request, multicast iff the endpoint is a multicast address.
    pub fn get(endpoint: Endpoint, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        Self {
            multicast: endpoint.is_multicast(),
            endpoint,
            path,
            query: Vec::new(),
            block2_szx: None,
        }
    }

    /// Appends query parameters; `a=1&b=2` adds two entries.
    pub fn with_query(mut self, query: &str) -> Self {
        self.query.extend(
            query
                .split('&')
                .filter(|part| !part.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn with_block2(mut self, szx: Option<u8>) -> Self {
        self.block2_szx = szx;
        self
    }

    /// Non-empty path segments, for Uri-Path options.
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|segment| !segment.is_empty())
    }

    /// The request as a `coap://` URI.
    pub fn uri(&self) -> String {
        if self.query.is_empty() {
            format!("coap://{}{}", self.endpoint, self.path)
        } else {
            format!(
                "coap://{}{}?{}",
                self.endpoint,
                self.path,
                self.query.join("&")
            )
        }
    }
}

/// A CoAP response delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapResponse {
    /// Address the response came from
    pub source: SocketAddr,
    /// Raw response code (class << 5 | detail)
    pub code: u8,
    pub content_format: Option<ContentFormat>,
    /// Complete payload, after block-wise reassembly
    pub payload: Bytes,
}

impl CoapResponse {
    /// Creates a 2.05 Content response.
    pub fn content(
        source: SocketAddr,
        content_format: Option<ContentFormat>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            source,
            code: CONTENT,
            content_format,
            payload: payload.into(),
        }
    }

    pub fn with_code(mut self, code: u8) -> Self {
        self.code = code;
        self
    }

    /// True for 2.xx responses.
    pub fn is_success(&self) -> bool {
        self.code >> 5 == 2
    }

    /// Response code in `c.dd` notation.
    pub fn code_string(&self) -> String {
        format!("{}.{:02}", self.code >> 5, self.code & 0x1f)
    }
}

/// Responses to a single request.
pub type ResponseStream = ReceiverStream<Result<CoapResponse, TransportError>>;

/// Issues CoAP GET requests.
#[async_trait]
pub trait CoapTransport: Send + Sync + 'static {
    /// Sends the request and returns the stream of responses. An error
    /// here means nothing was sent; per-response failures arrive in-stream.
    async fn get(&self, request: CoapRequest) -> Result<ResponseStream, TransportError>;
}

#[async_trait]
impl<T: CoapTransport + ?Sized> CoapTransport for Arc<T> {
    async fn get(&self, request: CoapRequest) -> Result<ResponseStream, TransportError> {
        (**self).get(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_request_uri() {
        let endpoint = Endpoint::ip(IpAddr::V4(Ipv4Addr::new(224, 0, 1, 187)), 5683);
        let request = CoapRequest::get(endpoint, "/.well-known/core").with_query("rt=wot.thing");
        assert!(request.multicast);
        assert_eq!(
            request.uri(),
            "coap://224.0.1.187:5683/.well-known/core?rt=wot.thing"
        );
        assert_eq!(
            request.path_segments().collect::<Vec<_>>(),
            [".well-known", "core"]
        );
    }

    #[test]
    fn test_request_ipv6_unicast() {
        let endpoint = Endpoint::ip(IpAddr::V6("fe80::1".parse::<Ipv6Addr>().unwrap()), 5683);
        let request = CoapRequest::get(endpoint, "td");
        assert!(!request.multicast);
        assert_eq!(request.path, "/td");
        assert_eq!(request.uri(), "coap://[fe80::1]:5683/td");
    }

    #[test]
    fn test_query_split() {
        let endpoint = Endpoint::ip(IpAddr::V4(Ipv4Addr::LOCALHOST), 5683);
        let request = CoapRequest::get(endpoint, "/.well-known/core")
            .with_query("rt=core.rd-lookup-res&ct=40");
        assert_eq!(request.query, ["rt=core.rd-lookup-res", "ct=40"]);
    }

    #[test]
    fn test_response_code() {
        let source = SocketAddr::from(([192, 168, 1, 10], 5683));
        let ok = CoapResponse::content(source, Some(ContentFormat::Json), "{}");
        assert!(ok.is_success());
        assert_eq!(ok.code_string(), "2.05");

        let not_found = ok.with_code(0x84);
        assert!(!not_found.is_success());
        assert_eq!(not_found.code_string(), "4.04");
    }
}
