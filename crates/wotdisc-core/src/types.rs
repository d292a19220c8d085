//! Core types shared by the discovery crates.

use crate::error::ThingDescriptionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV6};

/// Default CoAP UDP port (RFC 7252)
pub const COAP_DEFAULT_PORT: u16 = 5683;

/// The only URI scheme the discovery engine follows
pub const COAP_SCHEME: &str = "coap";

/// CoAP Content-Format of a response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentFormat {
    /// `application/link-format` (40)
    LinkFormat,
    /// `application/json` (50)
    Json,
    /// `application/td+json` (432)
    TdJson,
    /// Any other registered or unregistered code
    Other(u16),
}

impl ContentFormat {
    pub const LINK_FORMAT_CODE: u16 = 40;
    pub const JSON_CODE: u16 = 50;
    pub const TD_JSON_CODE: u16 = 432;

    /// Maps a numeric Content-Format option value.
    pub fn from_code(code: u16) -> Self {
        match code {
            Self::LINK_FORMAT_CODE => ContentFormat::LinkFormat,
            Self::JSON_CODE => ContentFormat::Json,
            Self::TD_JSON_CODE => ContentFormat::TdJson,
            other => ContentFormat::Other(other),
        }
    }

    /// Returns the numeric Content-Format option value.
    pub fn code(&self) -> u16 {
        match self {
            ContentFormat::LinkFormat => Self::LINK_FORMAT_CODE,
            ContentFormat::Json => Self::JSON_CODE,
            ContentFormat::TdJson => Self::TD_JSON_CODE,
            ContentFormat::Other(code) => *code,
        }
    }

    /// True for payloads that are ingested as Thing Descriptions.
    pub fn is_thing_description(&self) -> bool {
        matches!(self, ContentFormat::Json | ContentFormat::TdJson)
    }

    /// True for CoRE Link-Format payloads.
    pub fn is_link_format(&self) -> bool {
        matches!(self, ContentFormat::LinkFormat)
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentFormat::LinkFormat => write!(f, "application/link-format"),
            ContentFormat::Json => write!(f, "application/json"),
            ContentFormat::TdJson => write!(f, "application/td+json"),
            ContentFormat::Other(code) => write!(f, "content-format {}", code),
        }
    }
}

/// Host part of a CoAP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    /// Literal address
    Ip(IpAddr),
    /// Name that still needs resolution
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(v6)) => write!(f, "[{}]", v6),
            Host::Ip(IpAddr::V4(v4)) => write!(f, "{}", v4),
            Host::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Host and port a CoAP request is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: Host,
    pub port: u16,
    /// IPv6 zone index; 0 when unknown or not applicable
    pub scope_id: u32,
}

impl Endpoint {
    /// Creates an endpoint for a literal address.
    pub fn ip(ip: IpAddr, port: u16) -> Self {
        Self {
            host: Host::Ip(ip),
            port,
            scope_id: 0,
        }
    }

    /// Creates an endpoint for the sender of a datagram, keeping the
    /// interface scope of a link-local IPv6 sender.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let scope_id = match addr {
            SocketAddr::V6(v6) => v6.scope_id(),
            SocketAddr::V4(_) => 0,
        };
        Self {
            scope_id,
            ..Self::ip(addr.ip(), addr.port())
        }
    }

    /// Returns the socket address when the host is a literal address.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self.host {
            Host::Ip(IpAddr::V6(v6)) => Some(SocketAddr::V6(SocketAddrV6::new(
                v6,
                self.port,
                0,
                self.scope_id,
            ))),
            Host::Ip(ip) => Some(SocketAddr::new(ip, self.port)),
            Host::Name(_) => None,
        }
    }

    /// True when the host is a literal multicast address.
    pub fn is_multicast(&self) -> bool {
        matches!(self.host, Host::Ip(ip) if ip.is_multicast())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One multicast group (or unicast address) a discovery run queries.
///
/// Computed once per run from configuration and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryTarget {
    pub ip: IpAddr,
    pub port: u16,
}

impl DiscoveryTarget {
    /// Creates a target on the default CoAP port.
    pub fn new(ip: IpAddr) -> Self {
        Self::with_port(ip, COAP_DEFAULT_PORT)
    }

    pub fn with_port(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn scheme(&self) -> &'static str {
        COAP_SCHEME
    }

    /// Host as it appears in a URI, bracketed for IPv6.
    pub fn host(&self) -> String {
        Host::Ip(self.ip).to_string()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::ip(self.ip, self.port)
    }

    pub fn is_multicast(&self) -> bool {
        self.ip.is_multicast()
    }
}

impl fmt::Display for DiscoveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host(), self.port)
    }
}

/// A parsed WoT Thing Description.
///
/// The document is kept opaque; only the identity fields are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThingDescription(Value);

impl ThingDescription {
    /// Fields consulted for the identity, in priority order
    pub const IDENTITY_FIELDS: [&'static str; 3] = ["id", "base", "title"];

    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parses a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, ThingDescriptionError> {
        serde_json::from_slice(body)
            .map(Self)
            .map_err(|e| ThingDescriptionError::invalid_json(&e, body))
    }

    /// Storage identity: the first non-empty string among `id`, `base`, `title`.
    pub fn identity(&self) -> Option<&str> {
        Self::IDENTITY_FIELDS.iter().find_map(|field| {
            self.0
                .get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
        })
    }

    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for ThingDescription {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
