//! Error types for Thing Description discovery.
//!
//! Every failure in this workspace is scoped to the single request, link or
//! document it concerns. The types here let callers tell those scopes apart
//! and are serializable so they can be forwarded in host-level error events.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias using DiscoveryError as the error type.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Top-level error type for discovery operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum DiscoveryError {
    /// A single CoAP request/response round-trip failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A link-value in a CoRE Link-Format document was malformed
    #[error("Link format error: {0}")]
    LinkFormat(#[from] LinkFormatError),

    /// A response body expected to be a Thing Description was not valid JSON
    #[error("Thing Description error: {0}")]
    ThingDescription(#[from] ThingDescriptionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A link names an absolute URI with a scheme other than `coap`
    #[error("Unsupported URI scheme '{scheme}' in link {uri}")]
    UnsupportedScheme { scheme: String, uri: String },

    /// A link target could not be turned into a request
    #[error("Invalid link target '{uri}': {reason}")]
    InvalidLinkTarget { uri: String, reason: String },

    /// A response arrived but cannot carry a Thing Description
    #[error("Unexpected response from {uri}: {reason}")]
    UnexpectedResponse { uri: String, reason: String },

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiscoveryError {
    /// Creates an unsupported scheme error.
    pub fn unsupported_scheme(scheme: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
            uri: uri.into(),
        }
    }

    /// Creates an unexpected response error.
    pub fn unexpected_response(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid link target error.
    pub fn invalid_link_target(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLinkTarget {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a CoAP transport for one request.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportError {
    /// No response arrived within the configured window
    #[error("Request to {uri} timed out after {timeout_ms}ms")]
    Timeout { uri: String, timeout_ms: u64 },

    /// The request could not be sent
    #[error("Failed to send request to {uri}: {reason}")]
    SendFailed { uri: String, reason: String },

    /// A datagram could not be decoded as a CoAP message
    #[error("Malformed datagram from {source_addr}: {reason}")]
    MalformedDatagram { source_addr: String, reason: String },

    /// The target host could not be resolved to a socket address
    #[error("Failed to resolve host {host}: {reason}")]
    AddressResolution { host: String, reason: String },

    /// Socket setup or I/O failure
    #[error("Socket error: {kind:?}: {message}")]
    Socket { kind: IoErrorKind, message: String },

    /// The request could not be encoded
    #[error("Failed to encode request: {reason}")]
    Encode { reason: String },
}

impl TransportError {
    /// Creates a timeout error.
    pub fn timeout(uri: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            uri: uri.into(),
            timeout_ms,
        }
    }

    /// Creates a send failed error.
    pub fn send_failed(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Creates a malformed datagram error.
    pub fn malformed(source_addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDatagram {
            source_addr: source_addr.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for the expected non-response of a device.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Socket {
            kind: err.kind().into(),
            message: err.to_string(),
        }
    }
}

/// Errors for a single link-value of a CoRE Link-Format document.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinkFormatError {
    /// The first token is not an angle-bracket enclosed URI reference
    #[error("Invalid URI reference: {token}")]
    InvalidUriReference { token: String },

    /// An attribute token has no '=' separator
    #[error("Attribute without value: {token}")]
    MissingAttributeValue { token: String },

    /// An attribute token has an empty name
    #[error("Empty attribute name in: {token}")]
    EmptyAttributeName { token: String },
}

/// Errors for a response body expected to carry a Thing Description.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ThingDescriptionError {
    /// The body is not valid JSON
    #[error("Invalid JSON at line {line}, column {column}: {message}")]
    InvalidJson {
        line: usize,
        column: usize,
        message: String,
        /// The offending body, lossily decoded
        body: String,
    },
}

impl ThingDescriptionError {
    /// Creates an invalid JSON error from a serde_json error and the body.
    pub fn invalid_json(err: &serde_json::Error, body: &[u8]) -> Self {
        Self::InvalidJson {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Returns the body that failed to parse.
    pub fn body(&self) -> &str {
        match self {
            ThingDescriptionError::InvalidJson { body, .. } => body,
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Serializable version of std::io::ErrorKind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoErrorKind {
    NotFound,
    PermissionDenied,
    ConnectionRefused,
    ConnectionReset,
    AddrInUse,
    AddrNotAvailable,
    InvalidInput,
    InvalidData,
    TimedOut,
    WouldBlock,
    Interrupted,
    Other,
}

impl From<io::ErrorKind> for IoErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => IoErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            io::ErrorKind::ConnectionRefused => IoErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset => IoErrorKind::ConnectionReset,
            io::ErrorKind::AddrInUse => IoErrorKind::AddrInUse,
            io::ErrorKind::AddrNotAvailable => IoErrorKind::AddrNotAvailable,
            io::ErrorKind::InvalidInput => IoErrorKind::InvalidInput,
            io::ErrorKind::InvalidData => IoErrorKind::InvalidData,
            io::ErrorKind::TimedOut => IoErrorKind::TimedOut,
            io::ErrorKind::WouldBlock => IoErrorKind::WouldBlock,
            io::ErrorKind::Interrupted => IoErrorKind::Interrupted,
            _ => IoErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_timeout() {
        let err = TransportError::timeout("coap://224.0.1.187/.well-known/core", 2000);
        assert!(err.is_timeout());
        let display = format!("{}", err);
        assert!(display.contains("2000"));

        let err = TransportError::send_failed("coap://[ff02::fd]/", "network unreachable");
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_error_serialization() {
        let err = DiscoveryError::unsupported_scheme("http", "http://example.com/td");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("UnsupportedScheme"));
        assert!(json.contains("http://example.com/td"));
    }

    #[test]
    fn test_thing_description_error_keeps_body() {
        let body = b"{not json";
        let parse_err = serde_json::from_slice::<serde_json::Value>(body).unwrap_err();
        let err = ThingDescriptionError::invalid_json(&parse_err, body);
        assert_eq!(err.body(), "{not json");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "in use");
        let err: TransportError = io_err.into();
        assert!(matches!(
            err,
            TransportError::Socket {
                kind: IoErrorKind::AddrInUse,
                ..
            }
        ));
    }
}
