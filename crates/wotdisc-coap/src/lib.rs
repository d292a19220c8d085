//! CoAP over UDP for Thing Description discovery
//!
//! Implements [`wotdisc_discovery::CoapTransport`] with `coap-lite` message
//! encoding and `socket2` socket setup:
//! - Non-confirmable multicast GETs with a listen window
//! - Confirmable unicast GETs with a response timeout
//! - Block2 (RFC 7959) continuation and reassembly
//!
//! # Example
//!
//! ```no_run
//! use wotdisc_coap::UdpCoapTransport;
//! use wotdisc_core::AppConfig;
//! use wotdisc_discovery::DiscoveryService;
//!
//! # async fn run() -> wotdisc_core::Result<()> {
//! let config = AppConfig::default();
//! let transport = UdpCoapTransport::new(config.transport.clone());
//! let service = DiscoveryService::new(&config, transport)?;
//! service.discover().await;
//! # Ok(())
//! # }
//! ```

pub mod message;
pub mod udp;

pub use message::Block2;
pub use udp::UdpCoapTransport;
