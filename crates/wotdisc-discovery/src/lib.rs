//! Thing Description discovery over CoAP
//!
//! This crate finds WoT Thing Descriptions on the local network:
//! - Probes `/.well-known/wot-thing-description` on the CoAP multicast groups
//! - Follows `rt=wot.thing` links from `/.well-known/core`
//! - Walks a CoRE Resource Directory: lookup endpoint, lookup, then TD
//! - Fetches a single TD from a known URL, with an optional cache
//!
//! # Architecture
//!
//! [`DiscoveryService::trigger`] starts a run. Each run owns a task tracker;
//! every request and every follow-up request is a task of that run, so the
//! run is complete exactly when its tracker drains. Responses are routed by
//! content format: TD bodies go to the [`TdIngestor`], link-format bodies
//! are parsed and filtered. Failures are scoped to one request, link or
//! document and never abort a run.
//!
//! Ingested TDs are published as [`DiscoveryEvent`]s and/or written to a
//! keyed [`TdStore`] living in the host's [`ContextStores`].
//!
//! The network is behind the [`CoapTransport`] trait; `wotdisc-coap`
//! provides the UDP implementation.
//!
//! # Example
//!
//! ```no_run
//! use wotdisc_core::AppConfig;
//! use wotdisc_discovery::{CoapTransport, DiscoveryEvent, DiscoveryService};
//!
//! async fn run<T: CoapTransport>(transport: T) -> anyhow::Result<()> {
//!     let service = DiscoveryService::new(&AppConfig::default(), transport)?;
//!     let events = service.event_receiver();
//!
//!     service.discover().await;
//!
//!     while let Ok(DiscoveryEvent::ThingDescription(message)) = events.try_recv() {
//!         println!("{}", message.to_json());
//!     }
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod context;
pub mod fetch;
pub mod ingest;
pub mod metrics;
pub mod service;
pub mod store;
pub mod target;
pub mod transport;

pub use address::{AddressResolver, FamilySelection, GroupMode};
pub use context::ContextStores;
pub use fetch::TdFetcher;
pub use ingest::{DiscoveryEvent, Origin, TdIngestor, TdMessage};
pub use metrics::{DiscoveryMetrics, MetricsSnapshot};
pub use service::{DiscoveryRun, DiscoveryService, WELL_KNOWN_CORE_PATH, WELL_KNOWN_TD_PATH};
pub use store::TdStore;
pub use target::{parse_coap_url, resolve_link_target, LinkTarget};
pub use transport::{CoapRequest, CoapResponse, CoapTransport, ResponseStream};
pub use wotdisc_core::{DiscoveryError, Result};
