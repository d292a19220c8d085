//! # wotdisc core
//!
//! Shared types, error handling and configuration for discovering Web of
//! Things Thing Descriptions over CoAP.
//!
//! - **Types**: `DiscoveryTarget`, `Endpoint`, `ContentFormat` and the opaque
//!   `ThingDescription` with its identity rule (`id`, else `base`, else `title`).
//! - **Errors**: the per-request/per-link/per-document error taxonomy, built
//!   with `thiserror` and serializable for host-level error events.
//! - **Configuration**: YAML files with environment variable overrides and
//!   validation.
//!
//! ## Example
//!
//! ```
//! use wotdisc_core::types::ThingDescription;
//! use serde_json::json;
//!
//! let td = ThingDescription::new(json!({"base": "coap://[fe80::1]/", "title": "Lamp"}));
//! assert_eq!(td.identity(), Some("coap://[fe80::1]/"));
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{DiscoveryError, Result};
pub use types::{ContentFormat, DiscoveryTarget, Endpoint, Host, ThingDescription};
