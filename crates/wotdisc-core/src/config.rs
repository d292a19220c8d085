//! Configuration for Thing Description discovery.
//!
//! Supports:
//! - Loading from YAML files
//! - Environment variable overrides (`WOTDISC__SECTION__FIELD`)
//! - Validation of all settings
//!
//! Every field has a default, so an empty document is a valid configuration.

use crate::error::{ConfigError, Result};
use crate::types::COAP_DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Upper bound for `storage.removal_time_hours` (ten years)
pub const MAX_REMOVAL_TIME_HOURS: f64 = 87_600.0;

/// Upper bound for `fetch.cache_minutes` (one year)
pub const MAX_CACHE_MINUTES: u64 = 525_600;

/// Root configuration.
///
/// # Examples
///
/// ```
/// use wotdisc_core::config::{AppConfig, OutputMode};
///
/// let config = AppConfig::from_yaml("output:\n  msg_or_context: both\n").unwrap();
/// assert_eq!(config.output.msg_or_context, OutputMode::Both);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which groups to query and how
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Where discovered Thing Descriptions go
    #[serde(default)]
    pub output: OutputConfig,

    /// Keyed store policy
    #[serde(default)]
    pub storage: StorageConfig,

    /// UDP transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Direct fetch settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration through the `config` crate: the optional file,
    /// then environment variables prefixed with `WOTDISC`.
    pub fn from_config_builder<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = config::Config::builder();
        let mut origin = "environment".to_string();

        if let Some(path) = path {
            let path = path.as_ref();
            if !path.exists() {
                return Err(ConfigError::file_not_found(path.display().to_string()).into());
            }
            origin = path.display().to_string();
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("WOTDISC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: origin,
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.output.validate()?;
        self.storage.validate()?;
        self.transport.validate()?;
        self.fetch.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Multicast scope for the TD probe and core link-format groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressScope {
    /// All-nodes group (224.0.0.1 / ff02::1)
    All,
    /// All-CoAP-nodes group (224.0.1.187 / ff02::fd)
    CoapOnly,
}

/// Discovery transport and mode flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Use CoAP for discovery at all
    #[serde(default = "default_true")]
    pub use_coap: bool,

    /// Query IPv4 groups for TD probe / link-format discovery
    #[serde(default = "default_true")]
    pub coap_use_ipv4: bool,

    #[serde(default = "default_scope")]
    pub coap_ipv4_scope: AddressScope,

    /// Query IPv6 groups for TD probe / link-format discovery
    #[serde(default)]
    pub coap_use_ipv6: bool,

    #[serde(default = "default_scope")]
    pub coap_ipv6_scope: AddressScope,

    /// Probe `/.well-known/wot-thing-description` directly
    #[serde(default = "default_true")]
    pub td_uri: bool,

    /// Discover through `/.well-known/core`
    #[serde(default = "default_true")]
    pub core_uri: bool,

    /// Discover through a CoRE Resource Directory
    #[serde(default)]
    pub use_core_rd: bool,

    /// Query the IPv4 RD group
    #[serde(default = "default_true")]
    pub core_rd_use_ipv4: bool,

    /// Query the IPv6 RD group
    #[serde(default)]
    pub core_rd_use_ipv6: bool,

    /// Destination port for multicast requests
    #[serde(default = "default_coap_port")]
    pub coap_port: u16,

    /// Unicast devices queried alongside the multicast groups
    #[serde(default)]
    pub static_targets: Vec<SocketAddr>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            use_coap: true,
            coap_use_ipv4: true,
            coap_ipv4_scope: default_scope(),
            coap_use_ipv6: false,
            coap_ipv6_scope: default_scope(),
            td_uri: true,
            core_uri: true,
            use_core_rd: false,
            core_rd_use_ipv4: true,
            core_rd_use_ipv6: false,
            coap_port: default_coap_port(),
            static_targets: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Validates the discovery configuration.
    pub fn validate(&self) -> Result<()> {
        if self.coap_port == 0 {
            return Err(ConfigError::invalid_value("discovery.coap_port", "Port cannot be 0").into());
        }
        if let Some(addr) = self.static_targets.iter().find(|addr| addr.port() == 0) {
            return Err(ConfigError::invalid_value(
                "discovery.static_targets",
                format!("Port cannot be 0 in {}", addr),
            )
            .into());
        }
        Ok(())
    }

    /// True when at least one discovery branch would issue a request.
    pub fn any_mode_enabled(&self) -> bool {
        self.use_coap && (self.td_uri || self.core_uri || self.use_core_rd)
    }
}

/// Output routing for ingested Thing Descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Emit a message per TD
    Msg,
    /// Write into the keyed context store
    Context,
    /// Both
    Both,
}

impl OutputMode {
    pub fn emits_messages(&self) -> bool {
        matches!(self, OutputMode::Msg | OutputMode::Both)
    }

    pub fn uses_context(&self) -> bool {
        matches!(self, OutputMode::Context | OutputMode::Both)
    }
}

/// Context scope the keyed store lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextScope {
    Flow,
    Global,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_mode")]
    pub msg_or_context: OutputMode,

    /// Field name carrying the TD in emitted messages
    #[serde(default = "default_msg_property")]
    pub msg_property: String,

    /// Name of the context slot holding the keyed store
    #[serde(default = "default_context_var")]
    pub context_var: String,

    #[serde(default = "default_context_scope")]
    pub context_scope: ContextScope,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            msg_or_context: default_output_mode(),
            msg_property: default_msg_property(),
            context_var: default_context_var(),
            context_scope: default_context_scope(),
        }
    }
}

impl OutputConfig {
    /// Validates the output configuration.
    pub fn validate(&self) -> Result<()> {
        if self.msg_or_context.emits_messages() && self.msg_property.is_empty() {
            return Err(
                ConfigError::invalid_value("output.msg_property", "cannot be empty").into(),
            );
        }
        if self.msg_or_context.uses_context() && self.context_var.is_empty() {
            return Err(ConfigError::invalid_value("output.context_var", "cannot be empty").into());
        }
        Ok(())
    }
}

/// Storage policy for the keyed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Clear the store at the start of every run
    #[serde(default = "default_true")]
    pub delete_existing_tds: bool,

    /// Remove entries after `removal_time_hours`
    #[serde(default)]
    pub timeout_removal: bool,

    #[serde(default = "default_removal_time_hours")]
    pub removal_time_hours: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            delete_existing_tds: true,
            timeout_removal: false,
            removal_time_hours: default_removal_time_hours(),
        }
    }
}

impl StorageConfig {
    /// Validates the storage configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.timeout_removal {
            return Ok(());
        }
        if !(self.removal_time_hours.is_finite() && self.removal_time_hours > 0.0) {
            return Err(ConfigError::invalid_value(
                "storage.removal_time_hours",
                format!("must be a positive number, got {}", self.removal_time_hours),
            )
            .into());
        }
        if self.removal_time_hours > MAX_REMOVAL_TIME_HOURS {
            return Err(ConfigError::invalid_value(
                "storage.removal_time_hours",
                format!(
                    "must be at most {} hours, got {}",
                    MAX_REMOVAL_TIME_HOURS, self.removal_time_hours
                ),
            )
            .into());
        }
        Ok(())
    }

    /// Time-to-live for stored entries, if removal is enabled. Values that
    /// do not fit a `Duration` yield `None`.
    pub fn time_to_live(&self) -> Option<Duration> {
        if !self.timeout_removal {
            return None;
        }
        Duration::try_from_secs_f64(self.removal_time_hours * 3600.0).ok()
    }
}

/// UDP/CoAP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_bind_ipv4")]
    pub bind_ipv4: SocketAddr,

    #[serde(default = "default_bind_ipv6")]
    pub bind_ipv6: SocketAddr,

    /// Listen window for multicast requests, timeout for unicast ones
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,

    /// Interface index for outgoing IPv6 multicast (0 = system default)
    #[serde(default)]
    pub ipv6_interface: u32,

    /// Block size exponent requested for TD payloads (size = 2^(szx+4))
    #[serde(default = "default_block2_szx")]
    pub block2_szx: Option<u8>,

    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_ipv4: default_bind_ipv4(),
            bind_ipv6: default_bind_ipv6(),
            response_timeout_ms: default_response_timeout_ms(),
            multicast_ttl: default_multicast_ttl(),
            ipv6_interface: 0,
            block2_szx: default_block2_szx(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

impl TransportConfig {
    /// Validates the transport configuration.
    pub fn validate(&self) -> Result<()> {
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "transport.response_timeout_ms",
                "cannot be 0",
            )
            .into());
        }
        if let Some(szx) = self.block2_szx {
            if szx > 6 {
                return Err(ConfigError::invalid_value(
                    "transport.block2_szx",
                    format!("must be between 0 and 6, got {}", szx),
                )
                .into());
            }
        }
        if self.max_datagram_size < 64 {
            return Err(ConfigError::invalid_value(
                "transport.max_datagram_size",
                "must be at least 64 bytes",
            )
            .into());
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Direct fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Cache fetched TDs per URL
    #[serde(default)]
    pub cache_tds: bool,

    #[serde(default = "default_cache_minutes")]
    pub cache_minutes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_tds: false,
            cache_minutes: default_cache_minutes(),
        }
    }
}

impl FetchConfig {
    /// Validates the fetch configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_tds && self.cache_minutes == 0 {
            return Err(
                ConfigError::invalid_value("fetch.cache_minutes", "cannot be 0").into(),
            );
        }
        if self.cache_minutes > MAX_CACHE_MINUTES {
            return Err(ConfigError::invalid_value(
                "fetch.cache_minutes",
                format!("must be at most {}, got {}", MAX_CACHE_MINUTES, self.cache_minutes),
            )
            .into());
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_tds
            .then(|| Duration::from_secs(self.cache_minutes.saturating_mul(60)))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or env-filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(ConfigError::invalid_value("logging.level", "cannot be empty").into());
        }
        Ok(())
    }

    /// Parses the level as a plain tracing level.
    pub fn parse_level(&self) -> Result<tracing::Level> {
        self.level.parse().map_err(|_| {
            ConfigError::invalid_value(
                "logging.level",
                format!("Invalid log level: {}", self.level),
            )
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

fn default_true() -> bool {
    true
}

fn default_scope() -> AddressScope {
    AddressScope::CoapOnly
}

fn default_coap_port() -> u16 {
    COAP_DEFAULT_PORT
}

fn default_output_mode() -> OutputMode {
    OutputMode::Msg
}

fn default_msg_property() -> String {
    "thingDescription".to_string()
}

fn default_context_var() -> String {
    "thingDescriptions".to_string()
}

fn default_context_scope() -> ContextScope {
    ContextScope::Flow
}

fn default_removal_time_hours() -> f64 {
    1.0
}

fn default_bind_ipv4() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
}

fn default_bind_ipv6() -> SocketAddr {
    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
}

fn default_response_timeout_ms() -> u64 {
    3000
}

fn default_multicast_ttl() -> u32 {
    1
}

fn default_block2_szx() -> Option<u8> {
    Some(5)
}

fn default_max_datagram_size() -> usize {
    1500
}

fn default_cache_minutes() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.discovery.use_coap);
        assert!(config.discovery.td_uri);
        assert!(config.discovery.core_uri);
        assert!(!config.discovery.use_core_rd);
        assert_eq!(config.output.msg_or_context, OutputMode::Msg);
        assert_eq!(config.output.msg_property, "thingDescription");
        assert_eq!(config.output.context_var, "thingDescriptions");
        assert!(config.storage.delete_existing_tds);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
discovery:
  coap_use_ipv6: true
  coap_ipv6_scope: all
  use_core_rd: true
  core_rd_use_ipv6: true
  static_targets:
    - "192.168.1.20:5683"

output:
  msg_or_context: both
  context_scope: global
  context_var: tds

storage:
  timeout_removal: true
  removal_time_hours: 0.5

logging:
  level: debug
  format: json
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(config.discovery.coap_use_ipv6);
        assert_eq!(config.discovery.coap_ipv6_scope, AddressScope::All);
        assert_eq!(config.discovery.coap_ipv4_scope, AddressScope::CoapOnly);
        assert!(config.discovery.use_core_rd);
        assert_eq!(
            config.discovery.static_targets,
            vec!["192.168.1.20:5683".parse::<SocketAddr>().unwrap()]
        );
        assert_eq!(config.output.msg_or_context, OutputMode::Both);
        assert_eq!(config.output.context_scope, ContextScope::Global);
        assert_eq!(config.output.context_var, "tds");
        assert_eq!(
            config.storage.time_to_live(),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_output_selector() {
        let result = AppConfig::from_yaml("output:\n  msg_or_context: pigeon\n");
        assert!(matches!(
            result,
            Err(DiscoveryError::Config(ConfigError::InvalidFormat { .. }))
        ));
    }

    #[test]
    fn test_storage_validation() {
        let storage = StorageConfig {
            timeout_removal: true,
            removal_time_hours: 0.0,
            ..Default::default()
        };
        assert!(storage.validate().is_err());

        let storage = StorageConfig {
            timeout_removal: false,
            removal_time_hours: 0.0,
            ..Default::default()
        };
        assert!(storage.validate().is_ok());
        assert_eq!(storage.time_to_live(), None);
    }

    #[test]
    fn test_oversized_removal_time_is_rejected() {
        let storage = StorageConfig {
            timeout_removal: true,
            removal_time_hours: 1e16,
            ..Default::default()
        };
        assert!(matches!(
            storage.validate(),
            Err(DiscoveryError::Config(ConfigError::InvalidValue { .. }))
        ));
        // Does not panic even when validation was skipped
        assert_eq!(storage.time_to_live(), None);

        let storage = StorageConfig {
            timeout_removal: true,
            removal_time_hours: MAX_REMOVAL_TIME_HOURS,
            ..Default::default()
        };
        assert!(storage.validate().is_ok());
        assert!(storage.time_to_live().is_some());

        let yaml = "storage:\n  timeout_removal: true\n  removal_time_hours: 1.0e16\n";
        assert!(AppConfig::from_yaml(yaml).unwrap().validate().is_err());
    }

    #[test]
    fn test_transport_validation() {
        let transport = TransportConfig {
            block2_szx: Some(7),
            ..Default::default()
        };
        assert!(transport.validate().is_err());

        let transport = TransportConfig {
            response_timeout_ms: 0,
            ..Default::default()
        };
        assert!(transport.validate().is_err());
    }

    #[test]
    fn test_fetch_cache_ttl() {
        let fetch = FetchConfig::default();
        assert_eq!(fetch.cache_ttl(), None);

        let fetch = FetchConfig {
            cache_tds: true,
            cache_minutes: 15,
        };
        assert_eq!(fetch.cache_ttl(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_oversized_cache_minutes() {
        let fetch = FetchConfig {
            cache_tds: true,
            cache_minutes: u64::MAX,
        };
        assert!(fetch.validate().is_err());
        assert_eq!(fetch.cache_ttl(), Some(Duration::from_secs(u64::MAX)));

        let fetch = FetchConfig {
            cache_tds: true,
            cache_minutes: MAX_CACHE_MINUTES,
        };
        assert!(fetch.validate().is_ok());
    }

    #[test]
    fn test_any_mode_enabled() {
        let mut discovery = DiscoveryConfig::default();
        assert!(discovery.any_mode_enabled());

        discovery.td_uri = false;
        discovery.core_uri = false;
        assert!(!discovery.any_mode_enabled());

        discovery.use_core_rd = true;
        discovery.use_coap = false;
        assert!(!discovery.any_mode_enabled());
    }

    #[test]
    fn test_logging_parse_level() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert!(logging.parse_level().is_ok());

        let invalid = LoggingConfig {
            level: "chatty".to_string(),
            ..Default::default()
        };
        assert!(invalid.parse_level().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "discovery:\n  td_uri: false").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert!(!config.discovery.td_uri);

        let missing = AppConfig::from_file("/nonexistent/wotdisc.yaml");
        assert!(matches!(
            missing,
            Err(DiscoveryError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
