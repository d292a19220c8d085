//! Thing Description ingestion
//!
//! Every TD-bearing response body passes through [`TdIngestor::ingest`]:
//! it is parsed as JSON, emitted as a message and/or written into the keyed
//! store depending on the output mode. A body that is not JSON yields a
//! [`DiscoveryEvent::ParseError`] and nothing else.

use crate::metrics::DiscoveryMetrics;
use crate::store::TdStore;
use async_channel::{Sender, TrySendError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use wotdisc_core::config::{AppConfig, OutputMode};
use wotdisc_core::error::ThingDescriptionError;
use wotdisc_core::types::ThingDescription;

/// Where a response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Origin {
    /// Run the response belongs to, if any
    pub run_id: Option<Uuid>,
    pub source: Option<SocketAddr>,
}

impl Origin {
    pub fn run(run_id: Uuid, source: SocketAddr) -> Self {
        Self {
            run_id: Some(run_id),
            source: Some(source),
        }
    }
}

/// A discovered Thing Description as delivered to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TdMessage {
    /// Field name the TD is carried under
    pub property: String,
    pub thing_description: ThingDescription,
    pub origin: Origin,
    pub received_at: DateTime<Utc>,
}

impl TdMessage {
    /// The message as a JSON object: the TD under the configured property
    /// plus `source` and `runId` metadata.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        if let Some(source) = self.origin.source {
            object.insert("source".to_string(), Value::String(source.to_string()));
        }
        if let Some(run_id) = self.origin.run_id {
            object.insert("runId".to_string(), Value::String(run_id.to_string()));
        }
        object.insert(
            self.property.clone(),
            self.thing_description.as_value().clone(),
        );
        Value::Object(object)
    }
}

/// Events published by discovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// A Thing Description was ingested
    ThingDescription(TdMessage),

    /// A TD-bearing response body was not valid JSON
    ParseError {
        origin: Origin,
        error: ThingDescriptionError,
    },
}

/// Parses TD bodies and routes them to the message channel and the store.
#[derive(Debug, Clone)]
pub struct TdIngestor {
    mode: OutputMode,
    property: String,
    store: Option<Arc<TdStore>>,
    time_to_live: Option<Duration>,
    delete_existing: bool,
    events: Sender<DiscoveryEvent>,
    metrics: Arc<DiscoveryMetrics>,
}

impl TdIngestor {
    /// Creates an ingestor. `store` is only used when the output mode
    /// writes to context.
    pub fn new(
        config: &AppConfig,
        store: Option<Arc<TdStore>>,
        events: Sender<DiscoveryEvent>,
        metrics: Arc<DiscoveryMetrics>,
    ) -> Self {
        let mode = config.output.msg_or_context;
        Self {
            mode,
            property: config.output.msg_property.clone(),
            store: store.filter(|_| mode.uses_context()),
            time_to_live: config.storage.time_to_live(),
            delete_existing: config.storage.delete_existing_tds,
            events,
            metrics,
        }
    }

    pub fn store(&self) -> Option<&Arc<TdStore>> {
        self.store.as_ref()
    }

    /// Applies the clear-before-run policy.
    pub fn begin_run(&self, run_id: Uuid) {
        if let (true, Some(store)) = (self.delete_existing, &self.store) {
            debug!(run_id = %run_id, entries = store.len(), "Clearing stored Thing Descriptions");
            store.clear();
        }
    }

    /// Ingests one response body.
    pub fn ingest(
        &self,
        body: &[u8],
        origin: Origin,
    ) -> Result<ThingDescription, ThingDescriptionError> {
        let td = match ThingDescription::from_slice(body) {
            Ok(td) => td,
            Err(e) => {
                self.metrics.record_td_parse_error();
                warn!(
                    source = ?origin.source,
                    error = %e,
                    "Response body is not a valid Thing Description"
                );
                self.publish(DiscoveryEvent::ParseError {
                    origin,
                    error: e.clone(),
                });
                return Err(e);
            }
        };

        self.metrics.record_td_ingested();

        if let Some(store) = &self.store {
            match td.identity() {
                Some(identity) => store.insert(identity, td.clone(), self.time_to_live),
                None => warn!(
                    source = ?origin.source,
                    "Thing Description has no id, base or title; not stored"
                ),
            }
        }

        if self.mode.emits_messages() {
            self.publish(DiscoveryEvent::ThingDescription(TdMessage {
                property: self.property.clone(),
                thing_description: td.clone(),
                origin,
                received_at: Utc::now(),
            }));
        }

        debug!(
            identity = td.identity().unwrap_or("<none>"),
            source = ?origin.source,
            "Ingested Thing Description"
        );

        Ok(td)
    }

    fn publish(&self, event: DiscoveryEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.record_event_dropped();
                warn!("Event channel full, dropping discovery event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup(mode: OutputMode) -> (TdIngestor, async_channel::Receiver<DiscoveryEvent>, Arc<TdStore>) {
        let mut config = AppConfig::default();
        config.output.msg_or_context = mode;
        let (tx, rx) = async_channel::bounded(16);
        let store = Arc::new(TdStore::new());
        let ingestor = TdIngestor::new(
            &config,
            Some(store.clone()),
            tx,
            Arc::new(DiscoveryMetrics::new()),
        );
        (ingestor, rx, store)
    }

    fn origin() -> Origin {
        Origin::run(Uuid::new_v4(), SocketAddr::from(([192, 168, 1, 10], 5683)))
    }

    #[tokio::test]
    async fn test_message_mode_emits_only() {
        let (ingestor, rx, store) = setup(OutputMode::Msg);
        ingestor.ingest(br#"{"blah":"hi"}"#, origin()).unwrap();

        match rx.try_recv().unwrap() {
            DiscoveryEvent::ThingDescription(message) => {
                assert_eq!(message.thing_description.as_value(), &json!({"blah": "hi"}));
                assert_eq!(message.to_json()["thingDescription"], json!({"blah": "hi"}));
                assert_eq!(message.to_json()["source"], json!("192.168.1.10:5683"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(store.is_empty());
        assert!(ingestor.store().is_none());
    }

    #[tokio::test]
    async fn test_context_mode_stores_by_identity() {
        let (ingestor, rx, store) = setup(OutputMode::Context);
        ingestor
            .ingest(br#"{"id":"urn:dev:lamp","title":"Lamp"}"#, origin())
            .unwrap();
        ingestor.ingest(br#"{"title":"Switch"}"#, origin()).unwrap();

        assert!(rx.is_empty());
        assert_eq!(store.keys(), ["Switch", "urn:dev:lamp"]);
    }

    #[tokio::test]
    async fn test_both_mode() {
        let (ingestor, rx, store) = setup(OutputMode::Both);
        ingestor.ingest(br#"{"base":"coap://[fe80::1]/"}"#, origin()).unwrap();
        assert_eq!(rx.len(), 1);
        assert!(store.contains("coap://[fe80::1]/"));
    }

    #[tokio::test]
    async fn test_td_without_identity_not_stored() {
        let (ingestor, rx, store) = setup(OutputMode::Both);
        ingestor.ingest(br#"{"blah":"hi"}"#, origin()).unwrap();
        assert!(store.is_empty());
        assert_eq!(rx.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_publishes_error() {
        let (ingestor, rx, store) = setup(OutputMode::Both);
        let err = ingestor.ingest(b"not json", origin()).unwrap_err();
        assert_eq!(err.body(), "not json");

        match rx.try_recv().unwrap() {
            DiscoveryEvent::ParseError { error, .. } => assert_eq!(error, err),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_begin_run_clears_store() {
        let (ingestor, _rx, store) = setup(OutputMode::Context);
        ingestor.ingest(br#"{"title":"Lamp"}"#, origin()).unwrap();
        ingestor.begin_run(Uuid::new_v4());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_full_channel_drops_event() {
        let config = AppConfig::default();
        let (tx, rx) = async_channel::bounded(1);
        let metrics = Arc::new(DiscoveryMetrics::new());
        let ingestor = TdIngestor::new(&config, None, tx, metrics.clone());

        ingestor.ingest(br#"{"title":"a"}"#, origin()).unwrap();
        ingestor.ingest(br#"{"title":"b"}"#, origin()).unwrap();

        assert_eq!(rx.len(), 1);
        assert_eq!(metrics.snapshot().events_dropped, 1);
    }
}
