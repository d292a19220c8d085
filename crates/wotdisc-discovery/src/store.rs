//! Keyed Thing Description store
//!
//! Entries are keyed by TD identity. An entry stored with a time-to-live
//! gets one expiry task; storing the same key again aborts that task and
//! starts a new one, so the timer always measures from the latest store.
//! Each timer carries the generation of the entry it was armed for and
//! only removes that exact entry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use wotdisc_core::types::ThingDescription;

/// A stored Thing Description.
#[derive(Debug)]
struct StoredTd {
    td: ThingDescription,
    stored_at: DateTime<Utc>,
    generation: u64,
    expiry: Option<JoinHandle<()>>,
}

impl StoredTd {
    fn cancel_expiry(&self) {
        if let Some(task) = &self.expiry {
            task.abort();
        }
    }
}

/// Concurrent map from TD identity to TD with optional expiry.
#[derive(Debug, Default)]
pub struct TdStore {
    entries: DashMap<String, StoredTd>,
    next_generation: AtomicU64,
}

impl TdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `td` under `key`, replacing and re-arming any existing entry.
    ///
    /// Arming a timer spawns a task and needs a Tokio runtime.
    pub fn insert(self: &Arc<Self>, key: impl Into<String>, td: ThingDescription, ttl: Option<Duration>) {
        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let expiry = ttl.map(|ttl| spawn_expiry(Arc::downgrade(self), key.clone(), generation, ttl));

        let entry = StoredTd {
            td,
            stored_at: Utc::now(),
            generation,
            expiry,
        };

        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            previous.cancel_expiry();
            debug!(key = %key, "Replaced stored Thing Description");
        } else {
            debug!(key = %key, "Stored Thing Description");
        }
    }

    pub fn get(&self, key: &str) -> Option<ThingDescription> {
        self.entries.get(key).map(|entry| entry.td.clone())
    }

    /// Time of the latest store for `key`.
    pub fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|entry| entry.stored_at)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes an entry and cancels its timer.
    pub fn remove(&self, key: &str) -> Option<ThingDescription> {
        self.entries.remove(key).map(|(_, entry)| {
            entry.cancel_expiry();
            entry.td
        })
    }

    /// Removes every entry and cancels every pending timer.
    pub fn clear(&self) {
        self.entries.retain(|_, entry| {
            entry.cancel_expiry();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> BTreeMap<String, ThingDescription> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.td.clone()))
            .collect()
    }

    /// The store as a JSON object from identity to TD.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .snapshot()
            .into_iter()
            .map(|(key, td)| (key, td.into_value()))
            .collect();
        Value::Object(map)
    }

    /// Removes `key` only if it still holds the entry armed with `generation`.
    fn expire(&self, key: &str, generation: u64) {
        if self
            .entries
            .remove_if(key, |_, entry| entry.generation == generation)
            .is_some()
        {
            debug!(key = %key, "Thing Description expired");
        }
    }
}

fn spawn_expiry(store: Weak<TdStore>, key: String, generation: u64, ttl: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        if let Some(store) = store.upgrade() {
            store.expire(&key, generation);
        }
    })
}

impl Drop for TdStore {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.cancel_expiry();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn td(title: &str) -> ThingDescription {
        ThingDescription::new(json!({ "title": title }))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = Arc::new(TdStore::new());
        store.insert("lamp", td("lamp"), None);
        store.insert("switch", td("switch"), None);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("lamp"), Some(td("lamp")));
        assert_eq!(store.keys(), ["lamp", "switch"]);
        assert!(store.stored_at("lamp").is_some());
    }

    #[tokio::test]
    async fn test_insert_replaces_value() {
        let store = Arc::new(TdStore::new());
        store.insert("lamp", td("old"), None);
        store.insert("lamp", td("new"), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("lamp"), Some(td("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let store = Arc::new(TdStore::new());
        store.insert("lamp", td("lamp"), Some(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(store.contains("lamp"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.contains("lamp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_again_restarts_timer() {
        let store = Arc::new(TdStore::new());
        store.insert("lamp", td("first"), Some(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(40)).await;
        store.insert("lamp", td("second"), Some(Duration::from_secs(60)));

        // The first timer would have fired here
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.get("lamp"), Some(td("second")));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!store.contains("lamp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_timers() {
        let store = Arc::new(TdStore::new());
        store.insert("lamp", td("lamp"), Some(Duration::from_secs(60)));
        store.clear();
        assert!(store.is_empty());

        // A new entry under the same key must survive the old timer
        store.insert("lamp", td("lamp"), None);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(store.contains("lamp"));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = Arc::new(TdStore::new());
        store.insert("lamp", td("lamp"), Some(Duration::from_secs(60)));
        assert_eq!(store.remove("lamp"), Some(td("lamp")));
        assert_eq!(store.remove("lamp"), None);
    }

    #[tokio::test]
    async fn test_to_json() {
        let store = Arc::new(TdStore::new());
        store.insert("urn:dev:1", ThingDescription::new(json!({"id": "urn:dev:1"})), None);
        assert_eq!(store.to_json(), json!({"urn:dev:1": {"id": "urn:dev:1"}}));
    }
}
