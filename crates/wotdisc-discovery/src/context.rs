//! Host context slots
//!
//! A host keeps one [`ContextStores`] for the process. Each discovery
//! service resolves its configured scope and variable name to a shared
//! [`TdStore`], so services configured with the same slot share entries.

use crate::store::TdStore;
use dashmap::DashMap;
use std::sync::Arc;
use wotdisc_core::config::{ContextScope, OutputConfig};

/// Named keyed stores per context scope.
#[derive(Debug, Default)]
pub struct ContextStores {
    slots: DashMap<(ContextScope, String), Arc<TdStore>>,
}

impl ContextStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the store in a slot, creating it on first use.
    pub fn slot(&self, scope: ContextScope, name: &str) -> Arc<TdStore> {
        self.slots
            .entry((scope, name.to_string()))
            .or_insert_with(|| Arc::new(TdStore::new()))
            .clone()
    }

    /// Store selected by an output configuration.
    pub fn for_output(&self, output: &OutputConfig) -> Arc<TdStore> {
        self.slot(output.context_scope, &output.context_var)
    }

    /// Returns the store in a slot if it exists.
    pub fn get(&self, scope: ContextScope, name: &str) -> Option<Arc<TdStore>> {
        self.slots
            .get(&(scope, name.to_string()))
            .map(|slot| slot.clone())
    }

    /// Drops a slot and all its entries.
    pub fn remove(&self, scope: ContextScope, name: &str) -> Option<Arc<TdStore>> {
        self.slots
            .remove(&(scope, name.to_string()))
            .map(|(_, store)| {
                store.clear();
                store
            })
    }
}
