//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use partcoll_collections::{CollectionConfig, Collections, ItemEvent, ItemListener};
use partcoll_kv::MemoryCluster;

/// Config with short retry intervals for fast tests
pub fn test_config() -> CollectionConfig {
    CollectionConfig {
        name_prefix: "it".to_string(),
        lock_timeout_ms: 5_000,
        retry_attempt_ms: 20,
        retry_backoff_ms: 2,
        ..CollectionConfig::default()
    }
}

/// An in-process cluster with one `Collections` factory per member
pub struct TestCluster {
    pub cluster: MemoryCluster,
    pub members: Vec<Collections>,
}

impl TestCluster {
    pub fn new(size: usize) -> Self {
        let cluster = MemoryCluster::new();
        let members = (0..size)
            .map(|_| Collections::with_config(Arc::new(cluster.join()), test_config()))
            .collect();
        Self { cluster, members }
    }

    pub fn member(&self, i: usize) -> &Collections {
        &self.members[i]
    }
}

/// Records every item event it receives
pub struct Recorder<E> {
    pub added: Mutex<Vec<ItemEvent<E>>>,
    pub removed: Mutex<Vec<ItemEvent<E>>>,
}

impl<E> Default for Recorder<E> {
    fn default() -> Self {
        Self {
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Send + Sync> ItemListener<E> for Recorder<E> {
    fn item_added(&self, event: ItemEvent<E>) {
        self.added.lock().unwrap().push(event);
    }

    fn item_removed(&self, event: ItemEvent<E>) {
        self.removed.lock().unwrap().push(event);
    }
}
