//! Distributed map contract.
//!
//! This trait abstracts over the partitioned, replicated key-value store the
//! collections are built on. The in-process [`crate::MemoryMap`] implements it
//! for tests and single-process deployments; a networked client implements it
//! for real clusters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{EntryEventKind, EntryListener};
use crate::types::{Key, LockOwner, MemberId, SubscriptionId, Value};

/// A named map in the distributed store, with per-key locks and entry events.
///
/// Locks are advisory: they serialize cooperating callers that take them, and do
/// not block `get`/`put`/`remove` from callers that don't.
#[async_trait]
pub trait DistributedMap: Send + Sync {
    /// Name of the backing map.
    fn name(&self) -> &str;

    /// Get a value by key. Returns None if the key doesn't exist.
    async fn get(&self, key: &[u8]) -> Result<Option<Value>>;

    /// Put a key-value pair, returning the previous value.
    async fn put(&self, key: Key, value: Value) -> Result<Option<Value>>;

    /// Put a key-value pair, giving up after `timeout`.
    ///
    /// Returns false if the store could not complete the write in time.
    async fn put_with_timeout(&self, key: Key, value: Value, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.put(key, value)).await {
            Ok(res) => res.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    /// Insert only if the key is absent. Returns true if the entry was created.
    async fn put_if_absent(&self, key: Key, value: Value) -> Result<bool>;

    /// Remove a key, returning the removed value.
    async fn remove(&self, key: &[u8]) -> Result<Option<Value>>;

    /// Returns true if the key exists.
    async fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Number of entries. Weakly consistent under concurrent mutation.
    async fn size(&self) -> Result<usize>;

    /// Snapshot of the keys. Concurrent changes may or may not be reflected.
    async fn keys(&self) -> Result<Vec<Key>>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// Try to lock `key` for `owner`, waiting at most `timeout`.
    ///
    /// Locks are reentrant for the same owner. Locking a key that has no entry
    /// is allowed.
    async fn try_lock(&self, key: &[u8], owner: LockOwner, timeout: Duration) -> Result<bool>;

    /// Lock `key` for `owner`, waiting as long as it takes.
    async fn lock(&self, key: &[u8], owner: LockOwner) -> Result<()>;

    /// Release one hold of `owner` on `key`.
    async fn unlock(&self, key: &[u8], owner: LockOwner) -> Result<()>;

    /// Returns true if anyone holds the lock on `key`.
    async fn is_locked(&self, key: &[u8]) -> Result<bool>;

    /// Subscribe `listener` to events of `kind`.
    async fn add_entry_listener(
        &self,
        kind: EntryEventKind,
        listener: Arc<dyn EntryListener>,
        include_value: bool,
    ) -> Result<SubscriptionId>;

    /// Cancel a subscription. Returns false if it was not registered.
    async fn remove_entry_listener(&self, id: SubscriptionId) -> Result<bool>;

    /// Destroy the map and all of its data, locks, and subscriptions.
    async fn destroy(&self) -> Result<()>;
}

/// Hands out maps by name on behalf of one cluster member.
///
/// Asking for the same name twice attaches to the same underlying state.
pub trait MapProvider: Send + Sync {
    /// Identity of the member this provider acts for.
    fn member_id(&self) -> MemberId;

    /// Get or create the map called `name`.
    fn get_map(&self, name: &str) -> Arc<dyn DistributedMap>;
}
