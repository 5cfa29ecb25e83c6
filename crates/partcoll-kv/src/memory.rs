//! In-process distributed map.
//!
//! Maps live in a [`MemoryCluster`]; every [`MemoryMember`] that joins the
//! cluster sees the same named maps, so several members in one process behave
//! like several nodes of a real cluster. Data is not persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{KvError, Result};
use crate::event::{EntryEvent, EntryEventKind, EntryListener};
use crate::map::{DistributedMap, MapProvider};
use crate::types::{Key, LockOwner, MemberId, SubscriptionId, Value};

#[derive(Clone, Copy, Debug)]
struct LockState {
    owner: LockOwner,
    holds: u32,
}

struct Subscription {
    kind: EntryEventKind,
    include_value: bool,
    listener: Arc<dyn EntryListener>,
}

/// Shared state of one named map.
struct MapCore {
    name: String,
    data: RwLock<HashMap<Key, Value>>,
    locks: Mutex<HashMap<Key, LockState>>,
    released: Notify,
    listeners: DashMap<SubscriptionId, Subscription>,
    destroyed: AtomicBool,
}

impl MapCore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            released: Notify::new(),
            listeners: DashMap::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    fn check_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(KvError::Destroyed(self.name.clone()));
        }
        Ok(())
    }

    fn poisoned(&self, reason: impl ToString) -> KvError {
        KvError::Poisoned {
            map: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Takes the lock if it is free or already ours.
    fn acquire(&self, key: &[u8], owner: LockOwner) -> Result<bool> {
        self.check_live()?;
        let mut locks = self.locks.lock().map_err(|e| self.poisoned(e))?;
        match locks.get_mut(key) {
            Some(state) if state.owner == owner => {
                state.holds += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                locks.insert(key.to_vec(), LockState { owner, holds: 1 });
                Ok(true)
            }
        }
    }

    fn release(&self, key: &[u8], owner: LockOwner) -> Result<()> {
        self.check_live()?;
        let mut locks = self.locks.lock().map_err(|e| self.poisoned(e))?;
        let freed = match locks.get_mut(key) {
            Some(state) if state.owner == owner => {
                state.holds -= 1;
                state.holds == 0
            }
            _ => {
                return Err(KvError::NotLockOwner {
                    map: self.name.clone(),
                    owner,
                })
            }
        };
        if freed {
            locks.remove(key);
            drop(locks);
            self.released.notify_waiters();
        }
        Ok(())
    }

    /// Delivers an event to every subscription of the matching kind.
    fn fire(&self, kind: EntryEventKind, key: &[u8], value: Option<&Value>, member: MemberId) {
        let targets: Vec<(bool, Arc<dyn EntryListener>)> = self
            .listeners
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.include_value, s.listener.clone()))
            .collect();
        for (include_value, listener) in targets {
            let event = EntryEvent {
                map: self.name.clone(),
                kind,
                key: key.to_vec(),
                value: if include_value { value.cloned() } else { None },
                member,
            };
            listener.on_entry(&event);
        }
    }
}

/// A cluster of in-process maps shared by all of its members.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    maps: Arc<DashMap<String, Arc<MapCore>>>,
}

impl MemoryCluster {
    /// Creates an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new member to the cluster.
    pub fn join(&self) -> MemoryMember {
        let member = MemoryMember {
            cluster: self.clone(),
            id: MemberId::new(),
        };
        debug!("member {} joined in-process cluster", member.id);
        member
    }

    /// Names of the maps currently alive in the cluster.
    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.maps.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn core(&self, name: &str) -> Arc<MapCore> {
        self.maps
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MapCore::new(name)))
            .clone()
    }

    fn forget(&self, core: &Arc<MapCore>) {
        self.maps
            .remove_if(&core.name, |_, current| Arc::ptr_eq(current, core));
    }
}

/// One member of a [`MemoryCluster`].
#[derive(Clone)]
pub struct MemoryMember {
    cluster: MemoryCluster,
    id: MemberId,
}

impl MemoryMember {
    /// Opens `name` as a concrete [`MemoryMap`].
    pub fn map(&self, name: &str) -> MemoryMap {
        MemoryMap {
            core: self.cluster.core(name),
            cluster: self.cluster.clone(),
            member: self.id,
        }
    }
}

impl MapProvider for MemoryMember {
    fn member_id(&self) -> MemberId {
        self.id
    }

    fn get_map(&self, name: &str) -> Arc<dyn DistributedMap> {
        Arc::new(self.map(name))
    }
}

/// A member's handle on a shared in-process map.
#[derive(Clone)]
pub struct MemoryMap {
    core: Arc<MapCore>,
    cluster: MemoryCluster,
    member: MemberId,
}

impl MemoryMap {
    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Key, Value>>> {
        self.core.check_live()?;
        self.core.data.read().map_err(|e| self.core.poisoned(e))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Key, Value>>> {
        self.core.check_live()?;
        self.core.data.write().map_err(|e| self.core.poisoned(e))
    }

    async fn wait_for_lock(
        &self,
        key: &[u8],
        owner: LockOwner,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        loop {
            let notified = self.core.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.core.acquire(key, owner)? {
                return Ok(true);
            }
            match deadline {
                Some(at) => {
                    if tokio::time::timeout_at(at, notified).await.is_err() {
                        trace!(map = %self.core.name, %owner, "lock wait timed out");
                        return Ok(false);
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[async_trait]
impl DistributedMap for MemoryMap {
    fn name(&self) -> &str {
        &self.core.name
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn put(&self, key: Key, value: Value) -> Result<Option<Value>> {
        let previous = self.write()?.insert(key.clone(), value.clone());
        let kind = if previous.is_some() {
            EntryEventKind::Updated
        } else {
            EntryEventKind::Added
        };
        self.core.fire(kind, &key, Some(&value), self.member);
        Ok(previous)
    }

    async fn put_if_absent(&self, key: Key, value: Value) -> Result<bool> {
        {
            let mut data = self.write()?;
            if data.contains_key(&key) {
                return Ok(false);
            }
            data.insert(key.clone(), value.clone());
        }
        self.core
            .fire(EntryEventKind::Added, &key, Some(&value), self.member);
        Ok(true)
    }

    async fn remove(&self, key: &[u8]) -> Result<Option<Value>> {
        let removed = self.write()?.remove(key);
        if let Some(old) = &removed {
            self.core
                .fire(EntryEventKind::Removed, key, Some(old), self.member);
        }
        Ok(removed)
    }

    async fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.read()?.contains_key(key))
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn keys(&self) -> Result<Vec<Key>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let drained: Vec<(Key, Value)> = self.write()?.drain().collect();
        for (key, value) in &drained {
            self.core
                .fire(EntryEventKind::Removed, key, Some(value), self.member);
        }
        Ok(())
    }

    async fn try_lock(&self, key: &[u8], owner: LockOwner, timeout: Duration) -> Result<bool> {
        self.wait_for_lock(key, owner, Some(Instant::now() + timeout))
            .await
    }

    async fn lock(&self, key: &[u8], owner: LockOwner) -> Result<()> {
        self.wait_for_lock(key, owner, None).await.map(|_| ())
    }

    async fn unlock(&self, key: &[u8], owner: LockOwner) -> Result<()> {
        self.core.release(key, owner)
    }

    async fn is_locked(&self, key: &[u8]) -> Result<bool> {
        self.core.check_live()?;
        let locks = self.core.locks.lock().map_err(|e| self.core.poisoned(e))?;
        Ok(locks.contains_key(key))
    }

    async fn add_entry_listener(
        &self,
        kind: EntryEventKind,
        listener: Arc<dyn EntryListener>,
        include_value: bool,
    ) -> Result<SubscriptionId> {
        self.core.check_live()?;
        let id = SubscriptionId::new();
        self.core.listeners.insert(
            id,
            Subscription {
                kind,
                include_value,
                listener,
            },
        );
        debug!(map = %self.core.name, %id, ?kind, "entry listener added");
        Ok(id)
    }

    async fn remove_entry_listener(&self, id: SubscriptionId) -> Result<bool> {
        self.core.check_live()?;
        Ok(self.core.listeners.remove(&id).is_some())
    }

    async fn destroy(&self) -> Result<()> {
        if self.core.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cluster.forget(&self.core);
        if let Ok(mut data) = self.core.data.write() {
            data.clear();
        }
        if let Ok(mut locks) = self.core.locks.lock() {
            locks.clear();
        }
        self.core.listeners.clear();
        // wake lock waiters so they observe the destroyed flag
        self.core.released.notify_waiters();
        debug!(map = %self.core.name, "map destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn make_map(name: &str) -> MemoryMap {
        MemoryCluster::new().join().map(name)
    }

    #[tokio::test]
    async fn test_put_get() {
        let map = make_map("m");
        assert_eq!(map.put(b"key1".to_vec(), b"value1".to_vec()).await.unwrap(), None);
        assert_eq!(map.get(b"key1").await.unwrap(), Some(b"value1".to_vec()));
        assert_eq!(map.get(b"key2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_returns_previous() {
        let map = make_map("m");
        map.put(b"key".to_vec(), b"v1".to_vec()).await.unwrap();
        let prev = map.put(b"key".to_vec(), b"v2".to_vec()).await.unwrap();
        assert_eq!(prev, Some(b"v1".to_vec()));
        assert_eq!(map.get(b"key").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let map = make_map("m");
        assert!(map.put_if_absent(b"k".to_vec(), b"a".to_vec()).await.unwrap());
        assert!(!map.put_if_absent(b"k".to_vec(), b"b".to_vec()).await.unwrap());
        assert_eq!(map.get(b"k").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_remove_and_contains() {
        let map = make_map("m");
        map.put(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        assert!(map.contains_key(b"k").await.unwrap());
        assert_eq!(map.remove(b"k").await.unwrap(), Some(b"v".to_vec()));
        assert!(!map.contains_key(b"k").await.unwrap());
        assert_eq!(map.remove(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_size_keys_clear() {
        let map = make_map("m");
        for i in 0..4u8 {
            map.put(vec![i], vec![i]).await.unwrap();
        }
        assert_eq!(map.size().await.unwrap(), 4);
        let mut keys = map.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![vec![0], vec![1], vec![2], vec![3]]);
        map.clear().await.unwrap();
        assert_eq!(map.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_same_name_shares_state_across_members() {
        let cluster = MemoryCluster::new();
        let a = cluster.join().get_map("shared");
        let b = cluster.join().get_map("shared");
        a.put(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        assert_eq!(b.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cluster.map_names(), vec!["shared".to_string()]);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_between_owners() {
        let map = make_map("m");
        let (a, b) = (LockOwner::new(), LockOwner::new());
        assert!(map.try_lock(b"k", a, Duration::ZERO).await.unwrap());
        assert!(!map.try_lock(b"k", b, Duration::ZERO).await.unwrap());
        assert!(map.is_locked(b"k").await.unwrap());
        map.unlock(b"k", a).await.unwrap();
        assert!(map.try_lock(b"k", b, Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_is_reentrant() {
        let map = make_map("m");
        let a = LockOwner::new();
        assert!(map.try_lock(b"k", a, Duration::ZERO).await.unwrap());
        assert!(map.try_lock(b"k", a, Duration::ZERO).await.unwrap());
        map.unlock(b"k", a).await.unwrap();
        assert!(map.is_locked(b"k").await.unwrap());
        map.unlock(b"k", a).await.unwrap();
        assert!(!map.is_locked(b"k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_by_non_owner_fails() {
        let map = make_map("m");
        let a = LockOwner::new();
        map.lock(b"k", a).await.unwrap();
        match map.unlock(b"k", LockOwner::new()).await {
            Err(KvError::NotLockOwner { .. }) => {}
            other => panic!("expected NotLockOwner, got {:?}", other),
        }
        match map.unlock(b"free", a).await {
            Err(KvError::NotLockOwner { .. }) => {}
            other => panic!("expected NotLockOwner, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_try_lock_waits_for_release() {
        let map = make_map("m");
        let a = LockOwner::new();
        map.lock(b"k", a).await.unwrap();

        let releaser = map.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            releaser.unlock(b"k", a).await.unwrap();
        });

        let b = LockOwner::new();
        assert!(map.try_lock(b"k", b, Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_lock_times_out() {
        let map = make_map("m");
        map.lock(b"k", LockOwner::new()).await.unwrap();
        let acquired = map
            .try_lock(b"k", LockOwner::new(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!acquired);
    }

    #[tokio::test]
    async fn test_entry_events_by_kind() {
        let map = make_map("events");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for kind in [
            EntryEventKind::Added,
            EntryEventKind::Updated,
            EntryEventKind::Removed,
        ] {
            let seen = seen.clone();
            map.add_entry_listener(
                kind,
                Arc::new(move |e: &EntryEvent| {
                    seen.lock().unwrap().push((e.kind, e.value.clone()));
                }),
                true,
            )
            .await
            .unwrap();
        }

        map.put(b"k".to_vec(), b"1".to_vec()).await.unwrap();
        map.put(b"k".to_vec(), b"2".to_vec()).await.unwrap();
        map.remove(b"k").await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (EntryEventKind::Added, Some(b"1".to_vec())),
                (EntryEventKind::Updated, Some(b"2".to_vec())),
                (EntryEventKind::Removed, Some(b"2".to_vec())),
            ]
        );
    }

    #[tokio::test]
    async fn test_event_member_and_value_suppression() {
        let cluster = MemoryCluster::new();
        let writer = cluster.join();
        let reader = cluster.join();
        let map = reader.map("m");

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        map.add_entry_listener(
            EntryEventKind::Added,
            Arc::new(move |e: &EntryEvent| {
                *slot.lock().unwrap() = Some(e.clone());
            }),
            false,
        )
        .await
        .unwrap();

        writer
            .get_map("m")
            .put(b"k".to_vec(), b"v".to_vec())
            .await
            .unwrap();

        let event = seen.lock().unwrap().clone().unwrap();
        assert_eq!(event.member, writer.member_id());
        assert_eq!(event.value, None);
        assert_eq!(event.map, "m");
    }

    #[tokio::test]
    async fn test_remove_entry_listener() {
        let map = make_map("m");
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = map
            .add_entry_listener(
                EntryEventKind::Added,
                Arc::new(move |_: &EntryEvent| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                false,
            )
            .await
            .unwrap();

        map.put(b"a".to_vec(), vec![]).await.unwrap();
        assert!(map.remove_entry_listener(id).await.unwrap());
        assert!(!map.remove_entry_listener(id).await.unwrap());
        map.put(b"b".to_vec(), vec![]).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_destroy_detaches_and_resets() {
        let cluster = MemoryCluster::new();
        let member = cluster.join();
        let map = member.map("gone");
        map.put(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        map.destroy().await.unwrap();

        match map.get(b"k").await {
            Err(KvError::Destroyed(name)) => assert_eq!(name, "gone"),
            other => panic!("expected Destroyed, got {:?}", other),
        }
        assert!(cluster.map_names().is_empty());

        let fresh = member.map("gone");
        assert_eq!(fresh.size().await.unwrap(), 0);
    }
}
