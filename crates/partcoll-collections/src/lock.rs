//! RAII guard over a per-key lock in a backing map.
//!
//! Every protocol step releases its guards explicitly with [`KeyLock::release`].
//! A guard dropped without release (early return through `?`, an abandoned
//! iterator, a cancelled future) schedules the unlock on the current runtime so
//! no exit path leaves a key locked.

use std::sync::Arc;
use std::time::Duration;

use partcoll_kv::{DistributedMap, Key, LockOwner};
use tracing::{trace, warn};

use crate::error::{CollectionError, Result};

/// A held lock on one key of one map.
pub(crate) struct KeyLock {
    map: Arc<dyn DistributedMap>,
    key: Key,
    owner: LockOwner,
    held: bool,
}

impl KeyLock {
    /// Acquires the lock on `key`, failing with `LockTimeout` after `timeout`.
    ///
    /// `label` names the key in logs and errors.
    pub(crate) async fn acquire(
        map: &Arc<dyn DistributedMap>,
        key: Key,
        label: &str,
        owner: LockOwner,
        timeout: Duration,
    ) -> Result<Self> {
        if map.try_lock(&key, owner, timeout).await? {
            trace!(map = map.name(), key = label, %owner, "locked");
            Ok(Self {
                map: map.clone(),
                key,
                owner,
                held: true,
            })
        } else {
            trace!(map = map.name(), key = label, ?timeout, "lock timeout");
            Err(CollectionError::LockTimeout {
                map: map.name().to_string(),
                key: label.to_string(),
            })
        }
    }

    /// Releases the lock now.
    pub(crate) async fn release(mut self) -> Result<()> {
        self.held = false;
        self.map.unlock(&self.key, self.owner).await?;
        Ok(())
    }
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let map = self.map.clone();
        let key = std::mem::take(&mut self.key);
        let owner = self.owner;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = map.unlock(&key, owner).await {
                        warn!(map = map.name(), %owner, "deferred unlock failed: {}", e);
                    }
                });
            }
            Err(_) => {
                warn!(map = map.name(), %owner, "lock dropped outside a runtime, left held");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partcoll_kv::{MapProvider, MemoryCluster};

    fn make_map() -> Arc<dyn DistributedMap> {
        MemoryCluster::new().join().get_map("locks")
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let map = make_map();
        let guard = KeyLock::acquire(&map, b"k".to_vec(), "k", LockOwner::new(), Duration::ZERO)
            .await
            .unwrap();
        assert!(map.is_locked(b"k").await.unwrap());
        guard.release().await.unwrap();
        assert!(!map.is_locked(b"k").await.unwrap());
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let map = make_map();
        let _held = KeyLock::acquire(&map, b"k".to_vec(), "k", LockOwner::new(), Duration::ZERO)
            .await
            .unwrap();
        match KeyLock::acquire(&map, b"k".to_vec(), "k", LockOwner::new(), Duration::ZERO).await {
            Err(CollectionError::LockTimeout { key, .. }) => assert_eq!(key, "k"),
            other => panic!("expected LockTimeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_drop_releases_eventually() {
        let map = make_map();
        {
            let _guard =
                KeyLock::acquire(&map, b"k".to_vec(), "k", LockOwner::new(), Duration::ZERO)
                    .await
                    .unwrap();
        }
        // the deferred unlock runs once this task yields
        let owner = LockOwner::new();
        assert!(map
            .try_lock(b"k", owner, Duration::from_secs(5))
            .await
            .unwrap());
    }
}
