//! Queue nodes and the store that holds them.
//!
//! A node lives as one entry of the queue's node map. Its key is a [`NodeKey`]
//! minted when the value is enqueued; the entry value is the encoded
//! [`Node`], so rewriting `next` never changes the node's identity or its lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use partcoll_kv::{DistributedMap, EntryEvent, Key, LockOwner, MapProvider};
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::codec::{self, Element};
use crate::collection::DistributedCollection;
use crate::error::Result;
use crate::listener::{self, ItemListener, ListenerRegistration};
use crate::lock::KeyLock;
use crate::set::EntrySet;

/// Identity of a queue node; the "pointer" in the chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey(Uuid);

impl NodeKey {
    /// Mints a fresh node identity
    pub fn new() -> Self {
        NodeKey(Uuid::new_v4())
    }
}

impl Default for NodeKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// One link of the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node<E> {
    /// The enqueued value
    pub value: E,
    /// Next node toward the tail, `None` at the tail
    pub next: Option<NodeKey>,
}

impl<E> Node<E> {
    /// A node that is not yet linked to a successor.
    pub fn new(value: E) -> Self {
        Self { value, next: None }
    }
}

/// Storage for queue nodes, keyed by [`NodeKey`].
///
/// No lock is held across a call; callers that need atomicity with respect to
/// other operations lock the node first with [`NodeStore::lock`].
pub struct NodeStore<E> {
    keys: EntrySet<NodeKey>,
    _marker: std::marker::PhantomData<fn() -> E>,
}

impl<E: Element> NodeStore<E> {
    /// Attaches to the node map called `map_name` for the queue `queue`.
    pub fn open(provider: &dyn MapProvider, queue: &str, map_name: &str) -> Self {
        Self {
            keys: EntrySet::open(provider, queue, map_name),
            _marker: std::marker::PhantomData,
        }
    }

    fn map(&self) -> &Arc<dyn DistributedMap> {
        self.keys.backing()
    }

    fn raw_key(key: &NodeKey) -> Result<Key> {
        EntrySet::<NodeKey>::key_of(key)
    }

    /// True if a node with this key is stored.
    pub async fn exists(&self, key: &NodeKey) -> Result<bool> {
        self.keys.contains(key).await
    }

    /// Stores a new node. Returns false if the key is already taken or the
    /// store did not finish within `timeout`.
    pub async fn insert(&self, key: &NodeKey, node: &Node<E>, timeout: Duration) -> Result<bool> {
        let payload = codec::encode(node)?;
        match tokio::time::timeout(timeout, self.keys.insert_with(key, payload)).await {
            Ok(res) => res,
            Err(_) => Ok(false),
        }
    }

    /// Reads a node. `None` if it was never stored or has been deleted.
    pub async fn get(&self, key: &NodeKey) -> Result<Option<Node<E>>> {
        match self.map().get(&Self::raw_key(key)?).await? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persists a rewritten node (a changed `next`).
    pub async fn update(&self, key: &NodeKey, node: &Node<E>) -> Result<()> {
        self.map()
            .put(Self::raw_key(key)?, codec::encode(node)?)
            .await?;
        Ok(())
    }

    /// Persists a rewritten node unless the store misses `timeout`.
    ///
    /// Returns false on a missed deadline; the write may then still land.
    pub async fn update_within(
        &self,
        key: &NodeKey,
        node: &Node<E>,
        timeout: Duration,
    ) -> Result<bool> {
        Ok(self
            .map()
            .put_with_timeout(Self::raw_key(key)?, codec::encode(node)?, timeout)
            .await?)
    }

    /// Deletes a node. Returns false if it was already gone.
    pub async fn delete(&self, key: &NodeKey) -> Result<bool> {
        self.keys.remove(key).await
    }

    /// Number of stored nodes. Weakly consistent.
    pub async fn size(&self) -> Result<usize> {
        self.keys.size().await
    }

    /// Locks one node for `owner`.
    pub(crate) async fn lock(
        &self,
        key: &NodeKey,
        owner: LockOwner,
        timeout: Duration,
    ) -> Result<KeyLock> {
        KeyLock::acquire(self.map(), Self::raw_key(key)?, &key.to_string(), owner, timeout).await
    }

    /// Lazy cursor over the stored nodes.
    ///
    /// The key list is a snapshot; each node is read under its own lock and
    /// nodes deleted since the snapshot are skipped.
    pub async fn iterate(&self, lock_timeout: Duration) -> Result<NodeCursor<'_, E>> {
        self.cursor(Some(lock_timeout)).await
    }

    /// Like [`NodeStore::iterate`] but reads nodes without locking them.
    ///
    /// For observers that already hold slot locks and must not wait on a node.
    pub async fn scan(&self) -> Result<NodeCursor<'_, E>> {
        self.cursor(None).await
    }

    async fn cursor(&self, lock_timeout: Option<Duration>) -> Result<NodeCursor<'_, E>> {
        let mut keys = Vec::new();
        for key in self.keys.iter().await? {
            keys.push(key?);
        }
        Ok(NodeCursor {
            store: self,
            keys: keys.into_iter(),
            owner: LockOwner::new(),
            lock_timeout,
        })
    }

    /// Subscribes to nodes entering and leaving the store, reported as their values.
    pub async fn add_item_listener(
        &self,
        source: &str,
        listener: Arc<dyn ItemListener<E>>,
        include_value: bool,
    ) -> Result<ListenerRegistration> {
        listener::register(self.map(), source, listener, include_value, Self::extract).await
    }

    /// Removes a registration made by [`NodeStore::add_item_listener`].
    pub async fn remove_item_listener(&self, registration: &ListenerRegistration) -> Result<bool> {
        self.keys.remove_item_listener(registration).await
    }

    /// Drops every node and the backing map.
    pub async fn destroy(&self) -> Result<()> {
        self.keys.destroy().await
    }

    fn extract(event: &EntryEvent) -> Result<Option<E>> {
        match &event.value {
            Some(bytes) => {
                let node: Node<E> = codec::decode(bytes)?;
                Ok(Some(node.value))
            }
            None => Ok(None),
        }
    }
}

/// Cursor returned by [`NodeStore::iterate`].
pub struct NodeCursor<'a, E> {
    store: &'a NodeStore<E>,
    keys: std::vec::IntoIter<NodeKey>,
    owner: LockOwner,
    lock_timeout: Option<Duration>,
}

impl<E: Element> NodeCursor<'_, E> {
    /// Next stored node, or `None` when the snapshot is exhausted.
    pub async fn next(&mut self) -> Result<Option<(NodeKey, Node<E>)>> {
        for key in self.keys.by_ref() {
            let node = match self.lock_timeout {
                Some(timeout) => {
                    let guard = self.store.lock(&key, self.owner, timeout).await?;
                    let node = self.store.get(&key).await;
                    guard.release().await?;
                    node
                }
                None => self.store.get(&key).await,
            };
            match node? {
                Some(node) => return Ok(Some((key, node))),
                None => trace!(%key, "node vanished since snapshot"),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partcoll_kv::MemoryCluster;

    fn make_store() -> NodeStore<String> {
        let member = MemoryCluster::new().join();
        NodeStore::open(&member, "q", "test:queue:q:nodes")
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let store = make_store();
        let key = NodeKey::new();
        let node = Node::new("a".to_string());

        assert!(!store.exists(&key).await.unwrap());
        assert!(store.insert(&key, &node, Duration::from_secs(1)).await.unwrap());
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(node));
        assert_eq!(store.size().await.unwrap(), 1);

        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_key() {
        let store = make_store();
        let key = NodeKey::new();
        assert!(store
            .insert(&key, &Node::new("a".to_string()), Duration::from_secs(1))
            .await
            .unwrap());
        assert!(!store
            .insert(&key, &Node::new("b".to_string()), Duration::from_secs(1))
            .await
            .unwrap());
        assert_eq!(store.get(&key).await.unwrap().unwrap().value, "a");
    }

    #[tokio::test]
    async fn test_update_keeps_identity() {
        let store = make_store();
        let (a, b) = (NodeKey::new(), NodeKey::new());
        let mut node = Node::new("a".to_string());
        store.insert(&a, &node, Duration::from_secs(1)).await.unwrap();

        node.next = Some(b);
        store.update(&a, &node).await.unwrap();
        assert_eq!(store.get(&a).await.unwrap().unwrap().next, Some(b));
        assert_eq!(store.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_within_deadline() {
        let store = make_store();
        let (a, b) = (NodeKey::new(), NodeKey::new());
        let mut node = Node::new("a".to_string());
        store.insert(&a, &node, Duration::from_secs(1)).await.unwrap();

        node.next = Some(b);
        // an in-memory write finishes on its first poll, so even a zero budget is met
        assert!(store.update_within(&a, &node, Duration::ZERO).await.unwrap());
        assert_eq!(store.get(&a).await.unwrap(), Some(node));
    }

    #[tokio::test]
    async fn test_iterate_skips_deleted() {
        let store = make_store();
        let keys: Vec<NodeKey> = (0..3).map(|_| NodeKey::new()).collect();
        for (i, key) in keys.iter().enumerate() {
            store
                .insert(key, &Node::new(i.to_string()), Duration::from_secs(1))
                .await
                .unwrap();
        }

        let mut cursor = store.iterate(Duration::from_secs(1)).await.unwrap();
        store.delete(&keys[1]).await.unwrap();

        let mut seen = Vec::new();
        while let Some((_, node)) = cursor.next().await.unwrap() {
            seen.push(node.value);
        }
        seen.sort();
        assert_eq!(seen, vec!["0".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_ignores_held_node_locks() {
        let store = make_store();
        let key = NodeKey::new();
        store
            .insert(&key, &Node::new("a".to_string()), Duration::from_secs(1))
            .await
            .unwrap();
        let held = store.lock(&key, LockOwner::new(), Duration::ZERO).await.unwrap();

        let mut locked = store.iterate(Duration::ZERO).await.unwrap();
        assert!(locked.next().await.is_err());

        let mut cursor = store.scan().await.unwrap();
        let (seen, node) = cursor.next().await.unwrap().unwrap();
        assert_eq!(seen, key);
        assert_eq!(node.value, "a");
        assert!(cursor.next().await.unwrap().is_none());
        held.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_node_lock_is_per_node() {
        let store = make_store();
        let (a, b) = (NodeKey::new(), NodeKey::new());
        let _held = store.lock(&a, LockOwner::new(), Duration::ZERO).await.unwrap();
        assert!(store.lock(&a, LockOwner::new(), Duration::ZERO).await.is_err());
        assert!(store.lock(&b, LockOwner::new(), Duration::ZERO).await.is_ok());
    }
}
