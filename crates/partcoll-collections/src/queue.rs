//! Distributed FIFO queue as a singly-linked chain of store entries.
//!
//! The chain's nodes live in a node map (see [`crate::node`]); the `HEAD` and
//! `TAIL` pointers live in a separate metadata map so that locking the queue's
//! ends never contends with locking an interior node.
//!
//! Lock protocol:
//! - offer locks `TAIL`, then the current tail node, inserts the new node, links
//!   it, and only then moves `TAIL`.
//! - poll locks `HEAD`, then the head node, moves `HEAD` (clearing `HEAD` before
//!   `TAIL` when the queue empties) and deletes the node.
//! - every holder takes locks in the order `HEAD`, `TAIL`, nodes.
//!
//! Offer and poll on a queue with two or more elements touch disjoint keys and
//! do not contend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use partcoll_kv::{DistributedMap, LockOwner, MapProvider};
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::codec::{self, Element};
use crate::collection::DistributedCollection;
use crate::config::CollectionConfig;
use crate::deadline::Deadline;
use crate::error::{CollectionError, Result};
use crate::iter::QueueIter;
use crate::listener::{ItemListener, ListenerRegistration};
use crate::lock::KeyLock;
use crate::node::{Node, NodeKey, NodeStore};

/// One of the two metadata slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    Head,
    Tail,
}

impl Slot {
    fn key(self) -> &'static [u8] {
        match self {
            Slot::Head => b"HEAD",
            Slot::Tail => b"TAIL",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Slot::Head => "HEAD",
            Slot::Tail => "TAIL",
        }
    }
}

/// A distributed, unbounded FIFO queue of `E`.
pub struct LinkedQueue<E> {
    name: String,
    nodes: NodeStore<E>,
    meta: Arc<dyn DistributedMap>,
    config: CollectionConfig,
}

impl<E: Element> LinkedQueue<E> {
    /// Attaches to the queue called `name`.
    ///
    /// Backing maps are derived from the name, so every handle opened with the
    /// same name and prefix shares the same queue.
    pub fn open(provider: &dyn MapProvider, name: &str, config: CollectionConfig) -> Self {
        let nodes = NodeStore::open(provider, name, &config.queue_nodes_map_name(name));
        let meta = provider.get_map(&config.queue_meta_map_name(name));
        Self {
            name: name.to_string(),
            nodes,
            meta,
            config,
        }
    }

    pub(crate) fn nodes(&self) -> &NodeStore<E> {
        &self.nodes
    }

    pub(crate) fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub(crate) async fn read_slot(&self, slot: Slot) -> Result<Option<NodeKey>> {
        match self.meta.get(slot.key()).await? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_slot(&self, slot: Slot, key: NodeKey) -> Result<()> {
        self.meta
            .put(slot.key().to_vec(), codec::encode(&key)?)
            .await?;
        Ok(())
    }

    pub(crate) async fn clear_slot(&self, slot: Slot) -> Result<()> {
        self.meta.remove(slot.key()).await?;
        Ok(())
    }

    pub(crate) async fn lock_slot(
        &self,
        slot: Slot,
        owner: LockOwner,
        timeout: Duration,
    ) -> Result<KeyLock> {
        KeyLock::acquire(&self.meta, slot.key().to_vec(), slot.label(), owner, timeout).await
    }

    /// Appends `value` as the new tail, waiting at most `timeout` for locks.
    ///
    /// Returns false, with the queue unchanged, if a lock could not be taken in time.
    pub async fn offer(&self, value: E, timeout: Duration) -> Result<bool> {
        match self.try_offer(value, Deadline::new(timeout)).await {
            Ok(Some(key)) => {
                trace!(queue = %self.name, %key, "offered");
                Ok(true)
            }
            Ok(None) => {
                debug!(queue = %self.name, "offer ran out of time storing the node");
                Ok(false)
            }
            Err(CollectionError::LockTimeout { map, key }) => {
                debug!(queue = %self.name, %map, %key, "offer timed out waiting for lock");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_offer(&self, value: E, deadline: Deadline) -> Result<Option<NodeKey>> {
        let owner = LockOwner::new();
        let tail_lock = self
            .lock_slot(Slot::Tail, owner, deadline.remaining_or_zero())
            .await?;
        let key = NodeKey::new();
        let node = Node::new(value);

        if let Some(old_tail) = self.read_slot(Slot::Tail).await? {
            let old_lock = self
                .nodes
                .lock(&old_tail, owner, deadline.remaining_or_zero())
                .await?;
            match self.nodes.get(&old_tail).await? {
                Some(mut old) => {
                    if old.next.is_some() {
                        return Err(CollectionError::CorruptChain {
                            queue: self.name.clone(),
                            detail: format!("tail {} already has a successor", old_tail),
                        });
                    }
                    if !self
                        .nodes
                        .insert(&key, &node, deadline.remaining_or_zero())
                        .await?
                    {
                        return Ok(None);
                    }
                    old.next = Some(key);
                    if !self
                        .nodes
                        .update_within(&old_tail, &old, deadline.remaining_or_zero())
                        .await?
                    {
                        // the missed write may still land, so unlink before dropping the node
                        old.next = None;
                        self.nodes.update(&old_tail, &old).await?;
                        self.nodes.delete(&key).await?;
                        return Ok(None);
                    }
                    self.write_slot(Slot::Tail, key).await?;
                    old_lock.release().await?;
                    tail_lock.release().await?;
                    return Ok(Some(key));
                }
                None => {
                    // a poll consumed the last node after TAIL was read; it
                    // cleared both slots, so start a fresh chain
                    trace!(queue = %self.name, %old_tail, "tail consumed concurrently");
                    old_lock.release().await?;
                }
            }
        }

        let new_lock = self
            .nodes
            .lock(&key, owner, deadline.remaining_or_zero())
            .await?;
        if !self
            .nodes
            .insert(&key, &node, deadline.remaining_or_zero())
            .await?
        {
            return Ok(None);
        }
        self.write_slot(Slot::Head, key).await?;
        self.write_slot(Slot::Tail, key).await?;
        new_lock.release().await?;
        tail_lock.release().await?;
        Ok(Some(key))
    }

    /// Appends `value`, retrying until it succeeds or `cancel` fires.
    pub async fn put(&self, value: E, cancel: &CancelToken) -> Result<()> {
        loop {
            if let Some(reason) = cancel.cancelled_reason() {
                return Err(CollectionError::Cancelled(reason));
            }
            if self.offer(value.clone(), self.config.retry_attempt()).await? {
                return Ok(());
            }
            self.pause(cancel).await?;
        }
    }

    /// Removes and returns the head, waiting at most `timeout` for locks.
    ///
    /// `Ok(None)` means the queue was empty; a lock that could not be taken in
    /// time is reported as [`CollectionError::LockTimeout`].
    pub async fn poll(&self, timeout: Duration) -> Result<Option<E>> {
        let deadline = Deadline::new(timeout);
        let owner = LockOwner::new();
        let head_lock = self
            .lock_slot(Slot::Head, owner, deadline.remaining_or_zero())
            .await?;

        let Some(head) = self.read_slot(Slot::Head).await? else {
            head_lock.release().await?;
            return Ok(None);
        };

        let node_lock = self
            .nodes
            .lock(&head, owner, deadline.remaining_or_zero())
            .await?;
        let Some(node) = self.nodes.get(&head).await? else {
            warn!(queue = %self.name, %head, "head node missing, truncating chain");
            self.clear_slot(Slot::Head).await?;
            self.clear_slot(Slot::Tail).await?;
            node_lock.release().await?;
            head_lock.release().await?;
            return Ok(None);
        };

        match node.next {
            Some(next) => self.write_slot(Slot::Head, next).await?,
            None => {
                self.clear_slot(Slot::Head).await?;
                self.clear_slot(Slot::Tail).await?;
            }
        }
        self.nodes.delete(&head).await?;
        node_lock.release().await?;
        head_lock.release().await?;
        trace!(queue = %self.name, %head, "polled");
        Ok(Some(node.value))
    }

    /// Removes and returns the head, waiting until one arrives or `cancel` fires.
    pub async fn take(&self, cancel: &CancelToken) -> Result<E> {
        loop {
            if let Some(reason) = cancel.cancelled_reason() {
                return Err(CollectionError::Cancelled(reason));
            }
            match self.poll(self.config.retry_attempt()).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) | Err(CollectionError::LockTimeout { .. }) => {}
                Err(e) => return Err(e),
            }
            self.pause(cancel).await?;
        }
    }

    async fn pause(&self, cancel: &CancelToken) -> Result<()> {
        let max_ms = self.config.retry_backoff().as_millis() as u64;
        let wait = Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
        tokio::select! {
            reason = cancel.cancelled() => Err(CollectionError::Cancelled(reason)),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// The head value without removing it, `None` if empty.
    pub async fn peek(&self) -> Result<Option<E>> {
        let owner = LockOwner::new();
        let head_lock = self
            .lock_slot(Slot::Head, owner, self.config.lock_timeout())
            .await?;
        let value = match self.read_slot(Slot::Head).await? {
            Some(head) => self.nodes.get(&head).await?.map(|n| n.value),
            None => None,
        };
        head_lock.release().await?;
        Ok(value)
    }

    /// The head value without removing it; fails with `Empty` if there is none.
    pub async fn element(&self) -> Result<E> {
        self.peek()
            .await?
            .ok_or_else(|| CollectionError::Empty(self.name.clone()))
    }

    /// Removes and returns the head; fails with `Empty` if there is none.
    pub async fn remove_head(&self) -> Result<E> {
        self.poll(self.config.default_timeout())
            .await?
            .ok_or_else(|| CollectionError::Empty(self.name.clone()))
    }

    /// Moves up to `max` elements into `out`, in FIFO order.
    pub async fn drain_to(&self, out: &mut Vec<E>, max: usize) -> Result<usize> {
        let mut moved = 0;
        while moved < max {
            match self.poll(self.config.lock_timeout()).await? {
                Some(value) => {
                    out.push(value);
                    moved += 1;
                }
                None => break,
            }
        }
        Ok(moved)
    }

    /// Capacity left; the queue is unbounded.
    pub fn remaining_capacity(&self) -> usize {
        usize::MAX
    }

    /// Lock-aware iterator from `HEAD` to the tail.
    pub async fn iter(&self) -> Result<QueueIter<'_, E>> {
        QueueIter::open(self, self.config.lock_timeout()).await
    }
}

#[async_trait]
impl<E: Element> DistributedCollection<E> for LinkedQueue<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn size(&self) -> Result<usize> {
        self.nodes.size().await
    }

    async fn contains(&self, item: &E) -> Result<bool> {
        let mut it = self.iter().await?;
        let mut found = false;
        while let Some(value) = it.next().await? {
            if &value == item {
                found = true;
                break;
            }
        }
        it.close().await?;
        Ok(found)
    }

    async fn add(&self, item: E) -> Result<bool> {
        self.offer(item, self.config.default_timeout()).await
    }

    async fn remove(&self, item: &E) -> Result<bool> {
        let mut it = self.iter().await?;
        let mut removed = false;
        while let Some(value) = it.next().await? {
            if &value == item {
                removed = it.remove().await?;
                break;
            }
        }
        it.close().await?;
        Ok(removed)
    }

    async fn to_vec(&self) -> Result<Vec<E>> {
        let mut it = self.iter().await?;
        let mut out = Vec::new();
        while let Some(value) = it.next().await? {
            out.push(value);
        }
        it.close().await?;
        Ok(out)
    }

    async fn remove_if(&self, pred: &(dyn for<'x> Fn(&'x E) -> bool + Send + Sync)) -> Result<usize> {
        let mut it = self.iter().await?;
        let mut removed = 0;
        while let Some(value) = it.next().await? {
            if pred(&value) && it.remove().await? {
                removed += 1;
            }
        }
        it.close().await?;
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let mut drained = 0usize;
        while self.poll(self.config.default_timeout()).await?.is_some() {
            drained += 1;
        }
        debug!(queue = %self.name, drained, "cleared");
        Ok(())
    }

    async fn add_item_listener(
        &self,
        listener: Arc<dyn ItemListener<E>>,
        include_value: bool,
    ) -> Result<ListenerRegistration> {
        self.nodes
            .add_item_listener(&self.name, listener, include_value)
            .await
    }

    async fn remove_item_listener(&self, registration: &ListenerRegistration) -> Result<bool> {
        self.nodes.remove_item_listener(registration).await
    }

    async fn destroy(&self) -> Result<()> {
        self.nodes.destroy().await?;
        self.meta.destroy().await?;
        debug!(queue = %self.name, "destroyed");
        Ok(())
    }
}
