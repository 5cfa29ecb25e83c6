//! Hand-over-hand iterator over a [`LinkedQueue`].
//!
//! The iterator holds the lock of the node it last returned plus an anchor:
//! the `HEAD` lock while that node is the head, otherwise the lock of its
//! predecessor. That is enough to unlink the returned node in place. When the
//! walk reaches the tail it releases the tail node's lock, takes `TAIL`, then
//! relocks and re-reads the node. The anchor stays held while it waits on
//! `TAIL`, so anything holding `TAIL` must not wait on a node lock;
//! offer only locks the tail node, which the iterator has just released, and
//! the integrity check reads nodes without locking them.

use std::time::Duration;

use partcoll_kv::LockOwner;
use tracing::{trace, warn};

use crate::codec::Element;
use crate::collection::DistributedCollection;
use crate::error::Result;
use crate::lock::KeyLock;
use crate::node::{Node, NodeKey};
use crate::queue::{LinkedQueue, Slot};

struct Visited<E> {
    key: NodeKey,
    node: Node<E>,
    lock: Option<KeyLock>,
}

/// Iterator returned by [`LinkedQueue::iter`].
///
/// Call [`QueueIter::close`] when done; dropping it releases its locks in the
/// background instead.
pub struct QueueIter<'a, E> {
    queue: &'a LinkedQueue<E>,
    owner: LockOwner,
    lock_timeout: Duration,
    head_lock: Option<KeyLock>,
    tail_lock: Option<KeyLock>,
    anchor: Option<(NodeKey, Node<E>, KeyLock)>,
    last: Option<Visited<E>>,
    cursor: Option<NodeKey>,
}

impl<'a, E: Element> QueueIter<'a, E> {
    pub(crate) async fn open(queue: &'a LinkedQueue<E>, lock_timeout: Duration) -> Result<Self> {
        let owner = LockOwner::new();
        let head_lock = queue.lock_slot(Slot::Head, owner, lock_timeout).await?;
        let cursor = queue.read_slot(Slot::Head).await?;
        let head_lock = match cursor {
            Some(_) => Some(head_lock),
            None => {
                head_lock.release().await?;
                None
            }
        };
        Ok(Self {
            queue,
            owner,
            lock_timeout,
            head_lock,
            tail_lock: None,
            anchor: None,
            last: None,
            cursor,
        })
    }

    /// Next value toward the tail, `None` once the walk is over.
    pub async fn next(&mut self) -> Result<Option<E>> {
        let Some(key) = self.cursor else {
            return Ok(None);
        };
        let queue = self.queue;
        let nodes = queue.nodes();

        let (lock, node) = loop {
            let lock = nodes.lock(&key, self.owner, self.lock_timeout).await?;
            let Some(node) = nodes.get(&key).await? else {
                warn!(queue = queue.name(), %key, "chain truncated, iteration stops");
                lock.release().await?;
                self.cursor = None;
                return Ok(None);
            };
            if node.next.is_none() && self.tail_lock.is_none() {
                lock.release().await?;
                let tail = queue
                    .lock_slot(Slot::Tail, self.owner, self.lock_timeout)
                    .await?;
                self.tail_lock = Some(tail);
                continue;
            }
            break (lock, node);
        };

        // a removed predecessor has no lock left and the anchor already links past it
        if let Some(Visited {
            key: prev_key,
            node: prev_node,
            lock: Some(prev_lock),
        }) = self.last.take()
        {
            if let Some((_, _, old)) = self.anchor.take() {
                old.release().await?;
            } else if let Some(head) = self.head_lock.take() {
                head.release().await?;
            }
            self.anchor = Some((prev_key, prev_node, prev_lock));
        }

        self.cursor = node.next;
        let value = node.value.clone();
        self.last = Some(Visited {
            key,
            node,
            lock: Some(lock),
        });
        Ok(Some(value))
    }

    /// Unlinks and deletes the value last returned by [`QueueIter::next`].
    ///
    /// Returns false if nothing has been returned yet or it was already removed.
    pub async fn remove(&mut self) -> Result<bool> {
        let Some(last) = self.last.as_mut() else {
            return Ok(false);
        };
        if last.lock.is_none() {
            return Ok(false);
        }
        let queue = self.queue;
        let next = last.node.next;

        match self.anchor.as_mut() {
            None => match next {
                Some(next) => queue.write_slot(Slot::Head, next).await?,
                None => {
                    queue.clear_slot(Slot::Head).await?;
                    queue.clear_slot(Slot::Tail).await?;
                }
            },
            Some((anchor_key, anchor_node, _)) => {
                anchor_node.next = next;
                queue.nodes().update(anchor_key, anchor_node).await?;
                if next.is_none() {
                    queue.write_slot(Slot::Tail, *anchor_key).await?;
                }
            }
        }

        queue.nodes().delete(&last.key).await?;
        if let Some(lock) = last.lock.take() {
            lock.release().await?;
        }
        trace!(queue = queue.name(), key = %last.key, "removed through iterator");
        Ok(true)
    }

    /// Releases every lock the iterator holds.
    pub async fn close(self) -> Result<()> {
        if let Some(lock) = self.last.and_then(|v| v.lock) {
            lock.release().await?;
        }
        if let Some((_, _, lock)) = self.anchor {
            lock.release().await?;
        }
        if let Some(lock) = self.tail_lock {
            lock.release().await?;
        }
        if let Some(lock) = self.head_lock {
            lock.release().await?;
        }
        Ok(())
    }
}
