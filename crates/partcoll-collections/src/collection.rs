//! The collection contract shared by the distributed set and queue.
//!
//! Implementations supply the primitive operations; the bulk operations are
//! provided in terms of them.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::Element;
use crate::error::Result;
use crate::listener::{ItemListener, ListenerRegistration};

/// A named distributed collection of `E`.
#[async_trait]
pub trait DistributedCollection<E: Element>: Send + Sync {
    /// Logical name the collection was opened with.
    fn name(&self) -> &str;

    /// Number of elements. Weakly consistent under concurrent mutation.
    async fn size(&self) -> Result<usize>;

    /// True when the collection holds no elements.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    /// True if some element equals `item`.
    async fn contains(&self, item: &E) -> Result<bool>;

    /// Inserts `item`. Returns true if the collection changed.
    async fn add(&self, item: E) -> Result<bool>;

    /// Removes one element equal to `item`. Returns true if one was removed.
    async fn remove(&self, item: &E) -> Result<bool>;

    /// Copies the current elements out, in iteration order.
    async fn to_vec(&self) -> Result<Vec<E>>;

    /// Removes every element matching `pred`, returning how many were removed.
    async fn remove_if(&self, pred: &(dyn for<'x> Fn(&'x E) -> bool + Send + Sync)) -> Result<usize>;

    /// Removes every element.
    async fn clear(&self) -> Result<()>;

    /// Registers a listener for additions and removals.
    async fn add_item_listener(
        &self,
        listener: Arc<dyn ItemListener<E>>,
        include_value: bool,
    ) -> Result<ListenerRegistration>;

    /// Unregisters a listener. Returns false if any part of it was already gone.
    async fn remove_item_listener(&self, registration: &ListenerRegistration) -> Result<bool>;

    /// Destroys the backing storage. Other handles with the same name see an
    /// empty collection once they reattach.
    async fn destroy(&self) -> Result<()>;

    /// Adds every item of `items` in order, duplicates included; a collection
    /// with set semantics rejects repeats in its own `add`. Returns true if any
    /// add changed the collection.
    async fn add_all(&self, items: &[E]) -> Result<bool> {
        let mut changed = false;
        for item in items {
            if self.add(item.clone()).await? {
                changed = true;
            }
        }
        Ok(changed)
    }

    /// True if every item of `items` is present.
    async fn contains_all(&self, items: &[E]) -> Result<bool> {
        let mut wanted: HashSet<&E> = items.iter().collect();
        if wanted.is_empty() {
            return Ok(true);
        }
        for item in self.to_vec().await? {
            wanted.remove(&item);
            if wanted.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Removes every element contained in `items`. Returns true if any was removed.
    async fn remove_all(&self, items: &[E]) -> Result<bool> {
        let doomed: HashSet<E> = items.iter().cloned().collect();
        Ok(self.remove_if(&|e| doomed.contains(e)).await? > 0)
    }

    /// Keeps only elements contained in `items`. Returns true if any was removed.
    async fn retain_all(&self, items: &[E]) -> Result<bool> {
        let keep: HashSet<E> = items.iter().cloned().collect();
        Ok(self.remove_if(&|e| !keep.contains(e)).await? > 0)
    }
}
