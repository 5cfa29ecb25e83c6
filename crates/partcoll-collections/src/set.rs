//! Distributed set over a backing map.
//!
//! Elements are the map's keys; the value slot holds a presence marker for plain
//! sets, or a payload when another structure (the queue's node store) composes
//! the set.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use partcoll_kv::{DistributedMap, EntryEvent, Key, MapProvider};

use crate::codec::{self, Element};
use crate::collection::DistributedCollection;
use crate::error::Result;
use crate::listener::{self, ItemListener, ListenerRegistration};

const PRESENT: &[u8] = &[1];

/// A distributed set of `E`.
pub struct EntrySet<E> {
    name: String,
    map: Arc<dyn DistributedMap>,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Clone for EntrySet<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            map: self.map.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Element> EntrySet<E> {
    /// Attaches to the set stored in `map_name`, logically called `name`.
    pub fn open(provider: &dyn MapProvider, name: &str, map_name: &str) -> Self {
        Self {
            name: name.to_string(),
            map: provider.get_map(map_name),
            _marker: PhantomData,
        }
    }

    /// The backing map.
    pub(crate) fn backing(&self) -> &Arc<dyn DistributedMap> {
        &self.map
    }

    pub(crate) fn key_of(item: &E) -> Result<Key> {
        codec::encode(item)
    }

    /// Adds `item` with `payload` stored beside it, failing if it is already present.
    pub(crate) async fn insert_with(&self, item: &E, payload: Vec<u8>) -> Result<bool> {
        Ok(self.map.put_if_absent(Self::key_of(item)?, payload).await?)
    }

    /// Adds `item` within `timeout`. Returns false if it was already present or
    /// the store did not finish in time.
    pub async fn add_with_timeout(&self, item: &E, timeout: Duration) -> Result<bool> {
        let key = Self::key_of(item)?;
        match tokio::time::timeout(timeout, self.map.put_if_absent(key, PRESENT.to_vec())).await {
            Ok(res) => Ok(res?),
            Err(_) => Ok(false),
        }
    }

    /// Snapshot iterator over the current members.
    ///
    /// Members added or removed after the snapshot may or may not be seen by
    /// other readers; the snapshot itself is fixed.
    pub async fn iter(&self) -> Result<SetIter<E>> {
        Ok(SetIter {
            keys: self.map.keys().await?.into_iter(),
            _marker: PhantomData,
        })
    }

    fn extract(event: &EntryEvent) -> Result<Option<E>> {
        codec::decode(&event.key).map(Some)
    }
}

#[async_trait]
impl<E: Element> DistributedCollection<E> for EntrySet<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.map.size().await?)
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.map.size().await? == 0)
    }

    async fn contains(&self, item: &E) -> Result<bool> {
        Ok(self.map.contains_key(&Self::key_of(item)?).await?)
    }

    async fn add(&self, item: E) -> Result<bool> {
        self.insert_with(&item, PRESENT.to_vec()).await
    }

    async fn remove(&self, item: &E) -> Result<bool> {
        Ok(self.map.remove(&Self::key_of(item)?).await?.is_some())
    }

    async fn to_vec(&self) -> Result<Vec<E>> {
        self.iter().await?.collect()
    }

    async fn remove_if(&self, pred: &(dyn for<'x> Fn(&'x E) -> bool + Send + Sync)) -> Result<usize> {
        let mut removed = 0;
        for key in self.map.keys().await? {
            let item: E = codec::decode(&key)?;
            if pred(&item) && self.map.remove(&key).await?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        Ok(self.map.clear().await?)
    }

    async fn add_item_listener(
        &self,
        listener: Arc<dyn ItemListener<E>>,
        _include_value: bool,
    ) -> Result<ListenerRegistration> {
        // the item is the entry key, so events never need the value slot
        listener::register(&self.map, &self.name, listener, false, Self::extract).await
    }

    async fn remove_item_listener(&self, registration: &ListenerRegistration) -> Result<bool> {
        listener::unregister(&self.map, registration).await
    }

    async fn destroy(&self) -> Result<()> {
        Ok(self.map.destroy().await?)
    }
}

/// Iterator over a key snapshot of an [`EntrySet`].
pub struct SetIter<E> {
    keys: std::vec::IntoIter<Key>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Element> Iterator for SetIter<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.keys.next().map(|k| codec::decode(&k))
    }
}
