//! Item-level listeners adapted from the backing map's entry events.
//!
//! A collection listener becomes two entry subscriptions on the backing map,
//! one for additions and one for removals. The pair is returned as a
//! [`ListenerRegistration`] so unregistering removes exactly those two.

use std::marker::PhantomData;
use std::sync::Arc;

use partcoll_kv::{DistributedMap, EntryEvent, EntryEventKind, EntryListener, MemberId, SubscriptionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::Element;
use crate::error::{CollectionError, Result};

/// Kind of item-level change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemEventKind {
    /// An item entered the collection.
    Added,
    /// An item left the collection.
    Removed,
}

/// An item entering or leaving a collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemEvent<E> {
    /// Logical name of the collection
    pub source: String,
    /// What happened
    pub kind: ItemEventKind,
    /// The item, when the listener was registered with values
    pub item: Option<E>,
    /// Member that made the change
    pub member: MemberId,
}

/// Receives item events from a collection.
pub trait ItemListener<E>: Send + Sync {
    /// An item was added.
    fn item_added(&self, event: ItemEvent<E>);
    /// An item was removed.
    fn item_removed(&self, event: ItemEvent<E>);
}

/// Token for an item listener: the two underlying entry subscriptions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerRegistration {
    /// Subscription delivering additions
    pub added: SubscriptionId,
    /// Subscription delivering removals
    pub removed: SubscriptionId,
}

impl ListenerRegistration {
    /// Serializes the registration for handing across process boundaries.
    pub fn to_token(&self) -> String {
        // two UUIDs always serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a token produced by [`ListenerRegistration::to_token`].
    pub fn from_token(token: &str) -> Result<Self> {
        serde_json::from_str(token).map_err(|e| CollectionError::InvalidRegistration(e.to_string()))
    }
}

/// Pulls the item out of an entry event.
pub(crate) type Extract<E> = fn(&EntryEvent) -> Result<Option<E>>;

struct ItemAdapter<E> {
    source: String,
    kind: ItemEventKind,
    listener: Arc<dyn ItemListener<E>>,
    extract: Extract<E>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Element> EntryListener for ItemAdapter<E> {
    fn on_entry(&self, event: &EntryEvent) {
        let item = match (self.extract)(event) {
            Ok(item) => item,
            Err(e) => {
                warn!(source = %self.source, "dropping undecodable item event: {}", e);
                return;
            }
        };
        let item_event = ItemEvent {
            source: self.source.clone(),
            kind: self.kind,
            item,
            member: event.member,
        };
        match self.kind {
            ItemEventKind::Added => self.listener.item_added(item_event),
            ItemEventKind::Removed => self.listener.item_removed(item_event),
        }
    }
}

/// Subscribes `listener` to additions and removals on `map`.
pub(crate) async fn register<E: Element>(
    map: &Arc<dyn DistributedMap>,
    source: &str,
    listener: Arc<dyn ItemListener<E>>,
    include_value: bool,
    extract: Extract<E>,
) -> Result<ListenerRegistration> {
    let adapter = |kind| {
        Arc::new(ItemAdapter {
            source: source.to_string(),
            kind,
            listener: listener.clone(),
            extract,
            _marker: PhantomData,
        }) as Arc<dyn EntryListener>
    };

    let added = map
        .add_entry_listener(EntryEventKind::Added, adapter(ItemEventKind::Added), include_value)
        .await?;
    let removed = match map
        .add_entry_listener(
            EntryEventKind::Removed,
            adapter(ItemEventKind::Removed),
            include_value,
        )
        .await
    {
        Ok(id) => id,
        Err(e) => {
            map.remove_entry_listener(added).await?;
            return Err(e.into());
        }
    };

    debug!(source, %added, %removed, "item listener registered");
    Ok(ListenerRegistration { added, removed })
}

/// Removes both subscriptions of `registration`.
///
/// Both removals are attempted; the result is true only if both existed.
pub(crate) async fn unregister(
    map: &Arc<dyn DistributedMap>,
    registration: &ListenerRegistration,
) -> Result<bool> {
    let added = map.remove_entry_listener(registration.added).await;
    let removed = map.remove_entry_listener(registration.removed).await;
    match (added, removed) {
        (Ok(added), Ok(removed)) => Ok(added && removed),
        (Err(e), _) | (_, Err(e)) => {
            warn!(map = map.name(), "listener removal failed: {}", e);
            Err(e.into())
        }
    }
}
