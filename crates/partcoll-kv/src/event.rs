//! Entry-level change notifications.

use serde::{Deserialize, Serialize};

use crate::types::{Key, MemberId, Value};

/// Kind of change an entry event reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryEventKind {
    /// A key that was absent got a value.
    Added,
    /// An existing key got a new value.
    Updated,
    /// A key was removed.
    Removed,
}

/// A change to one entry of a map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryEvent {
    /// Name of the map the change happened in
    pub map: String,
    /// What happened
    pub kind: EntryEventKind,
    /// Affected key
    pub key: Key,
    /// New value for Added/Updated, removed value for Removed.
    /// `None` when the subscription did not ask for values.
    pub value: Option<Value>,
    /// Member that made the change
    pub member: MemberId,
}

/// Receives entry events for the kind it was registered for.
///
/// Callbacks run on the mutating caller's task and must not block.
pub trait EntryListener: Send + Sync {
    /// Called once per matching change.
    fn on_entry(&self, event: &EntryEvent);
}

impl<F> EntryListener for F
where
    F: Fn(&EntryEvent) + Send + Sync,
{
    fn on_entry(&self, event: &EntryEvent) {
        self(event)
    }
}
