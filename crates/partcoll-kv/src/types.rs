use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Key type for distributed maps.
pub type Key = Vec<u8>;
/// Value type for distributed maps.
pub type Value = Vec<u8>;

/// Identifies a cluster member (the originator of entry events).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(Uuid);

impl MemberId {
    /// Creates a fresh random member id
    pub fn new() -> Self {
        MemberId(Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Holder identity for per-key locks.
///
/// Async tasks migrate between threads, so lock ownership is tied to an explicit
/// token rather than to the calling thread. One logical operation (an offer, a
/// poll, an iterator) uses one owner for every lock it takes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOwner(Uuid);

impl LockOwner {
    /// Creates a fresh random lock owner
    pub fn new() -> Self {
        LockOwner(Uuid::new_v4())
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one entry-listener subscription on a map.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a fresh random subscription id
    pub fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
