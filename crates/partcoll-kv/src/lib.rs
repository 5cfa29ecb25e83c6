#![warn(missing_docs)]

//! partcoll key-value subsystem: the distributed map contract consumed by the
//! collections, plus an in-process multi-member implementation.

/// Map-layer error type and result alias
pub mod error;
pub mod event;
pub mod map;
pub mod memory;
/// Key, value and identity types shared across the map layer
pub mod types;

pub use error::{KvError, Result};
pub use event::{EntryEvent, EntryEventKind, EntryListener};
pub use map::{DistributedMap, MapProvider};
pub use memory::{MemoryCluster, MemoryMap, MemoryMember};
pub use types::{Key, LockOwner, MemberId, SubscriptionId, Value};
