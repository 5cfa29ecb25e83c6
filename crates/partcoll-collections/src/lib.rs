#![warn(missing_docs)]

//! partcoll collections subsystem: a distributed FIFO queue and set built on a
//! locked, partitioned key-value store.

pub mod cancel;
pub mod codec;
pub mod collection;
/// Collection tunables and backing map naming
pub mod config;
pub mod deadline;
/// Error types for collection operations
pub mod error;
pub mod instance;
pub mod integrity;
pub mod iter;
pub mod listener;
pub(crate) mod lock;
pub mod node;
pub mod queue;
pub mod set;

pub use cancel::{new_cancel_pair, CancelHandle, CancelReason, CancelToken};
pub use codec::Element;
pub use collection::DistributedCollection;
pub use config::CollectionConfig;
pub use deadline::Deadline;
pub use error::{CollectionError, Result};
pub use instance::Collections;
pub use integrity::{IntegrityFinding, IntegrityIssue, IntegrityReport, IntegritySeverity};
pub use iter::QueueIter;
pub use listener::{ItemEvent, ItemEventKind, ItemListener, ListenerRegistration};
pub use node::{Node, NodeKey, NodeStore};
pub use queue::LinkedQueue;
pub use set::{EntrySet, SetIter};
