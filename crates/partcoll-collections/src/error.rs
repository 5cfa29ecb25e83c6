use partcoll_kv::KvError;
use thiserror::Error;

use crate::cancel::CancelReason;

/// Errors raised by the distributed collections.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// A per-key lock could not be acquired before the caller's deadline.
    #[error("timed out waiting for lock on {key} in map '{map}'")]
    LockTimeout {
        /// Backing map holding the key
        map: String,
        /// Printable form of the contended key
        key: String,
    },

    /// A blocking wait was cancelled by the caller's environment.
    #[error("operation cancelled: {0}")]
    Cancelled(CancelReason),

    /// The collection holds no element to return.
    #[error("collection '{0}' is empty")]
    Empty(String),

    /// The queue's links contradict each other in a way the operation cannot repair.
    #[error("corrupt chain in queue '{queue}': {detail}")]
    CorruptChain {
        /// Logical queue name
        queue: String,
        /// What was found
        detail: String,
    },

    /// An element or node could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A listener registration token could not be parsed.
    #[error("invalid listener registration: {0}")]
    InvalidRegistration(String),

    /// The backing store failed.
    #[error(transparent)]
    Kv(#[from] KvError),
}

impl From<bincode::Error> for CollectionError {
    fn from(e: bincode::Error) -> Self {
        CollectionError::Codec(e.to_string())
    }
}

/// Result alias for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;
