use thiserror::Error;

use crate::types::LockOwner;

/// Errors raised by the distributed map layer.
#[derive(Debug, Error)]
pub enum KvError {
    /// An unlock was attempted by an owner that does not hold the lock.
    #[error("lock on key in map '{map}' is not held by {owner}")]
    NotLockOwner {
        /// Map holding the key
        map: String,
        /// Owner that attempted the unlock
        owner: LockOwner,
    },

    /// The map was destroyed while the handle was still in use.
    #[error("map '{0}' has been destroyed")]
    Destroyed(String),

    /// An internal lock was poisoned by a panicking writer.
    #[error("poisoned state in map '{map}': {reason}")]
    Poisoned {
        /// Map whose state was poisoned
        map: String,
        /// Description of the poisoning
        reason: String,
    },
}

/// Result alias for map operations.
pub type Result<T> = std::result::Result<T, KvError>;
