//! Deadline tracking across the multi-step locking protocol.
//!
//! An offer or poll takes several locks in turn; every wait is bounded by what
//! is left of the caller's timeout.

use std::time::Duration;

use tokio::time::Instant;

/// Absolute deadline derived from a caller-supplied timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    expiry: Instant,
}

impl Deadline {
    /// Creates a new deadline from now + timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            expiry: Instant::now() + timeout,
        }
    }

    /// Returns the remaining time until the deadline expires.
    ///
    /// Returns `None` if the deadline has already expired.
    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        if self.expiry > now {
            Some(self.expiry - now)
        } else {
            None
        }
    }

    /// Remaining time, or zero once expired. A zero wait still makes one
    /// immediate attempt.
    pub fn remaining_or_zero(&self) -> Duration {
        self.remaining().unwrap_or(Duration::ZERO)
    }
}
