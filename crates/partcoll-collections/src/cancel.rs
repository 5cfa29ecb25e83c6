//! Cooperative cancellation for the blocking queue operations.
//!
//! `put` and `take` retry until they succeed; a [`CancelToken`] lets the caller's
//! environment stop them between attempts with a distinct cancelled outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Reasons for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelReason {
    /// Explicit user cancellation
    #[default]
    UserRequested,
    /// The caller's own deadline passed
    DeadlineExceeded,
    /// The process is shutting down
    Shutdown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::UserRequested => write!(f, "UserRequested"),
            CancelReason::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            CancelReason::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
    children: Mutex<Vec<Arc<CancelState>>>,
}

impl CancelState {
    fn cancel(&self, reason: CancelReason) {
        if let Ok(mut r) = self.reason.lock() {
            if r.is_none() {
                *r = Some(reason);
            }
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        if let Ok(children) = self.children.lock() {
            for child in children.iter() {
                child.cancel(reason);
            }
        }
    }

    fn reason(&self) -> Option<CancelReason> {
        self.reason.lock().ok().and_then(|r| *r)
    }
}

/// Cloneable view of a cancellation signal, checked between retry attempts.
///
/// A default token is never cancelled.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// True once this token, or an ancestor, has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Why the token was cancelled, if it was.
    pub fn cancelled_reason(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            self.state.reason()
        } else {
            None
        }
    }

    /// Resolves once the token is cancelled, yielding the reason.
    pub async fn cancelled(&self) -> CancelReason {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return self.state.reason().unwrap_or_default();
            }
            notified.await;
        }
    }

    /// Derives a token that follows this one and has its own handle.
    pub fn child(&self) -> (CancelToken, CancelHandle) {
        let state = Arc::new(CancelState::default());
        if let Ok(mut children) = self.state.children.lock() {
            children.push(state.clone());
        }
        if let Some(reason) = self.cancelled_reason() {
            state.cancel(reason);
        }
        (
            CancelToken {
                state: state.clone(),
            },
            CancelHandle { state },
        )
    }
}

/// Fires the cancellation seen by a [`CancelToken`] and its clones.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Cancels the token and all of its children. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        self.state.cancel(reason);
    }

    /// True once the handle has fired.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }
}

/// A fresh token together with the handle that cancels it.
pub fn new_cancel_pair() -> (CancelToken, CancelHandle) {
    let state = Arc::new(CancelState::default());
    (
        CancelToken {
            state: state.clone(),
        },
        CancelHandle { state },
    )
}
