//! Cooperative cancellation for plan runs.
//!
//! A [`CancelToken`] is a cheap clonable flag shared between the caller and
//! the runner. The runner checks it at exactly two points: before starting
//! a layer, and before invoking each job. In-flight provider calls are not
//! interrupted; an adapter that wants to stop early can carry a clone of
//! the same token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag. Cloning shares the flag, not a copy of it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent; never un-cancels.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
