//! Cooperative cancellation.
//!
//! A [`CancellationSignal`] is a flag set by the caller (Ctrl+C handler, front
//! end) and polled by the orchestrator and crawler before they start new work.
//! In-flight requests are never interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared handle to a cancellation signal.
pub type SharedCancellation = Arc<CancellationSignal>;

/// Cancellation flag.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    cancelled: AtomicBool,
}

impl CancellationSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an unset signal wrapped in [`Arc`].
    pub fn shared() -> SharedCancellation {
        Arc::new(Self::new())
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Whether an optional signal is set.
pub fn is_cancelled(signal: Option<&CancellationSignal>) -> bool {
    signal.is_some_and(CancellationSignal::is_cancelled)
}
