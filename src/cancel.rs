//! Process-wide cancellation token.
//!
//! Polled at safe points: before each voter iteration, before each
//! orchestrator phase, and between per-function generations. Cancellation is
//! observed cooperatively; in-flight LLM calls are abandoned, not killed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag shared between the control loop and callers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag for a new task.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
