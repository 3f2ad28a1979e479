//! Process-wide cancellation flag for the job currently running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean flag shared between the control API (writer) and the job
/// runner (reader).
///
/// Setting it is idempotent. The runner clears it when a job starts, so a
/// request that arrives while nothing runs has no lasting effect.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of whatever job is running.
    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check and clear in one step. Returns true if a request was pending.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
