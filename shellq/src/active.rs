//! The single job currently owned by the engine.
//!
//! The runner and the interrupt handler both want to file the active job in
//! a terminal state. Whoever calls [`ActiveJobSlot::claim`] first gets the
//! job and performs the move while holding the lock; the other side sees an
//! empty slot and leaves the files alone.
//!
//! [`ActiveJobSlot::shut_down`] claims and closes the slot in one step. A
//! closed slot refuses [`ActiveJobSlot::begin`], so nothing new starts once
//! the interrupt handler has run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::core::types::Job;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveJob {
    #[serde(flatten)]
    pub job: Job,
    /// Child pid (also its process group id); `None` until spawned.
    pub pid: Option<u32>,
}

#[derive(Debug, Default)]
struct SlotState {
    active: Option<ActiveJob>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ActiveJobSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl ActiveJobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `job` as the one running now. False once the slot is closed.
    pub fn begin(&self, job: Job) -> bool {
        let mut guard = self.lock();
        if guard.closed {
            return false;
        }
        guard.active = Some(ActiveJob { job, pid: None });
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Run `f` under the lock if a job is still active. Returns `None` if it
    /// has been claimed already.
    pub fn with_active<T>(&self, f: impl FnOnce(&mut ActiveJob) -> T) -> Option<T> {
        let mut guard = self.lock();
        guard.active.as_mut().map(f)
    }

    /// Record the child pid. False if the job was claimed before spawn.
    pub fn set_pid(&self, pid: Option<u32>) -> bool {
        self.with_active(|active| active.pid = pid).is_some()
    }

    /// Copy of the active job, if any.
    pub fn current(&self) -> Option<ActiveJob> {
        self.lock().active.clone()
    }

    /// Take the active job and run `f` with it while still holding the lock.
    pub fn claim<T>(&self, f: impl FnOnce(ActiveJob) -> T) -> Option<T> {
        let mut guard = self.lock();
        let active = guard.active.take()?;
        Some(f(active))
    }

    /// Close the slot, then claim whatever job was active, all under one lock.
    pub fn shut_down<T>(&self, f: impl FnOnce(ActiveJob) -> T) -> Option<T> {
        let mut guard = self.lock();
        guard.closed = true;
        let active = guard.active.take()?;
        Some(f(active))
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // A panic while filing a job must not wedge shutdown.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
