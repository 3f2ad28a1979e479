//! Wiring of the shared handles that make up a running engine.

use std::path::PathBuf;

use anyhow::Result;

use crate::active::ActiveJobSlot;
use crate::cancel::CancelSignal;
use crate::interrupt::{InterruptReport, interrupt_active};
use crate::io::config::EngineConfig;
use crate::io::store::QueueStore;
use crate::runner::{JobRunner, RunnerSettings};
use crate::worker::Worker;

/// Store, cancellation flag and active-job slot shared by the worker, the
/// control API and the interrupt handler.
#[derive(Debug, Clone)]
pub struct Engine {
    pub store: QueueStore,
    pub cancel: CancelSignal,
    pub active: ActiveJobSlot,
    pub config: EngineConfig,
}

impl Engine {
    pub fn new(jobs_dir: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            store: QueueStore::new(jobs_dir),
            cancel: CancelSignal::new(),
            active: ActiveJobSlot::new(),
            config,
        }
    }

    /// Create the state roots. Failure is fatal at startup.
    pub fn init(&self) -> Result<()> {
        self.store.init()
    }

    pub fn runner(&self) -> JobRunner {
        JobRunner::new(
            self.store.clone(),
            self.cancel.clone(),
            self.active.clone(),
            RunnerSettings::from(&self.config),
        )
    }

    pub fn worker(&self) -> Worker {
        Worker::new(
            self.store.clone(),
            self.runner(),
            self.config.idle_interval(),
        )
    }

    pub fn interrupt(&self) -> Option<InterruptReport> {
        interrupt_active(&self.store, &self.active)
    }
}
