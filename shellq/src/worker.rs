//! The engine's single worker: alternates between idle polling and running
//! exactly one job.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::types::Job;
use crate::io::loader::get_next_job;
use crate::io::store::{QueueStore, Transition};
use crate::runner::{JobRunner, RunReport};

/// Result of one worker cycle.
#[derive(Debug)]
pub enum Cycle {
    /// Nothing eligible (or the loader failed); the caller should sleep.
    Idle,
    /// The engine has shut down; nothing was loaded.
    Stopped,
    Ran(RunReport),
    /// The runner errored and the job was forced to `failed/` if possible.
    ForcedFail {
        job: Job,
        error: String,
        filed: Option<Transition>,
    },
}

#[derive(Debug, Clone)]
pub struct Worker {
    store: QueueStore,
    runner: JobRunner,
    idle_interval: Duration,
}

impl Worker {
    pub fn new(store: QueueStore, runner: JobRunner, idle_interval: Duration) -> Self {
        Self {
            store,
            runner,
            idle_interval,
        }
    }

    /// Load at most one job and run it to a terminal state.
    pub async fn run_once(&self) -> Cycle {
        if self.runner.is_shut_down() {
            return Cycle::Stopped;
        }
        let job = match get_next_job(&self.store) {
            Ok(Some(job)) => job,
            Ok(None) => return Cycle::Idle,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "loader failed");
                return Cycle::Idle;
            }
        };

        match self.runner.run_job(&job).await {
            Ok(report) => Cycle::Ran(report),
            Err(err) => {
                error!(job = %job, err = %err, "job run failed; forcing to failed");
                let filed = self.runner.force_fail(&job, &err);
                Cycle::ForcedFail {
                    job,
                    error: err.to_string(),
                    filed,
                }
            }
        }
    }

    /// Run until `shutdown` fires or the interrupt handler closes the slot.
    /// A job in flight is left to the interrupt handler.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(root = %self.store.root().display(), "worker started");
        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Cycle::Idle => {
                    debug!(interval = ?self.idle_interval, "no eligible job");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.idle_interval) => {}
                    }
                }
                Cycle::Stopped => break,
                Cycle::Ran(_) | Cycle::ForcedFail { .. } => {}
            }
        }
        info!("worker stopped");
    }
}
