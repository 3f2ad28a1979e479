//! Engine-level interrupt: stop the active job and file it as failed.

use tracing::{error, info, warn};

use crate::active::ActiveJobSlot;
use crate::core::state::JobState;
use crate::core::types::Job;
use crate::io::process::kill_group;
use crate::io::store::{QueueStore, StoreError, Transition};

#[derive(Debug)]
pub struct InterruptReport {
    pub job: Job,
    pub moved: Result<Transition, StoreError>,
}

/// Kill the active job's process group and move its files to `failed/`.
///
/// The slot is closed first, so the worker cannot start another job
/// afterwards. Returns `None` when no job was active (or the runner filed it
/// first). Output already teed to the log is kept.
pub fn interrupt_active(store: &QueueStore, active: &ActiveJobSlot) -> Option<InterruptReport> {
    active.shut_down(|current| {
        let job = current.job;
        if let Some(pid) = current.pid {
            info!(job = %job, pid, "interrupt: killing job");
            if let Err(err) = kill_group(pid) {
                warn!(job = %job, pid, err = %err, "failed to kill job process group");
            }
        }
        let moved = store.transition(&job, JobState::Running, JobState::Failed);
        match &moved {
            Ok(_) => info!(job = %job, "interrupt: job moved to failed"),
            Err(err) => error!(job = %job, err = %err, "interrupt: job left under running"),
        }
        InterruptReport { job, moved }
    })
}
