//! Runs one job from `running/` to a terminal state.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::active::ActiveJobSlot;
use crate::cancel::CancelSignal;
use crate::core::classifier::classify;
use crate::core::state::JobState;
use crate::core::types::{Job, Outcome};
use crate::io::config::EngineConfig;
use crate::io::process::{ProcessError, ProcessSpec, run_streaming};
use crate::io::store::{QueueStore, StoreError, Transition};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("write log {}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
        lines: Vec<String>,
    },
    #[error("file job as {outcome}")]
    File {
        outcome: Outcome,
        #[source]
        source: StoreError,
    },
}

impl RunError {
    /// Output captured before the error, if any.
    pub fn partial_output(&self) -> &[String] {
        match self {
            RunError::Process(err) => err.lines(),
            RunError::Log { lines, .. } => lines,
            RunError::File { .. } => &[],
        }
    }
}

/// Where the job's files ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Filed(Transition),
    /// The interrupt handler claimed the job first and filed it as failed.
    Preempted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub job: Job,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub lines: Vec<String>,
    pub disposition: Disposition,
}

/// Runner knobs derived from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub shell: String,
    pub poll_interval: Duration,
    pub terminate_grace: Duration,
    pub drain_grace: Duration,
}

impl From<&EngineConfig> for RunnerSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            shell: cfg.shell.clone(),
            poll_interval: cfg.output_poll(),
            terminate_grace: cfg.terminate_grace(),
            drain_grace: cfg.drain_grace(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    store: QueueStore,
    cancel: CancelSignal,
    active: ActiveJobSlot,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: QueueStore,
        cancel: CancelSignal,
        active: ActiveJobSlot,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            cancel,
            active,
            settings,
        }
    }

    /// Execute a job already under `running/` and file it by outcome.
    ///
    /// A nonzero exit is an ordinary `Failed` outcome, not an error. Errors
    /// are reserved for launch and I/O problems; on error the job is still
    /// under `running/` and [`JobRunner::force_fail`] should be called.
    ///
    /// If the engine has shut down, the job is filed as failed without
    /// being started.
    pub async fn run_job(&self, job: &Job) -> Result<RunReport, RunError> {
        self.cancel.clear();
        if !self.active.begin(job.clone()) {
            return self.refuse(job);
        }

        let script = self.store.script_path(JobState::Running, job);
        let log_path = self.store.log_path(JobState::Running, job);
        let tee = match self.active.with_active(|_| File::create(&log_path)) {
            None => return Ok(preempted(job, None, Vec::new())),
            Some(Ok(file)) => Some(file),
            Some(Err(err)) => {
                warn!(job = %job, err = %err, "cannot open log for streaming; buffering only");
                None
            }
        };

        info!(job = %job, shell = %self.settings.shell, "job started");
        let spec = ProcessSpec {
            shell: &self.settings.shell,
            script: &script,
            poll_interval: self.settings.poll_interval,
            terminate_grace: self.settings.terminate_grace,
            drain_grace: self.settings.drain_grace,
        };
        let output = run_streaming(&spec, tee, &self.cancel, |pid| self.active.set_pid(pid)).await?;

        let outcome = classify(output.canceled, output.exit_code);
        let filed = self
            .active
            .claim(|_| self.file(job, outcome, &output.lines));
        let disposition = match filed {
            None => {
                info!(job = %job, "job was filed by the interrupt handler");
                return Ok(preempted(job, output.exit_code, output.lines));
            }
            Some(result) => Disposition::Filed(result?),
        };

        info!(job = %job, %outcome, exit_code = ?output.exit_code, "job finished");
        Ok(RunReport {
            job: job.clone(),
            outcome,
            exit_code: output.exit_code,
            lines: output.lines,
            disposition,
        })
    }

    /// True once the interrupt handler has closed the active-job slot.
    pub fn is_shut_down(&self) -> bool {
        self.active.is_closed()
    }

    fn refuse(&self, job: &Job) -> Result<RunReport, RunError> {
        warn!(job = %job, "engine shut down; job filed as failed without running");
        let lines = vec!["shellq: engine shut down before the job started".to_string()];
        let moved = self.file(job, Outcome::Failed, &lines)?;
        Ok(RunReport {
            job: job.clone(),
            outcome: Outcome::Failed,
            exit_code: None,
            lines,
            disposition: Disposition::Filed(moved),
        })
    }

    /// Best-effort: record `err` in the job's log and move it to `failed/`.
    ///
    /// Does nothing if the job is no longer active (already filed).
    pub fn force_fail(&self, job: &Job, err: &RunError) -> Option<Transition> {
        self.active
            .claim(|_| {
                let mut lines = err.partial_output().to_vec();
                lines.push(format!("shellq: {}", error_chain(err)));
                let log_path = self.store.log_path(JobState::Running, job);
                if let Err(log_err) = fs::write(&log_path, join_lines(&lines)) {
                    warn!(job = %job, err = %log_err, "cannot write failure log");
                }
                match self.store.transition(job, JobState::Running, JobState::Failed) {
                    Ok(moved) => Some(moved),
                    Err(move_err) => {
                        error!(job = %job, err = %move_err, "cannot move job to failed; left under running");
                        None
                    }
                }
            })
            .flatten()
    }

    /// Write the final log and move the job. Runs under the slot lock, or
    /// after the slot has closed.
    fn file(&self, job: &Job, outcome: Outcome, lines: &[String]) -> Result<Transition, RunError> {
        let log_path = self.store.log_path(JobState::Running, job);
        if let Err(source) = fs::write(&log_path, join_lines(lines)) {
            if let Err(err) = self.store.transition(job, JobState::Running, JobState::Failed) {
                error!(job = %job, err = %err, "job left under running");
            }
            return Err(RunError::Log {
                path: log_path,
                source,
                lines: lines.to_vec(),
            });
        }

        let to = outcome.state();
        match self.store.transition(job, JobState::Running, to) {
            Ok(moved) => Ok(moved),
            Err(source) => {
                if to != JobState::Failed && !matches!(source, StoreError::Split { .. }) {
                    match self.store.transition(job, JobState::Running, JobState::Failed) {
                        Ok(_) => warn!(job = %job, %outcome, err = %source, "filed as failed instead"),
                        Err(err) => error!(job = %job, err = %err, "job left under running"),
                    }
                }
                Err(RunError::File { outcome, source })
            }
        }
    }
}

fn preempted(job: &Job, exit_code: Option<i32>, lines: Vec<String>) -> RunReport {
    RunReport {
        job: job.clone(),
        outcome: Outcome::Failed,
        exit_code,
        lines,
        disposition: Disposition::Preempted,
    }
}

fn join_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Lane;
    use crate::io::loader::get_next_job;
    use crate::test_support::{TestJobs, fast_config};

    fn runner(jobs: &TestJobs) -> (JobRunner, CancelSignal, ActiveJobSlot) {
        let cancel = CancelSignal::new();
        let active = ActiveJobSlot::new();
        let runner = JobRunner::new(
            jobs.store().clone(),
            cancel.clone(),
            active.clone(),
            RunnerSettings::from(&fast_config()),
        );
        (runner, cancel, active)
    }

    #[tokio::test]
    async fn success_files_script_and_log_together() {
        let jobs = TestJobs::new().expect("jobs");
        jobs.queue_descriptor("0001_a", &[("hello", "echo hello\necho oops >&2")])
            .expect("queue");
        let job = get_next_job(jobs.store()).expect("load").expect("job");
        let (runner, _, active) = runner(&jobs);

        let report = runner.run_job(&job).await.expect("run");

        assert_eq!(report.outcome, Outcome::Success);
        assert_eq!(report.exit_code, Some(0));
        assert!(matches!(report.disposition, Disposition::Filed(_)));
        assert_eq!(
            jobs.read_script(JobState::Success, &job).expect("script"),
            "echo hello\necho oops >&2"
        );
        let log = jobs.read_log(JobState::Success, &job).expect("log");
        assert!(log.contains("hello\n"));
        assert!(log.contains("oops\n"));
        assert!(!jobs.store().lane_dir(JobState::Running, &job.lane).join("hello.log").exists());
        assert!(active.current().is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed_not_error() {
        let jobs = TestJobs::new().expect("jobs");
        jobs.queue_script("l", "bad.sh", "echo before\nexit 7\n")
            .expect("queue");
        let job = get_next_job(jobs.store()).expect("load").expect("job");
        let (runner, _, _) = runner(&jobs);

        let report = runner.run_job(&job).await.expect("run");
        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.exit_code, Some(7));
        assert_eq!(jobs.read_log(JobState::Failed, &job).expect("log"), "before\n");
    }

    #[tokio::test]
    async fn stale_signal_is_cleared_at_start() {
        let jobs = TestJobs::new().expect("jobs");
        jobs.queue_script("l", "quick.sh", "sleep 0.2\necho done\n")
            .expect("queue");
        let job = get_next_job(jobs.store()).expect("load").expect("job");
        let (runner, cancel, _) = runner(&jobs);
        cancel.signal();

        let report = runner.run_job(&job).await.expect("run");
        assert_eq!(report.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn cancel_mid_run_files_as_canceled() {
        let jobs = TestJobs::new().expect("jobs");
        jobs.queue_script("l", "long.sh", "echo step1\nsleep 30\n")
            .expect("queue");
        let job = get_next_job(jobs.store()).expect("load").expect("job");
        let (runner, cancel, active) = runner(&jobs);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            crate::test_support::wait_until(Duration::from_secs(5), || {
                active.current().and_then(|a| a.pid).is_some()
            })
            .await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.signal();
        });

        let report = runner.run_job(&job).await.expect("run");
        assert_eq!(report.outcome, Outcome::Canceled);
        assert_eq!(jobs.read_log(JobState::Canceled, &job).expect("log"), "step1\n");
    }

    #[tokio::test]
    async fn launch_error_is_returned_and_force_failed() {
        let jobs = TestJobs::new().expect("jobs");
        jobs.queue_script("l", "x.sh", "true\n").expect("queue");
        let job = get_next_job(jobs.store()).expect("load").expect("job");
        let cancel = CancelSignal::new();
        let active = ActiveJobSlot::new();
        let runner = JobRunner::new(
            jobs.store().clone(),
            cancel,
            active,
            RunnerSettings {
                shell: "/nonexistent/shell".to_string(),
                ..RunnerSettings::from(&fast_config())
            },
        );

        let err = runner.run_job(&job).await.unwrap_err();
        assert!(matches!(err, RunError::Process(ProcessError::Spawn { .. })));

        let moved = runner.force_fail(&job, &err).expect("moved");
        assert_eq!(moved.to, JobState::Failed);
        let log = jobs.read_log(JobState::Failed, &job).expect("log");
        assert!(log.contains("spawn"), "log: {log}");
        assert!(runner.force_fail(&job, &err).is_none());
    }

    #[tokio::test]
    async fn job_loaded_after_shutdown_is_failed_unstarted() {
        let jobs = TestJobs::new().expect("jobs");
        jobs.queue_script("l", "late.sh", "touch started\n")
            .expect("queue");
        let job = get_next_job(jobs.store()).expect("load").expect("job");
        let (runner, _, active) = runner(&jobs);
        assert!(active.shut_down(|_| ()).is_none());
        assert!(runner.is_shut_down());

        let report = runner.run_job(&job).await.expect("run");
        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.exit_code, None);
        assert!(matches!(report.disposition, Disposition::Filed(_)));
        assert_eq!(
            jobs.read_script(JobState::Failed, &job).expect("script"),
            "touch started\n"
        );
        let log = jobs.read_log(JobState::Failed, &job).expect("log");
        assert!(log.contains("shut down"), "log: {log}");
        assert!(jobs.store().list(JobState::Running).expect("list").is_empty());
        assert!(active.current().is_none());
    }

    #[tokio::test]
    async fn occupied_destination_falls_back_to_failed() {
        let jobs = TestJobs::new().expect("jobs");
        let lane = Lane::new("l").expect("lane");
        let job = Job::new("dup", lane.clone());
        fs::create_dir_all(jobs.store().lane_dir(JobState::Running, &lane)).expect("mkdir");
        fs::create_dir_all(jobs.store().lane_dir(JobState::Success, &lane)).expect("mkdir");
        fs::write(jobs.store().script_path(JobState::Running, &job), "true\n").expect("write");
        fs::write(jobs.store().log_path(JobState::Success, &job), "old\n").expect("write");
        let (runner, _, _) = runner(&jobs);

        let err = runner.run_job(&job).await.unwrap_err();
        assert!(matches!(
            err,
            RunError::File {
                outcome: Outcome::Success,
                ..
            }
        ));
        assert!(jobs.store().script_path(JobState::Failed, &job).is_file());
        assert_eq!(jobs.read_log(JobState::Success, &job).expect("log"), "old\n");
    }
}
