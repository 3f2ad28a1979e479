//! Test-only fixtures: a throwaway jobs directory and queue helpers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::state::JobState;
use crate::core::types::{Job, Lane};
use crate::io::config::EngineConfig;
use crate::io::producer::push_job;
use crate::io::store::QueueStore;

/// A jobs directory inside a temp dir, removed on drop.
pub struct TestJobs {
    _temp: TempDir,
    store: QueueStore,
}

impl TestJobs {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let store = QueueStore::new(temp.path().join("jobs"));
        store.init()?;
        Ok(Self { _temp: temp, store })
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Drop a standalone script into `queued/<lane>/`.
    pub fn queue_script(&self, lane: &str, file_name: &str, contents: &str) -> Result<PathBuf> {
        let lane = Lane::new(lane)?;
        let path = self
            .store
            .lane_dir(JobState::Queued, &lane)
            .join(file_name);
        write(&path, contents)?;
        Ok(path)
    }

    /// Append `(name, body)` jobs to `queued/<lane>/todo.xml`.
    pub fn queue_descriptor(&self, lane: &str, jobs: &[(&str, &str)]) -> Result<PathBuf> {
        let lane = Lane::new(lane)?;
        let mut path = self.store.lane_dir(JobState::Queued, &lane);
        for (name, body) in jobs {
            path = push_job(&self.store, &lane, name, body)?;
        }
        Ok(path)
    }

    /// Write arbitrary bytes at a path relative to `queued/`.
    pub fn queue_raw(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.store.state_dir(JobState::Queued).join(relative);
        write(&path, contents)?;
        Ok(path)
    }

    pub fn read_log(&self, state: JobState, job: &Job) -> Result<String> {
        let path = self.store.log_path(state, job);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    pub fn read_script(&self, state: JobState, job: &Job) -> Result<String> {
        let path = self.store.script_path(state, job);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// Config with short intervals so tests observe cancellation quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        idle_interval_secs: 1,
        output_poll_ms: 20,
        terminate_grace_secs: 2,
        drain_grace_secs: 1,
        ..EngineConfig::default()
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
