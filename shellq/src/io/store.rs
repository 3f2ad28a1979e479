//! Directory-backed job store.
//!
//! The jobs directory holds one root per [`JobState`]; each root mirrors the
//! same lane subdirectories:
//!
//! ```text
//! <jobs>/queued/<lane>/{*.sh, *.xml}
//! <jobs>/running/<lane>/<name>.{sh,log}
//! <jobs>/{success,failed,canceled}/<lane>/<name>.{sh,log}
//! ```
//!
//! There is no index: the directory holding a job's files *is* its state.
//! [`QueueStore::transition`] is the only operation that changes it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::core::state::JobState;
use crate::core::types::{Job, Lane};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{job}: {from} is a terminal state")]
    Terminal { job: Job, from: JobState },
    #[error("{job}: script {} is missing", path.display())]
    SourceMissing { job: Job, path: PathBuf },
    #[error("{job}: destination {} already exists", path.display())]
    DestinationExists { job: Job, path: PathBuf },
    #[error("{job}: move {} -> {}", from.display(), to.display())]
    Move {
        job: Job,
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The script reached `to` but the log could not follow it.
    #[error("{job}: script moved to {to} but log is still under {from}")]
    Split {
        job: Job,
        from: JobState,
        to: JobState,
        #[source]
        source: io::Error,
    },
}

/// Files relocated by a successful [`QueueStore::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: JobState,
    pub script: PathBuf,
    pub log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct QueueStore {
    root: PathBuf,
}

impl QueueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create every state root. Failure here is an unrecoverable startup error.
    pub fn init(&self) -> Result<()> {
        for state in JobState::ALL {
            let dir = self.state_dir(state);
            fs::create_dir_all(&dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
        debug!(root = %self.root.display(), "state roots ready");
        Ok(())
    }

    pub fn state_dir(&self, state: JobState) -> PathBuf {
        self.root.join(state.dir_name())
    }

    pub fn lane_dir(&self, state: JobState, lane: &Lane) -> PathBuf {
        self.state_dir(state).join(lane.as_path())
    }

    pub fn script_path(&self, state: JobState, job: &Job) -> PathBuf {
        self.lane_dir(state, &job.lane).join(job.script_file_name())
    }

    pub fn log_path(&self, state: JobState, job: &Job) -> PathBuf {
        self.lane_dir(state, &job.lane).join(job.log_file_name())
    }

    /// True if any non-queued root already holds a script or log for
    /// `<lane>/<name>`.
    pub fn is_name_taken(&self, lane: &Lane, name: &str) -> bool {
        let job = Job::new(name, lane.clone());
        JobState::ALL
            .into_iter()
            .filter(|state| *state != JobState::Queued)
            .any(|state| {
                self.script_path(state, &job).exists() || self.log_path(state, &job).exists()
            })
    }

    /// Move a job's script (and its log, once it exists) from one state root
    /// to another, keeping the lane.
    ///
    /// Both destinations are checked before anything moves. If the script
    /// moves but the log cannot follow, the job is left split across two
    /// roots and [`StoreError::Split`] is returned; callers must log it.
    pub fn transition(
        &self,
        job: &Job,
        from: JobState,
        to: JobState,
    ) -> Result<Transition, StoreError> {
        if from.is_terminal() {
            return Err(StoreError::Terminal {
                job: job.clone(),
                from,
            });
        }

        let from_script = self.script_path(from, job);
        let from_log = self.log_path(from, job);
        let to_script = self.script_path(to, job);
        let to_log = self.log_path(to, job);

        if !from_script.is_file() {
            return Err(StoreError::SourceMissing {
                job: job.clone(),
                path: from_script,
            });
        }
        for dest in [&to_script, &to_log] {
            if dest.exists() {
                return Err(StoreError::DestinationExists {
                    job: job.clone(),
                    path: dest.clone(),
                });
            }
        }

        let to_dir = self.lane_dir(to, &job.lane);
        fs::create_dir_all(&to_dir).map_err(|source| StoreError::Move {
            job: job.clone(),
            from: from_script.clone(),
            to: to_dir.clone(),
            source,
        })?;
        fs::rename(&from_script, &to_script).map_err(|source| StoreError::Move {
            job: job.clone(),
            from: from_script.clone(),
            to: to_script.clone(),
            source,
        })?;

        let log = if from_log.exists() {
            if let Err(source) = fs::rename(&from_log, &to_log) {
                error!(job = %job, %from, %to, err = %source, "job split across state roots");
                return Err(StoreError::Split {
                    job: job.clone(),
                    from,
                    to,
                    source,
                });
            }
            Some(to_log)
        } else {
            None
        };

        debug!(job = %job, %from, %to, "job moved");
        Ok(Transition {
            to,
            script: to_script,
            log,
        })
    }

    /// Jobs whose script currently sits under `state`, ordered by lane then name.
    pub fn list(&self, state: JobState) -> Result<Vec<Job>> {
        let state_dir = self.state_dir(state);
        let mut files = Vec::new();
        walk_files(&state_dir, &mut files)
            .with_context(|| format!("list {}", state_dir.display()))?;

        let mut jobs = Vec::new();
        for path in files {
            if path.extension().and_then(|ext| ext.to_str()) != Some("sh") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let relative = path
                .strip_prefix(&state_dir)
                .with_context(|| format!("relativize {}", path.display()))?;
            let lane = Lane::new(relative.parent().unwrap_or(Path::new("")))?;
            jobs.push(Job::new(name, lane));
        }
        jobs.sort_by(|a, b| (&a.lane, &a.name).cmp(&(&b.lane, &b.name)));
        Ok(jobs)
    }
}

/// Recursively collect regular files under `dir`. A missing `dir` yields nothing.
///
/// Only a failure to read `dir` itself is an error. Unreadable entries and
/// subdirectories are logged and skipped.
pub(crate) fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let found = entry.and_then(|entry| Ok((entry.path(), entry.file_type()?)));
        let (path, file_type) = match found {
            Ok(found) => found,
            Err(err) => {
                warn!(dir = %dir.display(), err = %err, "skipping unreadable entry");
                continue;
            }
        };
        if file_type.is_dir() {
            if let Err(err) = walk_files(&path, out) {
                warn!(dir = %path.display(), err = %err, "skipping unreadable directory");
            }
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Atomically replace `path` (temp file + rename in the same directory).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let tmp_path = parent.join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
