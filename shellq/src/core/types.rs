//! Shared deterministic types for the engine core.
//!
//! These types define stable contracts between the loader, the runner and the
//! store. They do not touch the filesystem.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::state::JobState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaneError {
    #[error("lane `{0}` must be a relative path without `..`")]
    NotRelative(String),
    #[error("lane `{0}` is not valid UTF-8")]
    NotUtf8(String),
}

/// Relative subdirectory grouping related jobs (e.g. `0100_high/experiment-a`).
///
/// A lane is mirrored verbatim under every state root. The empty lane is the
/// state root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lane(PathBuf);

impl Lane {
    /// The lane at the top of each state root.
    pub fn root() -> Self {
        Self(PathBuf::new())
    }

    /// Validate and normalize a lane path. `.` components are dropped.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, LaneError> {
        let path = path.as_ref();
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    if part.to_str().is_none() {
                        return Err(LaneError::NotUtf8(path.display().to_string()));
                    }
                    normalized.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(LaneError::NotRelative(path.display().to_string()));
                }
            }
        }
        Ok(Self(normalized))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.as_os_str().is_empty()
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        let parts: Vec<_> = self
            .0
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        f.write_str(&parts.join("/"))
    }
}

impl Serialize for Lane {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lane {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Lane::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Identity of a job: its name plus the lane it lives in.
///
/// The job's files are always `<lane>/<name>.sh` and `<lane>/<name>.log`
/// under whichever state root currently holds them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub lane: Lane,
}

impl Job {
    pub fn new(name: impl Into<String>, lane: Lane) -> Self {
        Self {
            name: name.into(),
            lane,
        }
    }

    pub fn script_file_name(&self) -> String {
        format!("{}.sh", self.name)
    }

    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.name)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lane.is_root() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.lane, self.name)
        }
    }
}

/// Make a producer-supplied job name safe to use as a file stem.
///
/// Path separators and NUL are replaced, and leading dots are stripped so the
/// result can never escape its lane or become a hidden file. Returns `None`
/// when nothing usable is left.
pub fn sanitize_job_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Terminal classification of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
    Canceled,
}

impl Outcome {
    /// The state root a job with this outcome is filed under.
    pub fn state(self) -> JobState {
        match self {
            Outcome::Success => JobState::Success,
            Outcome::Failed => JobState::Failed,
            Outcome::Canceled => JobState::Canceled,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state().fmt(f)
    }
}
