//! Deterministic ordering of queue entries.
//!
//! The full relative path of an entry under `queued/` is the only priority
//! mechanism: producers express priority through lane naming (e.g.
//! zero-padded numeric prefixes).

use std::path::{Path, PathBuf};

use crate::core::types::{Lane, LaneError};

/// Kind of file found under `queued/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A ready-to-run `*.sh` file, named after its stem.
    Script,
    /// A `*.xml` batch descriptor holding many job bodies.
    Descriptor,
}

/// A queue file, relative to the `queued/` root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub relative: PathBuf,
    pub kind: EntryKind,
}

impl Candidate {
    /// Lane the entry belongs to: the directory containing it.
    pub fn lane(&self) -> Result<Lane, LaneError> {
        match self.relative.parent() {
            Some(parent) => Lane::new(parent),
            None => Ok(Lane::root()),
        }
    }
}

/// Classify a file name. Hidden files (temp files, editor swap files) are
/// never queue entries.
pub fn entry_kind(path: &Path) -> Option<EntryKind> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') {
        return None;
    }
    match path.extension()?.to_str()? {
        "sh" => Some(EntryKind::Script),
        "xml" => Some(EntryKind::Descriptor),
        _ => None,
    }
}

/// Sort candidates by relative path, component by component.
pub fn order_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| a.relative.cmp(&b.relative));
}
