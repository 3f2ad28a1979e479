//! Reference producer: appends jobs to a lane's batch descriptor.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::descriptor::{Descriptor, EMPTY_DOCUMENT};
use crate::core::state::JobState;
use crate::core::types::Lane;
use crate::io::loader::load_descriptor;
use crate::io::store::{QueueStore, write_atomic};

/// Descriptor file producers append to within a lane.
pub const DESCRIPTOR_FILE_NAME: &str = "todo.xml";

/// Append `name`/`command` to `queued/<lane>/todo.xml`, creating it if needed.
///
/// A descriptor that does not parse is left untouched and reported; it
/// would otherwise be overwritten along with every job in it.
pub fn push_job(store: &QueueStore, lane: &Lane, name: &str, command: &str) -> Result<PathBuf> {
    let path = store
        .lane_dir(JobState::Queued, lane)
        .join(DESCRIPTOR_FILE_NAME);
    let descriptor = if path.exists() {
        load_descriptor(&path).context("refusing to append to an unreadable descriptor")?
    } else {
        Descriptor::parse(EMPTY_DOCUMENT)?
    };
    write_atomic(&path, &descriptor.with_appended(name, command))
        .with_context(|| format!("append job to {}", path.display()))?;
    debug!(lane = %lane, name, path = %path.display(), "job queued");
    Ok(path)
}
