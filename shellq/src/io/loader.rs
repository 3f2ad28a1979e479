//! Job loader: picks the next eligible queue entry and moves it to `running/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, warn};

use crate::core::descriptor::Descriptor;
use crate::core::selector::{Candidate, EntryKind, entry_kind, order_candidates};
use crate::core::state::JobState;
use crate::core::types::{Job, Lane, sanitize_job_name};
use crate::io::store::{QueueStore, walk_files, write_atomic};

/// A pending job as seen without consuming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEntry {
    pub lane: Lane,
    /// Job name as the producer wrote it (`None` for unnamed descriptor jobs).
    pub name: Option<String>,
    /// Queue file holding the job, relative to `queued/`.
    pub source: PathBuf,
}

/// Every queue file under `queued/`, in dispatch order.
pub fn scan_queue(store: &QueueStore) -> Result<Vec<Candidate>> {
    let queued = store.state_dir(JobState::Queued);
    let mut files = Vec::new();
    walk_files(&queued, &mut files).with_context(|| format!("scan {}", queued.display()))?;

    let mut candidates: Vec<Candidate> = files
        .iter()
        .filter_map(|path| {
            let kind = entry_kind(path)?;
            let relative = path.strip_prefix(&queued).ok()?.to_path_buf();
            Some(Candidate { relative, kind })
        })
        .collect();
    order_candidates(&mut candidates);
    Ok(candidates)
}

/// Select the next job and move it to `running/`.
///
/// Standalone scripts are renamed into place. For descriptors, the first
/// `job` element is written out as a script and removed from the file. A
/// descriptor that fails to parse is logged and skipped for this call only;
/// empty descriptors are skipped and left in place.
pub fn get_next_job(store: &QueueStore) -> Result<Option<Job>> {
    for candidate in scan_queue(store)? {
        let path = store.state_dir(JobState::Queued).join(&candidate.relative);
        let taken = match candidate.kind {
            EntryKind::Script => take_script(store, &candidate, &path).map(Some),
            EntryKind::Descriptor => take_from_descriptor(store, &candidate, &path),
        };
        match taken {
            Ok(Some(job)) => {
                info!(job = %job, source = %candidate.relative.display(), "job picked");
                return Ok(Some(job));
            }
            Ok(None) => {
                debug!(source = %candidate.relative.display(), "descriptor empty");
            }
            Err(err) => {
                warn!(
                    source = %candidate.relative.display(),
                    err = %format!("{err:#}"),
                    "skipping queue entry"
                );
            }
        }
    }
    Ok(None)
}

/// List what is waiting under `queued/`, in the order it would run.
pub fn peek_queue(store: &QueueStore) -> Result<Vec<QueuedEntry>> {
    let mut entries = Vec::new();
    for candidate in scan_queue(store)? {
        let lane = candidate.lane()?;
        match candidate.kind {
            EntryKind::Script => entries.push(QueuedEntry {
                lane,
                name: file_stem(&candidate.relative),
                source: candidate.relative,
            }),
            EntryKind::Descriptor => {
                let path = store.state_dir(JobState::Queued).join(&candidate.relative);
                let descriptor = match load_descriptor(&path) {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        warn!(source = %candidate.relative.display(), err = %format!("{err:#}"), "unreadable descriptor");
                        continue;
                    }
                };
                for job in descriptor.jobs() {
                    entries.push(QueuedEntry {
                        lane: lane.clone(),
                        name: job.name.clone(),
                        source: candidate.relative.clone(),
                    });
                }
            }
        }
    }
    Ok(entries)
}

pub fn load_descriptor(path: &Path) -> Result<Descriptor> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read descriptor {}", path.display()))?;
    Descriptor::parse(contents).with_context(|| format!("parse descriptor {}", path.display()))
}

fn take_script(store: &QueueStore, candidate: &Candidate, path: &Path) -> Result<Job> {
    let lane = candidate.lane()?;
    let stem = file_stem(&candidate.relative)
        .ok_or_else(|| anyhow!("script {} has no usable name", path.display()))?;
    let name = unique_name(store, &lane, &stem);
    let job = Job::new(name, lane);

    let running_dir = store.lane_dir(JobState::Running, &job.lane);
    fs::create_dir_all(&running_dir)
        .with_context(|| format!("create directory {}", running_dir.display()))?;
    let target = store.script_path(JobState::Running, &job);
    fs::rename(path, &target)
        .with_context(|| format!("move {} -> {}", path.display(), target.display()))?;
    Ok(job)
}

fn take_from_descriptor(
    store: &QueueStore,
    candidate: &Candidate,
    path: &Path,
) -> Result<Option<Job>> {
    let descriptor = load_descriptor(path)?;
    let Some(entry) = descriptor.first() else {
        return Ok(None);
    };
    let remaining = descriptor
        .without_first()
        .ok_or_else(|| anyhow!("descriptor {} lost its first job", path.display()))?;

    let lane = candidate.lane()?;
    let base = entry
        .name
        .as_deref()
        .and_then(sanitize_job_name)
        .unwrap_or_else(timestamp_name);
    let job = Job::new(unique_name(store, &lane, &base), lane);

    // Stage the script under a hidden name first: a crash before the final
    // rename leaves a temp file, never a job that is both queued and running.
    let running_dir = store.lane_dir(JobState::Running, &job.lane);
    fs::create_dir_all(&running_dir)
        .with_context(|| format!("create directory {}", running_dir.display()))?;
    let staged = running_dir.join(format!(".{}.tmp", job.script_file_name()));
    fs::write(&staged, &entry.body).with_context(|| format!("stage {}", staged.display()))?;

    if let Err(err) = write_atomic(path, &remaining) {
        if let Err(rm_err) = fs::remove_file(&staged) {
            warn!(staged = %staged.display(), err = %rm_err, "cannot remove staged script");
        }
        return Err(err.context(format!("consume job from {}", path.display())));
    }

    let target = store.script_path(JobState::Running, &job);
    finish_staged(&job, &staged, &target)?;
    Ok(Some(job))
}

/// Move a staged script into place. The job has already left its descriptor,
/// so a failure here leaves it only as the hidden temp file.
fn finish_staged(job: &Job, staged: &Path, target: &Path) -> Result<()> {
    if let Err(err) = fs::rename(staged, target) {
        error!(
            job = %job,
            staged = %staged.display(),
            err = %err,
            "job removed from descriptor but left as a staged temp file"
        );
        return Err(anyhow::Error::new(err)
            .context(format!("move {} -> {}", staged.display(), target.display())));
    }
    Ok(())
}

/// Pick `base`, or `base-1`, `base-2`, ... so no earlier record is overwritten.
fn unique_name(store: &QueueStore, lane: &Lane, base: &str) -> String {
    if !store.is_name_taken(lane, base) {
        return base.to_string();
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !store.is_name_taken(lane, &candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(sanitize_job_name)
}

fn timestamp_name() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}
