//! Deterministic classification of a finished job.

use crate::core::types::Outcome;

/// Classify how a job ended.
///
/// - `Canceled` if a cancellation was observed while the job ran, even when
///   the process still managed to exit with code 0.
/// - `Success` if the process exited with code 0.
/// - `Failed` otherwise, including death by signal (`exit_code == None`).
pub fn classify(canceled: bool, exit_code: Option<i32>) -> Outcome {
    if canceled {
        return Outcome::Canceled;
    }
    match exit_code {
        Some(0) => Outcome::Success,
        _ => Outcome::Failed,
    }
}
