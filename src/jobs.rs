//! Job list loading and resume filtering.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error_handling::JobFileError;
use crate::models::Job;

/// Loads a JSON job list from `path`, or from stdin when `path` is `-`.
///
/// The list is an array of `[resource_id, lui, is_random, url]` tuples; the
/// short form `[resource_id, lui, url]` is accepted as well.
///
/// # Errors
///
/// Returns `JobFileError::Read` if the input cannot be read and
/// `JobFileError::Parse` if it is not a job list.
pub fn load_jobs(path: &Path) -> Result<Vec<Job>, JobFileError> {
    let read_error = |source| JobFileError::Read {
        path: path.to_path_buf(),
        source,
    };
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(read_error)?;
        text
    } else {
        std::fs::read_to_string(path).map_err(read_error)?
    };
    Ok(serde_json::from_str(&text)?)
}

/// Removes jobs that already completed, counting duplicates.
///
/// A job listed twice and completed once is kept once. Order is preserved.
pub fn filter_completed_jobs(jobs: Vec<Job>, completed: &[Job]) -> Vec<Job> {
    let mut remaining: HashMap<&Job, usize> = HashMap::new();
    for job in completed {
        *remaining.entry(job).or_default() += 1;
    }
    jobs.into_iter()
        .filter(|job| match remaining.get_mut(job) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect()
}
