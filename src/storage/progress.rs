//! Record of completed jobs, used to resume a partial run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::PROGRESS_FILE;
use crate::error_handling::{JobFileError, PingLogError};
use crate::models::Job;

/// The `PROGRESS` file of a dump directory: one JSON job tuple per line.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn in_dump(dump: &Path) -> Self {
        Self {
            path: dump.join(PROGRESS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Appends `job` as completed. The caller must hold the dump lock.
    pub fn record(&self, job: &Job) -> Result<(), PingLogError> {
        let mut line = serde_json::to_vec(job)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Reads all completed jobs in the order they were recorded.
    ///
    /// # Errors
    ///
    /// - `JobFileError::MissingProgress` if the file does not exist
    /// - `JobFileError::CorruptProgress` for the first line that is not a job
    pub fn read(&self) -> Result<Vec<Job>, JobFileError> {
        if !self.exists() {
            return Err(JobFileError::MissingProgress(self.path.clone()));
        }
        let text = std::fs::read_to_string(&self.path).map_err(|source| JobFileError::Read {
            path: self.path.clone(),
            source,
        })?;
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|source| JobFileError::CorruptProgress {
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }
}
