//! Advisory lock serializing writes into the dump directory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::config::PINGS_LOCK_FILE;

/// An exclusive advisory lock on `<dump>/.pings.lock`.
///
/// Held by a worker for the duration of one append, and by the orchestrator
/// while it kills processes, so a worker is never killed halfway through a
/// write. Released on drop, or by the OS when the holder dies.
#[derive(Debug)]
pub struct DumpLock {
    file: File,
}

impl DumpLock {
    /// Path of the lock file inside `dump`.
    pub fn path(dump: &Path) -> PathBuf {
        dump.join(PINGS_LOCK_FILE)
    }

    fn open(dump: &Path) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(Self::path(dump))
    }

    /// Blocks until the lock is acquired.
    pub fn acquire(dump: &Path) -> std::io::Result<Self> {
        let file = Self::open(dump)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }

    /// Acquires the lock if nobody holds it.
    ///
    /// Returns `Ok(None)` when another process holds the lock.
    pub fn try_acquire(dump: &Path) -> std::io::Result<Option<Self>> {
        let file = Self::open(dump)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for DumpLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
