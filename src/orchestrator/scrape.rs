//! The `scrape` command: one complete collection run.

use std::path::Path;

use anyhow::Context;

use crate::config::{ScrapeConfig, WorkerConfig};
use crate::error_handling::{InitializationError, JobFileError};
use crate::jobs::{filter_completed_jobs, load_jobs};
use crate::storage::{EnvironmentDescription, ProgressLog};

use super::{Orchestrator, ProcessWorkerLauncher, ProxyLauncher, RunReport};

/// Prepares the dump directory for a run.
///
/// A fresh run needs an empty or missing directory; with `force` the entries
/// of a non-empty one are deleted while the directory itself stays. A resumed
/// run keeps the directory as is and requires its progress file.
///
/// # Errors
///
/// Returns `JobFileError::MissingProgress` when resuming without a progress
/// file, `InitializationError::DumpNotEmpty` for a non-empty directory without
/// `force`, and `InitializationError::DumpDirectoryError` if the directory
/// cannot be cleared or created.
pub fn prepare_dump(dump: &Path, resume: bool, force: bool) -> anyhow::Result<()> {
    let dump_error = |source| InitializationError::DumpDirectoryError {
        path: dump.to_path_buf(),
        source,
    };

    if resume {
        let progress = ProgressLog::in_dump(dump);
        if !progress.exists() {
            return Err(JobFileError::MissingProgress(progress.path().to_path_buf()).into());
        }
        return Ok(());
    }

    if !dump.exists() {
        std::fs::create_dir_all(dump).map_err(dump_error)?;
        return Ok(());
    }

    let entries = std::fs::read_dir(dump)
        .map_err(dump_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(dump_error)?;
    if entries.is_empty() {
        return Ok(());
    }
    if !force {
        return Err(InitializationError::DumpNotEmpty(dump.to_path_buf()).into());
    }

    log::warn!(
        "Clearing {} entries from dump directory {}",
        entries.len(),
        dump.display()
    );
    for entry in entries {
        let path = entry.path();
        let removed = if entry.file_type().map_err(dump_error)?.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(dump_error)?;
    }
    Ok(())
}

/// Runs every job of `config.jobs` and appends the pings to `config.dump`.
///
/// Setup faults (unusable dump directory, unreadable job list, unreachable
/// proxy) abort before any worker is spawned.
///
/// # Errors
///
/// Returns an error for any setup fault. Failures of individual jobs are
/// reported in the returned `RunReport` instead.
pub async fn scrape(config: ScrapeConfig) -> anyhow::Result<RunReport> {
    prepare_dump(&config.dump, config.resume, config.force)?;
    EnvironmentDescription::collect(config.describe_command())
        .write(&config.dump)
        .context("Failed to write the environment description")?;

    let mut jobs = load_jobs(&config.jobs)?;
    if config.resume {
        let completed = ProgressLog::in_dump(&config.dump).read()?;
        let total = jobs.len();
        jobs = filter_completed_jobs(jobs, &completed);
        log::info!(
            "Resuming: {} of {} jobs already completed",
            total - jobs.len(),
            total
        );
    }

    let scratch = tempfile::Builder::new()
        .prefix("resource_probe_scratch")
        .tempdir()
        .context("Failed to create the download scratch directory")?;

    let timeout = config.orchestrator.timeout;
    let proxy = ProxyLauncher {
        timeout,
        log: config.log,
        log_level: config.log_level,
    }
    .start(&config.proxy)
    .await?;

    let launcher = ProcessWorkerLauncher::new(
        WorkerConfig {
            dump: config.dump.clone(),
            proxy: proxy.address().to_string(),
            timeout,
            scratch: scratch.path().to_path_buf(),
        },
        config.log,
        config.log_level,
    )
    .context("Failed to locate the worker executable")?;

    let mut orchestrator =
        Orchestrator::new(config.orchestrator.clone(), launcher).with_dump_lock(&config.dump);
    if let Some(pid) = proxy.pid() {
        orchestrator = orchestrator.with_coordinator(pid);
    }

    let report = orchestrator.run(jobs).await;
    drop(proxy);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Job;

    #[test]
    fn test_fresh_run_refuses_a_non_empty_dump() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pings_1.gz"), b"stale").unwrap();

        let err = prepare_dump(dir.path(), false, false).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InitializationError>(),
            Some(InitializationError::DumpNotEmpty(_))
        ));
        assert_eq!(std::fs::read(dir.path().join("pings_1.gz")).unwrap(), b"stale");
    }

    #[test]
    fn test_forced_run_clears_only_the_contents() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("dump");
        std::fs::create_dir_all(dump.join("nested")).unwrap();
        std::fs::write(dump.join("pings_1.gz"), b"stale").unwrap();
        std::fs::write(dump.join("nested").join("x"), b"stale").unwrap();
        std::fs::write(dir.path().join("sibling"), b"kept").unwrap();

        prepare_dump(&dump, false, true).unwrap();

        assert!(dump.is_dir());
        assert_eq!(std::fs::read_dir(&dump).unwrap().count(), 0);
        assert!(dir.path().join("sibling").exists());
    }

    #[test]
    fn test_fresh_run_accepts_empty_or_missing_dump() {
        let dir = tempfile::tempdir().unwrap();
        prepare_dump(dir.path(), false, false).unwrap();

        let missing = dir.path().join("a").join("b");
        prepare_dump(&missing, false, false).unwrap();
        assert!(missing.is_dir());
    }

    #[test]
    fn test_resume_requires_progress() {
        let dir = tempfile::tempdir().unwrap();
        let err = prepare_dump(dir.path(), true, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JobFileError>(),
            Some(JobFileError::MissingProgress(_))
        ));
    }

    #[test]
    fn test_resume_keeps_existing_pings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pings_1.gz"), b"kept").unwrap();
        ProgressLog::in_dump(dir.path())
            .record(&Job::new(1, "x", false, "https://a.example/x"))
            .unwrap();

        prepare_dump(dir.path(), true, false).unwrap();

        assert!(dir.path().join("pings_1.gz").exists());
    }
}
