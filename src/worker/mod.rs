//! Probe worker: turns one job into one ping.
//!
//! A worker runs as its own process, spawned by the orchestrator. It probes
//! the job's URL, through the browser driver and the intercepting proxy for
//! `http`/`https` or directly for `ftp`, and appends the resulting ping to
//! the resource's ping log under the dump lock. A probe that outlives its
//! bound is dropped without writing anything.

mod ftp;

use std::path::Path;

use tokio_retry::RetryIf;

use crate::config::{scaled, WorkerConfig, WORKER_PROBE_TIMEOUT_FACTOR};
use crate::error_handling::{get_retry_strategy, NavigationError, PingLogError};
use crate::initialization::init_resolver;
use crate::models::{Job, Ping};
use crate::navigation::{HttpDriver, Navigation, NavigationMonitor};
use crate::storage::{DumpLock, PingLog, ProgressLog};

// Re-export public API
pub use ftp::{status_from_text, FtpError};

/// Probes `job` and builds its ping.
///
/// Transient navigation failures are retried with backoff inside an overall
/// bound of `2T`.
///
/// # Returns
///
/// `Ok(Some(ping))` on success or a classified transport failure, `Ok(None)`
/// if the probe did not finish within its bound.
///
/// # Errors
///
/// Returns `NavigationError::UnsupportedScheme` for URLs that are neither
/// `http(s)` nor `ftp`, and the last navigation error once retries are
/// exhausted.
pub async fn probe(job: &Job, config: &WorkerConfig) -> Result<Option<Ping>, NavigationError> {
    let bound = scaled(config.timeout, WORKER_PROBE_TIMEOUT_FACTOR);
    let scheme = url::Url::parse(&job.url)
        .map(|url| url.scheme().to_string())
        .unwrap_or_default();

    let outcome = match scheme.as_str() {
        "http" | "https" => tokio::time::timeout(bound, probe_http(job, config)).await,
        "ftp" => tokio::time::timeout(bound, probe_ftp(job, config)).await,
        _ => return Err(NavigationError::UnsupportedScheme(scheme)),
    };

    let navigation = match outcome {
        Ok(navigation) => navigation?,
        Err(_) => {
            log::warn!("Dropping {job}: probe exceeded {bound:?}");
            return Ok(None);
        }
    };

    Ok(Some(Ping::new(
        job.lui.clone(),
        job.is_random,
        navigation.request_date,
        navigation.redirects,
        navigation.content,
        navigation.content_type,
    )))
}

async fn probe_http(job: &Job, config: &WorkerConfig) -> Result<Navigation, NavigationError> {
    let monitor = NavigationMonitor::new(config.timeout);
    RetryIf::spawn(
        get_retry_strategy(),
        || async {
            let mut driver = HttpDriver::through_proxy(&config.proxy, config.timeout)
                .map_err(|e| NavigationError::Driver(e.to_string()))?;
            monitor.run(&mut driver, &job.url, &config.scratch).await
        },
        |err: &NavigationError| {
            let retry = err.is_transient();
            if retry {
                log::debug!("Retrying {job} after transient failure: {err}");
            }
            retry
        },
    )
    .await
}

async fn probe_ftp(job: &Job, config: &WorkerConfig) -> Result<Navigation, NavigationError> {
    let resolver =
        init_resolver(config.timeout).map_err(|e| NavigationError::Driver(e.to_string()))?;
    Ok(ftp::FtpFetcher::new(&resolver, config.timeout)
        .fetch(&job.url)
        .await)
}

/// Appends `ping` to the resource's ping log and marks `job` completed.
///
/// Both writes happen under one hold of the dump lock.
///
/// # Errors
///
/// Returns `PingLogError` if the lock, the log or the progress file fails.
pub fn persist(dump: &Path, job: &Job, ping: &Ping) -> Result<(), PingLogError> {
    let _lock = DumpLock::acquire(dump)?;
    PingLog::for_resource(dump, job.resource_id).append(ping)?;
    ProgressLog::in_dump(dump).record(job)?;
    Ok(())
}

/// Runs one worker to completion.
///
/// # Errors
///
/// Returns any unclassified failure. Nothing is written in that case and the
/// job is dropped; the caller reports the error and exits non-zero.
pub async fn run_worker(config: WorkerConfig, job: Job) -> anyhow::Result<()> {
    log::debug!("Probing {job}");
    let Some(ping) = probe(&job, &config).await? else {
        return Ok(());
    };
    log::debug!(
        "Probed {job}: {} hop(s), final status {:?}",
        ping.redirects.len(),
        ping.final_status()
    );

    tokio::task::spawn_blocking(move || persist(&config.dump, &job, &ping)).await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(dump: &Path) -> WorkerConfig {
        WorkerConfig {
            dump: dump.to_path_buf(),
            proxy: "127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(5),
            scratch: dump.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_fatal() {
        let dump = tempfile::tempdir().unwrap();
        let job = Job::new(1, "x", false, "gopher://a.example/x");
        let err = probe(&job, &config(dump.path())).await.unwrap_err();
        assert!(matches!(err, NavigationError::UnsupportedScheme(s) if s == "gopher"));
    }

    #[test]
    fn test_persist_writes_ping_and_progress() {
        let dump = tempfile::tempdir().unwrap();
        let job = Job::new(42, "CHEBI:15377", false, "https://a.example/CHEBI:15377");
        let ping = Ping::new(
            "CHEBI:15377",
            false,
            crate::models::request_date_now(),
            vec![crate::models::Redirect::bare(&job.url, Some(200))],
            Some("water".into()),
            Some("text/plain".into()),
        );

        persist(dump.path(), &job, &ping).unwrap();
        persist(dump.path(), &job, &ping).unwrap();

        let pings = PingLog::for_resource(dump.path(), 42).read().unwrap();
        assert_eq!(pings, vec![ping.clone(), ping]);
        assert_eq!(ProgressLog::in_dump(dump.path()).read().unwrap(), vec![job.clone(), job]);
    }
}
