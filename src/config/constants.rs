//! Configuration constants.
//!
//! This module defines all configuration constants used throughout the application,
//! including timeouts, deadline multipliers, grace periods and file names.

use std::time::Duration;

/// Default per-job timeout `T` in seconds.
///
/// Every deadline in the pipeline is derived from this value: the proxy uses `T / 3`
/// per upstream request, a worker bounds its probe by `2T`, the orchestrator culls a
/// worker after `3T` and a leaked descendant after `4T`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Minimum accepted per-job timeout in seconds
pub const MIN_TIMEOUT_SECS: u64 = 5;
/// Default number of concurrent probe worker processes
pub const DEFAULT_WORKERS: usize = 32;

/// Multiplier applied to `T` for a worker's internal probe bound
pub const WORKER_PROBE_TIMEOUT_FACTOR: u32 = 2;
/// Multiplier applied to `T` for a tracked worker's culling deadline
pub const WORKER_CULL_FACTOR: u32 = 3;
/// Multiplier applied to `T` for untracked descendants and for the drain window
pub const DESCENDANT_CULL_FACTOR: u32 = 4;
/// Divisor applied to `T` for the proxy's per-request timeout when it is launched by the orchestrator
pub const PROXY_TIMEOUT_DIVISOR: u32 = 3;

/// Orchestrator poll cadence.
///
/// Tight enough to keep the worker pool saturated, loose enough to avoid busy-spinning.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Interval between progress log lines in seconds
pub const LOGGING_INTERVAL: u64 = 5;
/// Interval between scans of the process table for untracked descendants
pub const DESCENDANT_SCAN_INTERVAL: Duration = Duration::from_millis(500);
/// How long the final sweep waits for killed processes to be reaped
pub const REAP_GRACE: Duration = Duration::from_secs(1);
/// How long past a kill deadline culling waits for a busy dump lock before killing anyway
pub const CULL_LOCK_GRACE: Duration = Duration::from_millis(250);

/// Default proxy per-request timeout in seconds (when run standalone)
pub const DEFAULT_PROXY_TIMEOUT_SECS: u64 = 10;
/// Default proxy listen port (when run standalone)
pub const DEFAULT_PROXY_PORT: u16 = 8080;
/// Maximum time to wait for a launched proxy to start accepting connections
pub const PROXY_STARTUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Interval between connection attempts while waiting for a launched proxy
pub const PROXY_STARTUP_POLL: Duration = Duration::from_millis(100);

/// Validity of generated root and leaf certificates in days
pub const CERT_VALIDITY_DAYS: i64 = 3650;
/// Common name of the per-run root certificate authority
pub const CA_COMMON_NAME: &str = "resource_probe CA";

/// Additional settle time granted after the network has gone idle, for client-side dynamic content
pub const DYNAMIC_CONTENT_GRACE: Duration = Duration::from_secs(2);
/// Sleep between checks of the navigation monitor's outstanding-request sets
pub const NETWORK_IDLE_POLL: Duration = Duration::from_millis(100);
/// Interval between polls of the download scratch directory
pub const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Divisor applied to `T` for the download grace window
pub const DOWNLOAD_GRACE_DIVISOR: u32 = 6;

/// Maximum number of redirect hops the HTTP driver follows
pub const MAX_REDIRECT_HOPS: usize = 20;

// Retry strategy for transient driver failures
/// Initial delay in milliseconds before retrying a transient driver failure
pub const RETRY_INITIAL_DELAY_MS: u64 = 250;
/// Factor by which retry delay is multiplied on each attempt
pub const RETRY_FACTOR: u64 = 2;
/// Maximum delay between retries in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 2;
/// Maximum number of retries after the initial attempt
pub const RETRY_MAX_ATTEMPTS: usize = 2;

/// Default User-Agent presented by the HTTP driver
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

// Dump directory layout
/// Advisory lock file serializing all writes into the dump directory
pub const PINGS_LOCK_FILE: &str = ".pings.lock";
/// Append-only record of completed jobs, used by `--resume`
pub const PROGRESS_FILE: &str = "PROGRESS";
/// JSON description of the collection environment
pub const ENVIRONMENT_FILE: &str = "ENVIRONMENT";
/// Log file appended to by workers when `--log scrape.log` is selected
pub const SCRAPE_LOG_FILE: &str = "scrape.log";

// HTTP status codes (for clarity and consistency)
/// Only a final `200` may carry content in a ping
pub const HTTP_STATUS_OK: u16 = 200;
/// Status used for synthetic transport-failure responses
pub const HTTP_STATUS_NO_CONTENT: u16 = 204;
/// Status used for read timeouts
pub const HTTP_STATUS_REQUEST_TIMEOUT: u16 = 408;
/// Status reported by the FTP fetch when name resolution fails
pub const FTP_STATUS_DNS_FAILURE: u16 = 434;
/// Transport timeout code reported by the FTP fetch, remapped to 408
pub const FTP_STATUS_TIMEOUT: u16 = 115;
/// Status assumed for a completed FTP transfer
pub const FTP_STATUS_OK: u16 = 200;

/// Name of the ping log file for a resource id.
pub fn ping_log_file_name(resource_id: u64) -> String {
    format!("pings_{resource_id}.gz")
}

/// Multiplies a base timeout by a deadline factor.
pub fn scaled(timeout: Duration, factor: u32) -> Duration {
    timeout.saturating_mul(factor)
}
