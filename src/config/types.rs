//! Configuration types and CLI options.
//!
//! This module defines enums and structs used for command-line argument parsing
//! and the library-level configuration of each subsystem. The library structs
//! can be constructed programmatically without going through the CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strum_macros::{Display, EnumString};
use structopt::StructOpt;

use crate::config::constants::{
    DEFAULT_PROXY_PORT, DEFAULT_PROXY_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS, DEFAULT_WORKERS,
    MIN_TIMEOUT_SECS, POLL_INTERVAL,
};

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted:
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Where probe workers send their diagnostic output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, Display)]
pub enum WorkerLog {
    /// Discard all worker output
    #[strum(serialize = "null")]
    Null,
    /// Pass worker output through to the orchestrator's stderr
    #[strum(serialize = "stderr")]
    Stderr,
    /// Append worker output to `scrape.log` in the working directory
    #[strum(serialize = "scrape.log")]
    ScrapeLog,
}

/// How the orchestrator obtains an intercepting proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyMode {
    /// Launch a proxy child process on a free port for the duration of the run
    Launch,
    /// Connect to an already running proxy at `host:port`
    Connect(String),
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "launch" {
            return Ok(ProxyMode::Launch);
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(ProxyMode::Connect(s.to_string()))
            }
            _ => Err(format!(
                "expected 'launch' or HOST:PORT for the proxy, got '{s}'"
            )),
        }
    }
}

fn parse_timeout(s: &str) -> Result<u64, String> {
    let secs: u64 = s
        .parse()
        .map_err(|e| format!("invalid timeout '{s}': {e}"))?;
    if secs < MIN_TIMEOUT_SECS {
        return Err(format!(
            "timeout must be at least {MIN_TIMEOUT_SECS} seconds, got {secs}"
        ));
    }
    Ok(secs)
}

/// Command-line options.
#[derive(Debug, StructOpt)]
#[structopt(
    name = "resource_probe",
    about = "Probes identifier-resolution URLs through an intercepting proxy and records every fetch."
)]
pub struct Opt {
    /// Log level: error, warn, info, debug or trace
    #[structopt(long, default_value = "info")]
    pub log_level: LogLevel,

    /// Log format: plain or json
    #[structopt(long, default_value = "plain")]
    pub log_format: LogFormat,

    #[structopt(subcommand)]
    pub command: Command,
}

/// Subcommands of the binary.
#[derive(Debug, StructOpt)]
pub enum Command {
    /// Runs the TLS-intercepting forward proxy
    Proxy {
        /// Port to listen on
        #[structopt(long, default_value = "8080")]
        port: u16,
        /// Per-request upstream timeout in seconds
        #[structopt(long, default_value = "10")]
        timeout: u64,
    },
    /// Runs every job in JOBS and appends the results to the DUMP directory
    Scrape {
        /// JSON job list (`-` reads stdin)
        #[structopt(parse(from_os_str))]
        jobs: PathBuf,
        /// Output directory for ping logs
        #[structopt(parse(from_os_str))]
        dump: PathBuf,
        /// Resume a partially completed run instead of clearing DUMP
        #[structopt(long)]
        resume: bool,
        /// Clear a non-empty DUMP directory for a fresh run
        #[structopt(long, conflicts_with = "resume")]
        force: bool,
        /// `launch` or HOST:PORT of a running proxy
        #[structopt(long, default_value = "launch")]
        proxy: ProxyMode,
        /// Number of concurrent worker processes
        #[structopt(long, default_value = "32")]
        workers: usize,
        /// Per-job timeout in seconds, used to cull unresponsive workers
        #[structopt(long, default_value = "30", parse(try_from_str = parse_timeout))]
        timeout: u64,
        /// Worker output: null, stderr or scrape.log
        #[structopt(long, default_value = "scrape.log")]
        log: WorkerLog,
    },
    /// Probes a single job (spawned by `scrape`, one process per job)
    Worker {
        #[structopt(long, parse(from_os_str))]
        dump: PathBuf,
        #[structopt(long)]
        proxy: String,
        /// Per-job timeout in milliseconds
        #[structopt(long)]
        timeout_ms: u64,
        #[structopt(long, parse(from_os_str))]
        scratch: PathBuf,
        #[structopt(long)]
        rid: u64,
        #[structopt(long)]
        lui: String,
        #[structopt(long)]
        random: bool,
        #[structopt(long)]
        url: String,
    },
    /// Prints every readable ping of a ping log as one JSON object per line
    Inspect {
        #[structopt(parse(from_os_str))]
        pings: PathBuf,
    },
}

/// Intercepting proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on
    pub listen: SocketAddr,
    /// Connect and read timeout applied to every upstream request
    pub timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PROXY_PORT)),
            timeout: Duration::from_secs(DEFAULT_PROXY_TIMEOUT_SECS),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrently running worker processes (`W`)
    pub workers: usize,
    /// Per-job timeout (`T`)
    pub timeout: Duration,
    /// Sleep between control-loop sweeps
    pub poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Configuration of one probe worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Dump directory holding the ping logs
    pub dump: PathBuf,
    /// `host:port` of the intercepting proxy
    pub proxy: String,
    /// Per-job timeout (`T`)
    pub timeout: Duration,
    /// Scratch directory for browser downloads
    pub scratch: PathBuf,
}

/// Configuration of a complete scraping run.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// JSON job list (`-` reads stdin)
    pub jobs: PathBuf,
    /// Output directory for ping logs
    pub dump: PathBuf,
    /// Resume a partially completed run
    pub resume: bool,
    /// Clear a non-empty dump directory for a fresh run
    pub force: bool,
    /// Proxy to route browser traffic through
    pub proxy: ProxyMode,
    /// Worker pool bound and timeouts
    pub orchestrator: OrchestratorConfig,
    /// Destination of worker output
    pub log: WorkerLog,
    /// Log level forwarded to spawned workers and the launched proxy
    pub log_level: LogLevel,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            jobs: PathBuf::from("jobs.json"),
            dump: PathBuf::from("dump"),
            resume: false,
            force: false,
            proxy: ProxyMode::Launch,
            orchestrator: OrchestratorConfig::default(),
            log: WorkerLog::ScrapeLog,
            log_level: LogLevel::Info,
        }
    }
}

impl ScrapeConfig {
    /// Reconstructs the command line describing this run, for the environment file.
    pub fn describe_command(&self) -> String {
        let proxy = match &self.proxy {
            ProxyMode::Launch => "launch".to_string(),
            ProxyMode::Connect(address) => address.clone(),
        };
        format!(
            "scrape {} {} --proxy {} --workers {} --timeout {}",
            self.jobs.display(),
            self.dump.display(),
            proxy,
            self.orchestrator.workers,
            self.orchestrator.timeout.as_secs()
        )
    }
}
