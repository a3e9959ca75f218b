//! resource_probe library: ground-truth network behaviour of identifier-resolution URLs
//!
//! This library probes large job lists of URLs and records, for every job, the
//! full redirect chain, transport failures and final content. The pipeline has
//! three parts:
//!
//! - an intercepting forward proxy ([`proxy`]) that terminates TLS with leaf
//!   certificates from a per-run authority ([`ca`]) and classifies every
//!   transport failure into diagnostic headers
//! - a probe worker ([`worker`]) that loads one URL through the proxy, rebuilds
//!   the redirect chain from the driver's events ([`navigation`]) and appends
//!   the resulting ping to a crash-safe log ([`storage`])
//! - an orchestrator ([`orchestrator`]) that runs one worker process per job
//!   under bounded concurrency and kills workers that hang
//!
//! # Example
//!
//! ```no_run
//! use resource_probe::config::{ProxyMode, ScrapeConfig};
//! use resource_probe::orchestrator::scrape;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = ScrapeConfig {
//!     jobs: "jobs.json".into(),
//!     dump: "dump".into(),
//!     proxy: ProxyMode::Launch,
//!     ..Default::default()
//! };
//!
//! let report = scrape(config).await?;
//! println!("Processed {} jobs, {} dropped", report.total, report.dropped.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. The orchestrator spawns workers by
//! re-executing the current binary, which must be the `resource_probe` CLI.

pub mod ca;
pub mod config;
pub mod content_type;
pub mod error_handling;
pub mod initialization;
pub mod inspect;
pub mod jobs;
pub mod models;
pub mod navigation;
pub mod orchestrator;
pub mod proxy;
pub mod storage;
pub mod worker;

// Re-export public API
pub use config::{LogFormat, LogLevel, ScrapeConfig};
pub use models::{Job, Ping, Redirect};
pub use orchestrator::{scrape, Orchestrator, RunReport};
