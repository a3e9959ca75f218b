//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `resource_probe` library that handles:
//! - Command-line argument parsing
//! - Logger initialization (stdout for workers, stderr otherwise)
//! - User-facing output formatting
//!
//! The same binary runs the proxy, the orchestrator and each probe worker,
//! since the orchestrator spawns workers and the proxy by re-executing itself.

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Target;
use structopt::StructOpt;

use resource_probe::config::{
    Command, Opt, OrchestratorConfig, ProxyConfig, ScrapeConfig, WorkerConfig, POLL_INTERVAL,
};
use resource_probe::initialization::{init_crypto_provider, init_logger_with};
use resource_probe::inspect::inspect;
use resource_probe::models::Job;
use resource_probe::orchestrator::scrape;
use resource_probe::proxy::serve;
use resource_probe::worker::run_worker;

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    // Worker output is captured by the orchestrator through stdout
    let target = match opt.command {
        Command::Worker { .. } => Target::Stdout,
        _ => Target::Stderr,
    };
    init_logger_with(opt.log_level.into(), opt.log_format, target)
        .context("Failed to initialize logger")?;

    // Initialize crypto provider for TLS operations
    init_crypto_provider();

    match opt.command {
        Command::Proxy { port, timeout } => {
            let config = ProxyConfig {
                listen: SocketAddr::from(([0, 0, 0, 0], port)),
                timeout: Duration::from_secs(timeout),
            };
            serve(config, None).await
        }
        Command::Scrape {
            jobs,
            dump,
            resume,
            force,
            proxy,
            workers,
            timeout,
            log,
        } => {
            let config = ScrapeConfig {
                jobs,
                dump,
                resume,
                force,
                proxy,
                orchestrator: OrchestratorConfig {
                    workers,
                    timeout: Duration::from_secs(timeout),
                    poll_interval: POLL_INTERVAL,
                },
                log,
                log_level: opt.log_level,
            };
            let dump = config.dump.clone();
            match scrape(config).await {
                Ok(report) => {
                    println!(
                        "✅ Processed {} job{} ({} culled, {} swept, {} dropped) in {:.1}s",
                        report.total,
                        if report.total == 1 { "" } else { "s" },
                        report.culled,
                        report.swept,
                        report.dropped.len(),
                        report.elapsed.as_secs_f64()
                    );
                    println!("Pings saved in {}", dump.display());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("resource_probe error: {:#}", e);
                    process::exit(1);
                }
            }
        }
        Command::Worker {
            dump,
            proxy,
            timeout_ms,
            scratch,
            rid,
            lui,
            random,
            url,
        } => {
            let job = Job::new(rid, lui, random, url);
            let config = WorkerConfig {
                dump,
                proxy,
                timeout: Duration::from_millis(timeout_ms),
                scratch,
            };
            if let Err(err) = run_worker(config, job.clone()).await {
                log::error!("Error at {job}:\n{err:?}");
                process::exit(1);
            }
            Ok(())
        }
        Command::Inspect { pings } => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            inspect(&pings, &mut out)?;
            Ok(())
        }
    }
}
