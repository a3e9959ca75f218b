//! Logger initialization.
//!
//! Every subcommand shares one logger setup. The orchestrator and the proxy
//! log to stderr. A probe worker logs to stdout, which its parent redirects
//! according to the `--log` option, so many workers end up interleaved in one
//! `scrape.log`; each line therefore carries the writing process id.

use std::io::Write;

use crate::config::LogFormat;
use crate::error_handling::InitializationError;
use colored::*;
use env_logger::fmt::Formatter;
use env_logger::Target;
use log::{Level, LevelFilter, Record};

/// Crates whose chatter is capped regardless of the requested level.
const QUIET_MODULES: &[(&str, LevelFilter)] = &[
    ("html5ever", LevelFilter::Error),
    ("selectors", LevelFilter::Warn),
    ("reqwest", LevelFilter::Info),
    ("hyper", LevelFilter::Info),
    ("hyper_util", LevelFilter::Info),
    // Handshake failures of probing clients are classified by the proxy
    ("rustls", LevelFilter::Error),
    // Malformed DNS answers are retried by the resolver
    ("trust_dns_proto", LevelFilter::Error),
];

/// Initializes the logger with the given level, format and output stream.
///
/// `RUST_LOG` is read first and `level` is applied on top of it, so
/// `RUST_LOG=reqwest=debug` still works next to `--log-level`.
///
/// # Arguments
///
/// * `level` - Minimum log level to display (overrides `RUST_LOG` if set)
/// * `format` - Log format (Plain or Json)
/// * `target` - Output stream
///
/// # Errors
///
/// Returns `InitializationError::LoggerError` if a logger is already installed.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug resource_probe proxy --port 8080
/// resource_probe --log-level debug --log-format json scrape jobs.json dump
/// ```
pub fn init_logger_with(
    level: LevelFilter,
    format: LogFormat,
    target: Target,
) -> Result<(), InitializationError> {
    // Worker output lands in files or /dev/null, where escape codes are noise
    colored::control::set_override(matches!(target, Target::Stderr));

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level).target(target);
    for (module, cap) in QUIET_MODULES {
        builder.filter_module(module, (*cap).min(level));
    }
    builder.filter_module("resource_probe", level);

    match format {
        LogFormat::Json => builder.format(format_json),
        LogFormat::Plain => builder.format(format_plain),
    };

    // try_init: tests install loggers repeatedly within one process
    builder.try_init().map_err(InitializationError::from)?;
    Ok(())
}

fn format_json(buf: &mut Formatter, record: &Record) -> std::io::Result<()> {
    let line = serde_json::json!({
        "ts": chrono::Utc::now().timestamp_millis(),
        "pid": std::process::id(),
        "level": record.level().as_str(),
        "target": record.target(),
        "msg": record.args().to_string(),
    });
    writeln!(buf, "{line}")
}

fn format_plain(buf: &mut Formatter, record: &Record) -> std::io::Result<()> {
    let level = record.level();
    let (emoji, colored_level) = match level {
        Level::Error => ("❌", level.as_str().red()),
        Level::Warn => ("⚠️", level.as_str().yellow()),
        Level::Info => ("✔️", level.as_str().green()),
        Level::Debug => ("🔍", level.as_str().blue()),
        Level::Trace => ("🔬", level.as_str().purple()),
    };
    writeln!(
        buf,
        "{} {} {:>7} {} [{}] {}",
        chrono::Utc::now().format("%H:%M:%S").to_string().dimmed(),
        emoji,
        std::process::id().to_string().dimmed(),
        record.target().cyan(),
        colored_level,
        record.args()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_is_an_error() {
        // Whichever call installs the logger first, the next one must fail
        // gracefully instead of panicking
        let _ = init_logger_with(LevelFilter::Info, LogFormat::Plain, Target::Stderr);
        let result = init_logger_with(LevelFilter::Warn, LogFormat::Json, Target::Stdout);
        assert!(matches!(result, Err(InitializationError::LoggerError(_))));
    }
}
