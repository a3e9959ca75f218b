//! Application configuration and constants.
//!
//! This module provides:
//! - Configuration constants (timeouts, deadline factors, file names)
//! - Diagnostic HTTP header names
//! - CLI option types and library-level configuration structs

mod constants;
mod headers;
mod types;

// Re-export all constants
pub use constants::*;
pub use headers::*;
pub use types::{
    Command, LogFormat, LogLevel, Opt, OrchestratorConfig, ProxyConfig, ProxyMode, ScrapeConfig,
    WorkerConfig, WorkerLog,
};
