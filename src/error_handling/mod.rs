//! Error handling and proxy statistics.
//!
//! This module provides:
//! - Error type definitions for every subsystem
//! - Transport-fault categorization of upstream errors
//! - Proxy outcome statistics
//! - Retry strategy configuration
//!
//! Failures fall into three classes:
//! - **Transport faults**: DNS, TLS, timeout and protocol failures. These are
//!   valid probe outcomes and are encoded into synthetic responses, never raised.
//! - **Process faults**: hung or crashed workers. The job is dropped.
//! - **Setup faults**: CA generation, unwritable dump directory, unreachable
//!   proxy. Fatal to the whole run.

mod categorization;
mod stats;
mod types;

// Re-export public API
pub use categorization::{categorize_transport_error, get_retry_strategy, is_tls_error};
pub use stats::ProxyStats;
pub use types::{
    CertificateError, InitializationError, JobFileError, NavigationError, PingLogError,
    TransportFault,
};
