//! Error type definitions.
//!
//! This module defines the error enums of every subsystem and the fixed
//! vocabulary of transport faults the proxy and the FTP fetch report.

use std::path::PathBuf;
use std::time::Duration;

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

use crate::config::{
    HEADER_X_DNS_ERROR, HEADER_X_INVALID_RESPONSE, HEADER_X_SSL_ERROR, HTTP_STATUS_NO_CONTENT,
    HTTP_STATUS_REQUEST_TIMEOUT,
};

/// Error types for initialization failures.
///
/// These are setup faults: they abort the run before any job is scheduled.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing an HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),

    /// Error initializing the DNS resolver.
    #[error("DNS resolver initialization error: {0}")]
    DnsResolverError(String),

    /// The intercepting proxy could not be started or reached.
    #[error("Proxy startup error: {0}")]
    ProxyStartupError(String),

    /// The dump directory could not be prepared.
    #[error("Dump directory error at {path}: {source}")]
    DumpDirectoryError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fresh run was pointed at a dump directory that still holds files.
    #[error("Dump directory {0} is not empty; pass --force to clear it or --resume to continue")]
    DumpNotEmpty(PathBuf),
}

/// Error types for certificate authority operations.
#[derive(Error, Debug)]
pub enum CertificateError {
    /// Key or certificate generation failed.
    #[error("Certificate generation error: {0}")]
    Generation(#[from] rcgen::Error),

    /// A certificate could not be written to the certificate directory.
    #[error("Failed to write certificate {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The generated material was rejected when building the TLS configuration.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// The requested hostname cannot be used as a certificate subject.
    #[error("Invalid certificate hostname: {0:?}")]
    InvalidHostname(String),

    /// The issuance task panicked or was cancelled.
    #[error("Certificate issuance task failed: {0}")]
    Task(String),
}

/// Error types for a navigation through the browser driver.
#[derive(Error, Debug)]
pub enum NavigationError {
    /// The browser aborted the navigation, typically because the response was
    /// treated as a download.
    #[error("net::ERR_ABORTED at {0}")]
    Aborted(String),

    /// The driver reported a terminal request failure for the main document.
    #[error("{error_text} at {url}")]
    RequestFailed { url: String, error_text: String },

    /// The navigation did not reach the loaded state before the deadline.
    #[error("Navigation timeout of {0:?} exceeded")]
    Timeout(Duration),

    /// The driver itself misbehaved (lost connection, closed session).
    #[error("Browser driver error: {0}")]
    Driver(String),

    /// The URL scheme cannot be probed.
    #[error("Unknown resource scheme {0:?}")]
    UnsupportedScheme(String),

    /// The download scratch directory could not be used.
    #[error("Download directory error: {0}")]
    Download(#[from] std::io::Error),
}

impl NavigationError {
    /// Returns true for failures that are worth another browser session.
    ///
    /// Page-level failures are retried as well as driver failures: a flaky
    /// origin often succeeds on a second load. Timeouts are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NavigationError::Driver(_)
                | NavigationError::Aborted(_)
                | NavigationError::RequestFailed { .. }
        )
    }
}

/// Error types for Ping Log and progress log access.
#[derive(Error, Debug)]
pub enum PingLogError {
    /// I/O error on the log file or its lock.
    #[error("Ping log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("Ping serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error types for reading job lists and the progress log.
#[derive(Error, Debug)]
pub enum JobFileError {
    /// The job list could not be read.
    #[error("Failed to read job list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job list is not a JSON array of job tuples.
    #[error("Malformed job list: {0}")]
    Parse(#[from] serde_json::Error),

    /// A progress line is not a valid job tuple.
    #[error("Corrupted progress log at line {line}: {source}")]
    CorruptProgress {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// `--resume` was requested but no progress log exists.
    #[error("Cannot resume: no progress log at {0}")]
    MissingProgress(PathBuf),
}

/// Transport faults recognised by the proxy and the direct FTP fetch.
///
/// Each variant maps to exactly one synthetic response shape: a status code,
/// an optional reason phrase and an optional diagnostic marker header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum TransportFault {
    /// Connect-time name or host resolution failure
    Dns,
    /// Read timeout after the connection was established
    Timeout,
    /// TLS failure on both the strict and the relaxed pool
    Tls,
    /// Any other protocol-level failure before headers were sent
    InvalidResponse,
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TransportFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportFault::Dns => "DNS error",
            TransportFault::Timeout => "Read timeout",
            TransportFault::Tls => "SSL error",
            TransportFault::InvalidResponse => "Invalid response",
        }
    }

    /// Status code of the synthetic response.
    pub fn status(&self) -> u16 {
        match self {
            TransportFault::Timeout => HTTP_STATUS_REQUEST_TIMEOUT,
            _ => HTTP_STATUS_NO_CONTENT,
        }
    }

    /// Custom reason phrase of the synthetic response, if any.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            TransportFault::Dns => Some("DNS Error"),
            TransportFault::Timeout => None,
            TransportFault::Tls => Some("SSL Error"),
            TransportFault::InvalidResponse => Some("Protocol Error"),
        }
    }

    /// Diagnostic marker header of the synthetic response, if any.
    pub fn marker_header(&self) -> Option<&'static str> {
        match self {
            TransportFault::Dns => Some(HEADER_X_DNS_ERROR),
            TransportFault::Timeout => None,
            TransportFault::Tls => Some(HEADER_X_SSL_ERROR),
            TransportFault::InvalidResponse => Some(HEADER_X_INVALID_RESPONSE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_transport_fault_table() {
        assert_eq!(TransportFault::Dns.status(), 204);
        assert_eq!(TransportFault::Dns.marker_header(), Some("X-DNS-Error"));
        assert_eq!(TransportFault::Timeout.status(), 408);
        assert_eq!(TransportFault::Timeout.marker_header(), None);
        assert_eq!(TransportFault::Tls.status(), 204);
        assert_eq!(TransportFault::Tls.marker_header(), Some("X-SSL-Error"));
        assert_eq!(TransportFault::InvalidResponse.status(), 204);
        assert_eq!(
            TransportFault::InvalidResponse.marker_header(),
            Some("X-Invalid-Response")
        );
    }

    #[test]
    fn test_only_timeout_uses_standard_reason() {
        for fault in TransportFault::iter() {
            assert_eq!(
                fault.reason().is_none(),
                fault == TransportFault::Timeout,
                "{:?}",
                fault
            );
        }
    }

    #[test]
    fn test_all_faults_have_string_representation() {
        for fault in TransportFault::iter() {
            assert!(!fault.as_str().is_empty(), "{:?}", fault);
            assert_eq!(fault.to_string(), fault.as_str());
        }
    }

    #[test]
    fn test_navigation_error_transience() {
        assert!(NavigationError::Driver("session closed".into()).is_transient());
        assert!(NavigationError::Aborted("https://a.example/".into()).is_transient());
        assert!(!NavigationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!NavigationError::UnsupportedScheme("gopher".into()).is_transient());
    }

    #[test]
    fn test_navigation_error_display_matches_browser_wording() {
        let err = NavigationError::Aborted("https://a.example/file.pdf".into());
        assert_eq!(err.to_string(), "net::ERR_ABORTED at https://a.example/file.pdf");

        let err = NavigationError::RequestFailed {
            url: "https://a.example/".into(),
            error_text: "net::ERR_CONNECTION_RESET".into(),
        };
        assert_eq!(err.to_string(), "net::ERR_CONNECTION_RESET at https://a.example/");
    }
}
