//! Error categorization and retry strategy.
//!
//! This module maps upstream `reqwest` failures onto the fixed transport-fault
//! vocabulary and configures the retry strategy for transient driver failures.

use std::error::Error as StdError;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

use super::types::TransportFault;

/// Creates an exponential backoff retry strategy.
///
/// Returns a retry strategy configured with:
/// - Initial delay: `RETRY_INITIAL_DELAY_MS` milliseconds
/// - Backoff factor: `RETRY_FACTOR` (doubles delay each retry)
/// - Maximum delay: `RETRY_MAX_DELAY_SECS` seconds
/// - Maximum attempts: `RETRY_MAX_ATTEMPTS`
///
/// # Returns
///
/// A retry strategy iterator ready for use with `tokio_retry::RetryIf`.
/// Only transient driver failures are retried; transport faults never are.
pub fn get_retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(crate::config::RETRY_INITIAL_DELAY_MS)
        .factor(crate::config::RETRY_FACTOR)
        .max_delay(Duration::from_secs(crate::config::RETRY_MAX_DELAY_SECS))
        .take(crate::config::RETRY_MAX_ATTEMPTS)
}

/// Returns true if the error chain contains a TLS failure.
///
/// Walks the `source()` chain looking for a `rustls::Error`. Falls back to
/// matching the rendered messages for handshake failures surfaced only as text.
pub fn is_tls_error(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if wraps_rustls_error(err) {
            return true;
        }
        // reqwest's own message embeds the request URL
        if err.downcast_ref::<reqwest::Error>().is_none() {
            let message = err.to_string().to_ascii_lowercase();
            if message.contains("certificate")
                || message.contains("handshake")
                || message.contains("tls")
                || message.contains("ssl")
            {
                return true;
            }
        }
        current = err.source();
    }
    false
}

/// Returns true if `error` is a `rustls::Error`, possibly nested in any
/// number of `std::io::Error` layers.
///
/// `io::Error::source()` skips the error it wraps, so the chain is followed
/// through `get_ref()` instead.
fn wraps_rustls_error(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        if err.downcast_ref::<rustls::Error>().is_some() {
            return true;
        }
        current = err
            .downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::get_ref)
            .map(|inner| inner as &(dyn StdError + 'static));
    }
    false
}

/// Categorizes a `reqwest::Error` into a `TransportFault`.
///
/// TLS failures are reported as `Tls` whatever else the error says, so the
/// caller can decide on a relaxed retry. Any other connect-time failure
/// (unresolvable host, refused connection, connect timeout) is a `Dns` fault.
/// A timeout after the connection was established is a `Timeout`; everything
/// else is an `InvalidResponse`.
///
/// # Arguments
///
/// * `error` - The `reqwest::Error` to categorize
///
/// # Returns
///
/// The appropriate `TransportFault` for the error.
pub fn categorize_transport_error(error: &reqwest::Error) -> TransportFault {
    if is_tls_error(error) {
        TransportFault::Tls
    } else if error.is_connect() {
        TransportFault::Dns
    } else if error.is_timeout() {
        TransportFault::Timeout
    } else {
        TransportFault::InvalidResponse
    }
}
