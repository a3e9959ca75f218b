//! HTTP client initialization.
//!
//! This module builds the upstream transport pools used by the proxy and the
//! proxied client used by the HTTP browser driver.

use std::time::Duration;

use reqwest::ClientBuilder;

use crate::config::DEFAULT_USER_AGENT;

/// A pair of upstream transport pools differing only in TLS verification.
///
/// The verification mode is a property of the pool instance, so strict and
/// relaxed requests can run concurrently without touching process-wide state.
/// Each proxy connection owns one pair; pools are never shared across handlers.
#[derive(Clone, Debug)]
pub struct UpstreamPools {
    /// Full certificate and hostname verification
    pub strict: reqwest::Client,
    /// Accepts any certificate the server presents
    pub relaxed: reqwest::Client,
}

fn upstream_builder(timeout: Duration) -> ClientBuilder {
    ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .http1_only()
}

/// Initializes the strict and relaxed upstream pools.
///
/// Both clients:
/// - never follow redirects (the browser sees every hop)
/// - ignore system proxy settings
/// - bound connect and each read by `timeout`
/// - speak HTTP/1.1 to the origin
///
/// # Arguments
///
/// * `timeout` - Connect and read timeout for every upstream request
///
/// # Errors
///
/// Returns a `reqwest::Error` if client creation fails.
pub fn init_upstream_pools(timeout: Duration) -> Result<UpstreamPools, reqwest::Error> {
    let strict = upstream_builder(timeout).build()?;
    let relaxed = upstream_builder(timeout)
        .danger_accept_invalid_certs(true)
        .build()?;
    Ok(UpstreamPools { strict, relaxed })
}

/// Initializes the client used by the HTTP browser driver.
///
/// Every request goes through the intercepting proxy at `proxy`. The proxy's
/// leaf certificates are signed by a per-run root, so server certificates are
/// not verified. Redirects are followed manually by the driver.
///
/// # Arguments
///
/// * `proxy` - `host:port` of the intercepting proxy
/// * `timeout` - Overall timeout of one request
///
/// # Errors
///
/// Returns a `reqwest::Error` if the proxy address is invalid or client creation fails.
pub fn init_driver_client(proxy: &str, timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    ClientBuilder::new()
        .proxy(reqwest::Proxy::all(format!("http://{proxy}"))?)
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .user_agent(DEFAULT_USER_AGENT)
        .http1_only()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_upstream_pools() {
        crate::initialization::init_crypto_provider();
        assert!(init_upstream_pools(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_init_driver_client() {
        crate::initialization::init_crypto_provider();
        assert!(init_driver_client("127.0.0.1:8080", Duration::from_secs(5)).is_ok());
    }
}
