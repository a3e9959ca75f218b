//! DNS resolver initialization.
//!
//! This module provides the resolver used by direct (non-proxied) fetches,
//! where name resolution failures must be told apart from connect failures.

use std::sync::Arc;
use std::time::Duration;

use crate::error_handling::InitializationError;
use trust_dns_resolver::TokioAsyncResolver;

/// Initializes the DNS resolver for hostname lookups.
///
/// Uses the system configuration when it can be read and falls back to the
/// default public resolvers otherwise. Each query is bounded by `timeout` and
/// attempted at most twice so a dead resolver surfaces as a DNS failure well
/// inside the job's deadline.
///
/// # Arguments
///
/// * `timeout` - Per-query timeout
///
/// # Returns
///
/// A configured `TokioAsyncResolver` wrapped in `Arc` for sharing across tasks.
///
/// # Errors
///
/// Returns `InitializationError::DnsResolverError` if neither configuration can be used.
pub fn init_resolver(timeout: Duration) -> Result<Arc<TokioAsyncResolver>, InitializationError> {
    use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
    use trust_dns_resolver::system_conf::read_system_conf;

    let (config, mut opts) = match read_system_conf() {
        Ok(system) => system,
        Err(e) => {
            log::debug!("Falling back to default resolver configuration: {e}");
            (ResolverConfig::default(), ResolverOpts::default())
        }
    };
    if config.name_servers().is_empty() {
        return Err(InitializationError::DnsResolverError(
            "no name servers configured".to_string(),
        ));
    }
    opts.timeout = timeout;
    opts.attempts = 2;

    Ok(Arc::new(TokioAsyncResolver::tokio(config, opts)))
}
