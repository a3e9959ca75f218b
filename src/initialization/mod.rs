//! Process initialization and resource setup.
//!
//! This module provides functions to initialize shared resources:
//! - Logger (stderr for the orchestrator and proxy, stdout for workers)
//! - Crypto provider for `rustls`
//! - Upstream transport pools and the proxied driver client
//! - DNS resolver for direct fetches
//!
//! All initialization functions return proper error types for error handling.

mod client;
mod logger;
mod resolver;

use rustls::crypto::{ring::default_provider, CryptoProvider};

// Re-export public API
pub use client::{init_driver_client, init_upstream_pools, UpstreamPools};
pub use logger::init_logger_with;
pub use resolver::init_resolver;

/// Initializes the crypto provider for TLS operations.
///
/// Configures the global crypto provider for `rustls`. This must be called before
/// any TLS connection is established or any `ServerConfig` is built.
pub fn init_crypto_provider() {
    // Reinstalling the provider is harmless
    let _ = CryptoProvider::install_default(default_provider());
}
