//! TLS-intercepting forward proxy.
//!
//! This module provides an HTTP/1.1 forward proxy that:
//! - forwards plain `http` requests given in absolute form
//! - intercepts `CONNECT` tunnels with per-hostname leaf certificates signed
//!   by the run's certificate authority, and forwards the decrypted requests
//! - retries TLS failures once without certificate verification
//! - annotates every relayed response with diagnostic headers
//! - turns every transport failure into a synthetic response from a fixed
//!   status/header vocabulary, so clients never see a broken connection
//!
//! Each accepted connection runs in its own task with its own upstream pools.
//! A failing connection is logged and dropped without affecting the others.

mod dedup;
mod handler;
mod headers;
mod response;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use crate::ca::CertificateAuthority;
use crate::config::ProxyConfig;
use crate::error_handling::{InitializationError, ProxyStats};
use crate::initialization::init_upstream_pools;

// Re-export public API
pub use dedup::ErrorDeduper;
pub use headers::{prepare_request_headers, restrict_accept_encoding, strip_hop_by_hop};

/// State shared by every connection of one proxy.
pub(crate) struct ProxyState {
    pub ca: Arc<CertificateAuthority>,
    pub config: ProxyConfig,
    pub stats: Arc<ProxyStats>,
    pub dedup: ErrorDeduper,
}

/// A bound, not yet running proxy.
pub struct ProxyServer {
    listener: TcpListener,
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `InitializationError::ProxyStartupError` if the address cannot be bound.
    pub async fn bind(
        config: ProxyConfig,
        ca: Arc<CertificateAuthority>,
    ) -> Result<Self, InitializationError> {
        let listener = TcpListener::bind(config.listen).await.map_err(|e| {
            InitializationError::ProxyStartupError(format!("cannot bind {}: {e}", config.listen))
        })?;
        Ok(Self {
            listener,
            state: Arc::new(ProxyState {
                ca,
                config,
                stats: Arc::new(ProxyStats::new()),
                dedup: ErrorDeduper::new(),
            }),
        })
    }

    /// Address the proxy is listening on.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Counters shared with the running accept loop.
    pub fn stats(&self) -> Arc<ProxyStats> {
        self.state.stats.clone()
    }

    /// Runs the accept loop forever.
    pub async fn run(self) {
        let ProxyServer { listener, state } = self;
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    state
                        .dedup
                        .report(log::Level::Error, format!("accept failed: {e}"));
                    continue;
                }
            };
            let state = state.clone();
            tokio::spawn(async move {
                let pools = match init_upstream_pools(state.config.timeout) {
                    Ok(pools) => pools,
                    Err(e) => {
                        log::error!("{peer} - cannot build upstream pools: {e}");
                        return;
                    }
                };
                let conn = handler::Connection {
                    state,
                    pools,
                    peer,
                    tunnel: None,
                };
                handler::serve_connection(stream, conn).await;
            });
        }
    }

    /// Runs the accept loop until `shutdown` completes, then logs statistics.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        let stats = self.stats();
        tokio::select! {
            _ = self.run() => {}
            _ = shutdown => {
                log::info!("Proxy shutting down");
            }
        }
        stats.log_summary();
    }
}

/// Runs a standalone proxy until Ctrl-C.
///
/// Certificates are written to a temporary directory removed on exit unless
/// `cert_dir` is given.
///
/// # Errors
///
/// Returns an error if the certificate authority cannot be created or the
/// listening socket cannot be bound.
pub async fn serve(config: ProxyConfig, cert_dir: Option<&Path>) -> anyhow::Result<()> {
    let temp_dir;
    let cert_dir = match cert_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            temp_dir = tempfile::Builder::new()
                .prefix("resource_probe_certs")
                .tempdir()
                .context("Failed to create certificate directory")?;
            temp_dir.path().to_path_buf()
        }
    };

    let ca = CertificateAuthority::new(&cert_dir).context("Failed to create certificate authority")?;
    log::debug!("Root certificate written to {}", ca.ca_certificate_path().display());
    let server = ProxyServer::bind(config.clone(), Arc::new(ca)).await?;
    let addr = server.local_addr()?;
    log::info!(
        "Serving HTTPS proxy on {} (upstream timeout {:?})",
        addr,
        config.timeout
    );

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    log::info!("HTTPS proxy on {addr} was shut down");
    Ok(())
}
