// Shared test helpers: a running proxy and misbehaving origins.
//
// This module provides common utilities used across multiple test files to reduce duplication.

#![allow(dead_code)] // Each test file uses a different subset

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use resource_probe::ca::CertificateAuthority;
use resource_probe::config::ProxyConfig;
use resource_probe::error_handling::ProxyStats;
use resource_probe::initialization::{init_crypto_provider, init_driver_client};
use resource_probe::proxy::ProxyServer;

/// A proxy running on an ephemeral port for the duration of a test.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub stats: Arc<ProxyStats>,
    // Keeps the certificate directory alive
    _certs: TempDir,
}

impl TestProxy {
    /// `host:port` form of the listening address.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// A client sending every request through this proxy.
    pub fn client(&self) -> reqwest::Client {
        init_driver_client(&self.address(), Duration::from_secs(10))
            .expect("Failed to build proxied client")
    }
}

/// Starts a proxy with the given upstream timeout.
pub async fn start_proxy(timeout: Duration) -> TestProxy {
    init_crypto_provider();
    let certs = tempfile::tempdir().expect("Failed to create certificate directory");
    let ca = CertificateAuthority::new(certs.path()).expect("Failed to create authority");
    let config = ProxyConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        timeout,
    };
    let server = ProxyServer::bind(config, Arc::new(ca))
        .await
        .expect("Failed to bind proxy");
    let addr = server.local_addr().expect("Proxy has no address");
    let stats = server.stats();
    tokio::spawn(server.run());
    TestProxy {
        addr,
        stats,
        _certs: certs,
    }
}

/// An address nobody listens on.
pub fn refused_address() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("Listener has no address")
}

/// An origin that accepts connections and never answers.
pub async fn silent_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Listener has no address");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// An origin that answers every connection with bytes that are neither HTTP nor TLS.
pub async fn garbage_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Listener has no address");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = stream.write_all(b"GARBAGE GARBAGE GARBAGE\r\n\r\n").await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

async fn read_request_head<S: AsyncReadExt + Unpin>(stream: &mut S) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }
    Ok(())
}

/// What a scripted origin does once it has read the request head.
#[derive(Clone, Copy)]
pub enum Reply {
    /// Writes the bytes and closes the connection
    Close(&'static [u8]),
    /// Writes the bytes and keeps the connection open without another byte
    Stall(&'static [u8]),
}

async fn answer<S>(mut stream: S, reply: Reply)
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    if read_request_head(&mut stream).await.is_err() {
        return;
    }
    match reply {
        Reply::Close(bytes) => {
            let _ = stream.write_all(bytes).await;
            let _ = stream.shutdown().await;
        }
        Reply::Stall(bytes) => {
            let _ = stream.write_all(bytes).await;
            let _ = stream.flush().await;
            std::future::pending::<()>().await;
        }
    }
}

/// A plain HTTP origin answering every request with `reply`.
pub async fn scripted_origin(reply: Reply) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Listener has no address");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(answer(stream, reply));
        }
    });
    addr
}

/// An HTTPS origin answering every request with `reply`, behind a certificate
/// signed by an authority nobody trusts.
///
/// Returns the address and the directory holding the untrusted authority.
pub async fn scripted_tls_origin(reply: Reply) -> (SocketAddr, TempDir) {
    init_crypto_provider();
    let certs = tempfile::tempdir().expect("Failed to create certificate directory");
    let ca = CertificateAuthority::new(certs.path()).expect("Failed to create authority");
    let leaf = ca.leaf_for("127.0.0.1").expect("Failed to issue origin certificate");
    let acceptor = TlsAcceptor::from(leaf.server_config.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Listener has no address");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // The strict pool aborts the handshake; only the relaxed one gets here
                if let Ok(tls) = acceptor.accept(stream).await {
                    answer(tls, reply).await;
                }
            });
        }
    });
    (addr, certs)
}

/// An HTTPS origin with an untrusted certificate answering `200` with `body`.
pub async fn untrusted_tls_origin(body: &'static str) -> (SocketAddr, TempDir) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    scripted_tls_origin(Reply::Close(Box::leak(response.into_bytes().into_boxed_slice()))).await
}

/// Waits until `addr` accepts connections.
pub async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{addr} never started accepting connections");
}
