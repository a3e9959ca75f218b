//! Per-connection request handling: interception and forwarding.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsAcceptor;

use super::headers::prepare_request_headers;
use super::response::{self, Diagnostics, ProxyBody, Relayed};
use super::ProxyState;
use crate::error_handling::{categorize_transport_error, TransportFault};
use crate::initialization::UpstreamPools;

/// State of one accepted client connection.
///
/// Cloned into every request of the connection, including the requests
/// served inside a `CONNECT` tunnel.
#[derive(Clone)]
pub(crate) struct Connection {
    pub state: Arc<ProxyState>,
    pub pools: UpstreamPools,
    pub peer: SocketAddr,
    /// Authority of the `CONNECT` tunnel this connection is serving, if any
    pub tunnel: Option<Arc<str>>,
}

/// A transport fault together with the error that caused it.
struct Failure {
    fault: TransportFault,
    detail: String,
}

impl Failure {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        Self {
            fault: categorize_transport_error(err),
            detail: error_chain(err),
        }
    }
}

/// Renders an error and all of its sources on one line.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Serves HTTP/1.1 on `io` until the client disconnects.
pub(crate) async fn serve_connection<I>(io: I, conn: Connection)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let state = conn.state.clone();
    let peer = conn.peer;
    let service = service_fn(move |req: Request<Incoming>| {
        let conn = conn.clone();
        async move { Ok::<_, Infallible>(handle(req, conn).await) }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await
    {
        if !err.is_incomplete_message() {
            state
                .dedup
                .report(log::Level::Debug, format!("{peer} - connection error: {err}"));
        }
    }
}

/// Boxed form of [`serve_connection`] for tunnels, which are served from
/// inside a request handler.
fn serve_tunnel<I>(io: I, conn: Connection) -> Pin<Box<dyn Future<Output = ()> + Send>>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    Box::pin(serve_connection(io, conn))
}

async fn handle(req: Request<Incoming>, conn: Connection) -> hyper::Response<ProxyBody> {
    if req.method() == Method::CONNECT {
        intercept(req, conn).await
    } else {
        forward(req, &conn).await
    }
}

/// Answers a `CONNECT` and serves the decrypted tunnel once upgraded.
async fn intercept(req: Request<Incoming>, conn: Connection) -> Response<ProxyBody> {
    let Some(authority) = req.uri().authority().cloned() else {
        return response::plain_error(StatusCode::BAD_REQUEST);
    };
    let hostname = authority.host().to_string();

    let ca = conn.state.ca.clone();
    let leaf = match tokio::task::spawn_blocking(move || ca.leaf_for(&hostname)).await {
        Ok(Ok(leaf)) => leaf,
        Ok(Err(err)) => {
            log::error!("CONNECT {authority} - certificate issuance failed: {err}");
            return response::plain_error(StatusCode::BAD_GATEWAY);
        }
        Err(err) => {
            log::error!("CONNECT {authority} - certificate task failed: {err}");
            return response::plain_error(StatusCode::BAD_GATEWAY);
        }
    };

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                log::debug!("CONNECT {authority} - upgrade failed: {err}");
                return;
            }
        };
        let acceptor = TlsAcceptor::from(leaf.server_config.clone());
        let tls = match acceptor.accept(TokioIo::new(upgraded)).await {
            Ok(tls) => tls,
            Err(err) => {
                // Legacy clients and alert-on-untrusted-root end up here; only
                // this tunnel is affected
                log::debug!("CONNECT {authority} - TLS handshake failed: {err}");
                return;
            }
        };
        let tunnel = Connection {
            tunnel: Some(Arc::from(authority.as_str())),
            ..conn
        };
        serve_tunnel(tls, tunnel).await;
    });

    response::connection_established()
}

/// Resolves the absolute URL a proxied request targets.
///
/// Absolute-form targets are used as they are. Origin-form targets are
/// completed from the `Host` header, falling back to the tunnel authority,
/// with `https` inside a tunnel and `http` otherwise.
pub(crate) fn target_url(uri: &hyper::Uri, headers: &HeaderMap, tunnel: Option<&str>) -> Option<String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Some(uri.to_string());
    }
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|h| !h.is_empty())
        .or(tunnel)?;
    let scheme = if tunnel.is_some() { "https" } else { "http" };
    Some(format!("{scheme}://{host}{path}"))
}

async fn forward(req: Request<Incoming>, conn: &Connection) -> Response<ProxyBody> {
    let Some(url) = target_url(req.uri(), req.headers(), conn.tunnel.as_deref()) else {
        return response::plain_error(StatusCode::BAD_REQUEST);
    };
    let (parts, body) = req.into_parts();
    let method = parts.method;
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            log::debug!("{method} {url} - failed to read request body: {err}");
            return response::plain_error(StatusCode::BAD_REQUEST);
        }
    };
    let mut headers = parts.headers;
    prepare_request_headers(&mut headers);

    match fetch(conn, &method, &url, &headers, body).await {
        Ok(relayed) => {
            let stats = &conn.state.stats;
            stats.record_forwarded();
            if relayed.diagnostics.ssl_error {
                stats.record_ssl_fallback();
            }
            if relayed.diagnostics.invalid_response {
                stats.record_truncated();
            }
            log::debug!("{method} {url} - {}", relayed.status);
            response::relay(relayed)
        }
        Err(failure) => {
            conn.state.stats.record_fault(failure.fault);
            conn.state.dedup.report(
                log::Level::Warn,
                format!("{method} {url} - {}: {}", failure.fault, failure.detail),
            );
            response::synthetic(failure.fault)
        }
    }
}

async fn send(
    client: &reqwest::Client,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut request = client.request(method.clone(), url).headers(headers.clone());
    if !body.is_empty() {
        request = request.body(body.clone());
    }
    request.send().await
}

/// Performs the upstream request with the strict pool, retrying once through
/// the relaxed pool on a TLS failure, and reads the whole body.
async fn fetch(
    conn: &Connection,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Relayed, Failure> {
    let mut diagnostics = Diagnostics::default();
    let mut started = Instant::now();

    let mut upstream = match send(&conn.pools.strict, method, url, headers, &body).await {
        Ok(upstream) => upstream,
        Err(err) => {
            let failure = Failure::from_reqwest(&err);
            if failure.fault != TransportFault::Tls {
                return Err(failure);
            }
            log::debug!("{method} {url} - retrying without verification: {}", failure.detail);
            started = Instant::now();
            diagnostics.ssl_error = true;
            send(&conn.pools.relaxed, method, url, headers, &body)
                .await
                .map_err(|err| Failure::from_reqwest(&err))?
        }
    };

    diagnostics.response_time = started.elapsed();
    diagnostics.remote = upstream.remote_addr();
    let status = upstream.status();
    let response_headers = upstream.headers().clone();

    let mut buffer = Vec::new();
    loop {
        match upstream.chunk().await {
            Ok(Some(chunk)) => buffer.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(err) => {
                let failure = Failure::from_reqwest(&err);
                if failure.fault == TransportFault::Timeout {
                    return Err(failure);
                }
                log::debug!("{method} {url} - body truncated: {}", failure.detail);
                diagnostics.invalid_response = true;
                break;
            }
        }
    }

    Ok(Relayed {
        status,
        headers: response_headers,
        body: Bytes::from(buffer),
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn host(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_target_url_absolute_form() {
        let uri: hyper::Uri = "http://example.org/a?b=c".parse().unwrap();
        assert_eq!(
            target_url(&uri, &HeaderMap::new(), None).as_deref(),
            Some("http://example.org/a?b=c")
        );
    }

    #[test]
    fn test_target_url_origin_form_in_tunnel() {
        let uri: hyper::Uri = "/CHEBI:15377".parse().unwrap();
        assert_eq!(
            target_url(&uri, &host("example.org"), Some("example.org:443")).as_deref(),
            Some("https://example.org/CHEBI:15377")
        );
        assert_eq!(
            target_url(&uri, &HeaderMap::new(), Some("example.org:8443")).as_deref(),
            Some("https://example.org:8443/CHEBI:15377")
        );
    }

    #[test]
    fn test_target_url_origin_form_plain() {
        let uri: hyper::Uri = "/".parse().unwrap();
        assert_eq!(
            target_url(&uri, &host("localhost:8000"), None).as_deref(),
            Some("http://localhost:8000/")
        );
        assert_eq!(target_url(&uri, &HeaderMap::new(), None), None);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        #[derive(Debug)]
        struct Outer(std::io::Error);
        impl std::fmt::Display for Outer {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("error sending request")
            }
        }
        impl StdError for Outer {
            fn source(&self) -> Option<&(dyn StdError + 'static)> {
                Some(&self.0)
            }
        }

        let err = Outer(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(error_chain(&err), "error sending request: refused");
    }
}
