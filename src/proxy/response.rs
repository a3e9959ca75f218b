//! Construction of relayed and synthetic proxy responses.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderMap, HeaderValue, CONNECTION};
use hyper::{Response, StatusCode};

use super::headers::prepare_response_headers;
use crate::config::{
    DIAGNOSTIC_TRUE, HEADER_X_INVALID_RESPONSE, HEADER_X_IP_PORT, HEADER_X_RESPONSE_TIME,
    HEADER_X_SSL_ERROR,
};
use crate::error_handling::TransportFault;

pub(crate) type ProxyBody = Full<Bytes>;

/// Diagnostics attached to a relayed origin response.
#[derive(Debug, Clone, Default)]
pub(crate) struct Diagnostics {
    /// Time from sending the request to receiving the response head
    pub response_time: Duration,
    pub remote: Option<SocketAddr>,
    /// The response was obtained through the relaxed pool
    pub ssl_error: bool,
    /// The body was cut short by a protocol error
    pub invalid_response: bool,
}

/// An origin response with its body fully read.
pub(crate) struct Relayed {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub diagnostics: Diagnostics,
}

fn mark(headers: &mut HeaderMap, name: &'static str) {
    headers.insert(name, HeaderValue::from_static(DIAGNOSTIC_TRUE));
}

/// Builds the response relayed to the client for an origin response.
pub(crate) fn relay(relayed: Relayed) -> Response<ProxyBody> {
    let Relayed {
        status,
        mut headers,
        body,
        diagnostics,
    } = relayed;

    prepare_response_headers(&mut headers, body.len());

    if diagnostics.ssl_error {
        mark(&mut headers, HEADER_X_SSL_ERROR);
    }
    if diagnostics.invalid_response {
        mark(&mut headers, HEADER_X_INVALID_RESPONSE);
    }
    if let Ok(value) = HeaderValue::from_str(&diagnostics.response_time.as_secs_f64().to_string()) {
        headers.insert(HEADER_X_RESPONSE_TIME, value);
    }
    if let Some(remote) = diagnostics.remote {
        // SocketAddr renders IPv6 as [ip]:port
        if let Ok(value) = HeaderValue::from_str(&remote.to_string()) {
            headers.insert(HEADER_X_IP_PORT, value);
        }
    }

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Builds the synthetic response describing a transport fault.
pub(crate) fn synthetic(fault: TransportFault) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() =
        StatusCode::from_u16(fault.status()).unwrap_or(StatusCode::NO_CONTENT);
    if let Some(reason) = fault.reason() {
        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(reason.as_bytes()));
    }
    if let Some(header) = fault.marker_header() {
        mark(response.headers_mut(), header);
    }
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Builds an error response for requests the proxy cannot interpret.
pub(crate) fn plain_error(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Builds the `200 Connection Established` reply to a `CONNECT`.
pub(crate) fn connection_established() -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(b"Connection Established"));
    response
}
