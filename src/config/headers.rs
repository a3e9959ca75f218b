//! HTTP header name constants.
//!
//! This module defines the diagnostic headers the proxy attaches to every response
//! and the header sets it filters while forwarding. The diagnostic header names and
//! values are a wire contract with downstream classification and must stay bit-exact.

/// Upstream round-trip time in seconds, as a decimal
pub const HEADER_X_RESPONSE_TIME: &str = "X-Response-Time";
/// Remote endpoint of the upstream connection (`ip:port` or `[ipv6]:port`)
pub const HEADER_X_IP_PORT: &str = "X-IP-Port";
/// Name resolution / connect-time failure marker
pub const HEADER_X_DNS_ERROR: &str = "X-DNS-Error";
/// TLS verification or handshake failure marker
pub const HEADER_X_SSL_ERROR: &str = "X-SSL-Error";
/// Protocol error marker (malformed or truncated upstream response)
pub const HEADER_X_INVALID_RESPONSE: &str = "X-Invalid-Response";
/// Request timeout marker recognised when converting responses into redirects
pub const HEADER_X_REQUEST_TIMEOUT: &str = "X-Request-Timeout";

/// Value carried by every boolean diagnostic header
pub const DIAGNOSTIC_TRUE: &str = "true";

/// Hop-by-hop headers stripped in both directions.
///
/// See RFC 2616 section 13.5.1.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Content codings the proxy lets clients negotiate with the origin
pub const SUPPORTED_ENCODINGS: &[&str] = &["identity", "gzip", "x-gzip", "deflate"];

/// Response headers that mark a destructive proxy-side failure
pub const DESTRUCTIVE_ERROR_HEADERS: &[&str] = &[
    HEADER_X_SSL_ERROR,
    HEADER_X_INVALID_RESPONSE,
    HEADER_X_DNS_ERROR,
    HEADER_X_REQUEST_TIMEOUT,
];
