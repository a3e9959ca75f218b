//! Header filtering for forwarded requests and relayed responses.

use hyper::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH, HOST};

use crate::config::{HOP_BY_HOP_HEADERS, SUPPORTED_ENCODINGS};

/// Removes hop-by-hop headers (RFC 2616 section 13.5.1).
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Restricts `Accept-Encoding` to the codings the proxy can relay.
///
/// Tokens are compared verbatim, so parameterised entries such as
/// `gzip;q=0.8` are dropped. If nothing survives, the header is kept with an
/// empty value, which asks the origin for the identity coding.
pub fn restrict_accept_encoding(headers: &mut HeaderMap) {
    let Some(value) = headers.get(ACCEPT_ENCODING) else {
        return;
    };
    let accepted: Vec<&str> = value
        .to_str()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|coding| SUPPORTED_ENCODINGS.contains(coding))
        .collect();
    let filtered = HeaderValue::from_str(&accepted.join(", "))
        .unwrap_or_else(|_| HeaderValue::from_static(""));
    headers.insert(ACCEPT_ENCODING, filtered);
}

/// Prepares client request headers for the upstream request.
///
/// `Host` and `Content-Length` are dropped because the upstream client derives
/// them from the target URL and the buffered body.
pub fn prepare_request_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    restrict_accept_encoding(headers);
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
}

/// Prepares origin response headers for relaying a fully buffered body.
pub fn prepare_response_headers(headers: &mut HeaderMap, body_len: usize) {
    strip_hop_by_hop(headers);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
}
