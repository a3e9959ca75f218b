//! Synthetic responses of the intercepting proxy, for plain and tunneled requests.
//!
//! Every transport failure must come back as a well-formed response with the
//! exact status and marker header downstream classification relies on.

mod helpers;

use std::time::Duration;

use httptest::{matchers::*, responders::*, Expectation, Server};
use reqwest::Response;

use helpers::{
    garbage_origin, refused_address, scripted_origin, scripted_tls_origin, silent_origin,
    start_proxy, untrusted_tls_origin, Reply,
};
use resource_probe::error_handling::TransportFault;

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn assert_fault(response: &Response, fault: TransportFault) {
    assert_eq!(response.status().as_u16(), fault.status(), "status for {fault}");
    for marker in ["X-DNS-Error", "X-SSL-Error", "X-Invalid-Response"] {
        let expected = (fault.marker_header() == Some(marker)).then_some("true");
        assert_eq!(header(response, marker), expected, "{marker} for {fault}");
    }
}

#[tokio::test]
async fn test_relayed_response_carries_diagnostics() {
    let origin = Server::run();
    origin.expect(
        Expectation::matching(request::method_path("GET", "/CHEBI:15377"))
            .respond_with(status_code(200).body("water")),
    );
    let proxy = start_proxy(Duration::from_secs(5)).await;

    let response = proxy
        .client()
        .get(origin.url("/CHEBI:15377").to_string())
        .send()
        .await
        .expect("proxy should answer");

    assert_eq!(response.status().as_u16(), 200);
    let seconds: f64 = header(&response, "X-Response-Time")
        .expect("X-Response-Time missing")
        .parse()
        .expect("X-Response-Time is not a decimal");
    assert!(seconds >= 0.0);
    assert_eq!(
        header(&response, "X-IP-Port"),
        Some(origin.addr().to_string().as_str())
    );
    assert_eq!(header(&response, "X-SSL-Error"), None);
    assert_eq!(response.text().await.unwrap(), "water");
}

#[tokio::test]
async fn test_redirects_are_relayed_not_followed() {
    let origin = Server::run();
    origin.expect(
        Expectation::matching(request::method_path("GET", "/old")).respond_with(
            status_code(301).insert_header("Location", "/new"),
        ),
    );
    let proxy = start_proxy(Duration::from_secs(5)).await;

    let response = proxy
        .client()
        .get(origin.url("/old").to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 301);
    assert_eq!(header(&response, "Location"), Some("/new"));
}

#[tokio::test]
async fn test_unresolvable_host_is_dns_error() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let client = proxy.client();

    let plain = client.get("http://probe.invalid/x").send().await.unwrap();
    assert_fault(&plain, TransportFault::Dns);

    let tunneled = client.get("https://probe.invalid/x").send().await.unwrap();
    assert_fault(&tunneled, TransportFault::Dns);

    assert_eq!(proxy.stats.fault_count(TransportFault::Dns), 2);
}

#[tokio::test]
async fn test_refused_connection_is_not_retried_without_verification() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let addr = refused_address();

    let response = proxy
        .client()
        .get(format!("https://{addr}/"))
        .send()
        .await
        .unwrap();

    assert_fault(&response, TransportFault::Dns);
    assert_eq!(proxy.stats.ssl_fallbacks(), 0);
}

#[tokio::test]
async fn test_silent_origin_is_timeout() {
    let proxy = start_proxy(Duration::from_secs(1)).await;
    let addr = silent_origin().await;

    let response = proxy
        .client()
        .get(format!("http://{addr}/slow"))
        .send()
        .await
        .unwrap();

    assert_fault(&response, TransportFault::Timeout);
}

#[tokio::test]
async fn test_garbage_over_http_is_invalid_response() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let addr = garbage_origin().await;

    let response = proxy
        .client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();

    assert_fault(&response, TransportFault::InvalidResponse);
}

#[tokio::test]
async fn test_untrusted_certificate_falls_back_to_relaxed_pool() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let (addr, _certs) = untrusted_tls_origin("water").await;

    let response = proxy
        .client()
        .get(format!("https://{addr}/CHEBI:15377"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(header(&response, "X-SSL-Error"), Some("true"));
    assert!(header(&response, "X-Response-Time").is_some());
    assert_eq!(proxy.stats.ssl_fallbacks(), 1);
    assert_eq!(response.text().await.unwrap(), "water");
}

#[tokio::test]
async fn test_tls_failure_on_both_pools_is_ssl_error() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let addr = garbage_origin().await;

    let response = proxy
        .client()
        .get(format!("https://{addr}/"))
        .send()
        .await
        .unwrap();

    assert_fault(&response, TransportFault::Tls);
    assert_eq!(proxy.stats.fault_count(TransportFault::Tls), 1);
}

#[tokio::test]
async fn test_silent_origin_in_tunnel_is_timeout() {
    let proxy = start_proxy(Duration::from_secs(1)).await;
    let (addr, _certs) = scripted_tls_origin(Reply::Stall(b"")).await;

    let response = proxy
        .client()
        .get(format!("https://{addr}/slow"))
        .send()
        .await
        .unwrap();

    assert_fault(&response, TransportFault::Timeout);
    assert_eq!(proxy.stats.fault_count(TransportFault::Timeout), 1);
}

#[tokio::test]
async fn test_garbage_after_handshake_is_invalid_response() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let (addr, _certs) = scripted_tls_origin(Reply::Close(b"GARBAGE GARBAGE\r\n\r\n")).await;

    let response = proxy
        .client()
        .get(format!("https://{addr}/"))
        .send()
        .await
        .unwrap();

    assert_fault(&response, TransportFault::InvalidResponse);
    assert_eq!(proxy.stats.fault_count(TransportFault::InvalidResponse), 1);
}

#[tokio::test]
async fn test_body_shorter_than_content_length_is_relayed_as_truncated() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let addr = scripted_origin(Reply::Close(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 100\r\n\r\nwat",
    ))
    .await;

    let response = proxy
        .client()
        .get(format!("http://{addr}/CHEBI:15377"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(header(&response, "X-Invalid-Response"), Some("true"));
    assert_eq!(header(&response, "Content-Length"), Some("3"));
    assert!(header(&response, "X-Response-Time").is_some());
    assert_eq!(proxy.stats.truncated(), 1);
    assert_eq!(response.text().await.unwrap(), "wat");
}

#[tokio::test]
async fn test_body_stalling_after_headers_is_timeout() {
    let proxy = start_proxy(Duration::from_secs(1)).await;
    let addr = scripted_origin(Reply::Stall(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 100\r\n\r\nwat",
    ))
    .await;

    let response = proxy
        .client()
        .get(format!("http://{addr}/CHEBI:15377"))
        .send()
        .await
        .unwrap();

    assert_fault(&response, TransportFault::Timeout);
}

#[tokio::test]
async fn test_one_failing_connection_does_not_affect_others() {
    let origin = Server::run();
    origin.expect(
        Expectation::matching(request::method_path("GET", "/ok"))
            .times(1..)
            .respond_with(status_code(200).body("fine")),
    );
    let proxy = start_proxy(Duration::from_secs(1)).await;
    let silent = silent_origin().await;

    let stuck = tokio::spawn({
        let client = proxy.client();
        async move { client.get(format!("http://{silent}/")).send().await }
    });
    let ok = proxy
        .client()
        .get(origin.url("/ok").to_string())
        .send()
        .await
        .unwrap();

    assert_eq!(ok.status().as_u16(), 200);
    let stuck = stuck.await.unwrap().unwrap();
    assert_fault(&stuck, TransportFault::Timeout);
}
