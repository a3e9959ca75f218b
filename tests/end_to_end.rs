//! A job probed through a live proxy, persisted and read back.

mod helpers;

use std::time::Duration;

use httptest::{matchers::*, responders::*, Expectation, Server};

use helpers::start_proxy;
use resource_probe::config::WorkerConfig;
use resource_probe::models::Job;
use resource_probe::navigation::{HttpDriver, NavigationMonitor};
use resource_probe::storage::{PingLog, ProgressLog};
use resource_probe::worker::{persist, probe};

fn water_origin() -> Server {
    let origin = Server::run();
    origin.expect(
        Expectation::matching(request::method_path("GET", "/CHEBI:15377"))
            .times(1..)
            .respond_with(status_code(301).insert_header("Location", "/water")),
    );
    origin.expect(
        Expectation::matching(request::method_path("GET", "/water"))
            .times(1..)
            .respond_with(
                status_code(200)
                    .insert_header("Content-Type", "text/plain; charset=utf-8")
                    .body("water"),
            ),
    );
    origin
}

#[tokio::test]
async fn test_monitor_reconstructs_redirect_chain() {
    let origin = water_origin();
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let scratch = tempfile::tempdir().unwrap();
    let url = origin.url("/CHEBI:15377").to_string();

    let mut driver = HttpDriver::through_proxy(&proxy.address(), Duration::from_secs(5)).unwrap();
    let navigation = NavigationMonitor::new(Duration::from_secs(5))
        .with_content_grace(Duration::from_millis(50))
        .run(&mut driver, &url, scratch.path())
        .await
        .unwrap();

    let statuses: Vec<_> = navigation.redirects.iter().map(|r| r.status).collect();
    assert_eq!(statuses, [Some(301), Some(200)]);
    assert_eq!(navigation.redirects[0].url, url);
    assert!(navigation.redirects[1].url.ends_with("/water"));
    for hop in &navigation.redirects {
        assert_eq!(hop.ip_port.as_deref(), Some(origin.addr().to_string().as_str()));
        assert!(hop.response_time.is_some());
        assert!(!hop.dns_error && !hop.ssl_error && !hop.invalid_response);
    }
    assert_eq!(navigation.content.as_deref(), Some("water"));
    assert!(navigation
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("text/plain")));
}

#[tokio::test]
async fn test_probe_and_persist_a_job() {
    let origin = water_origin();
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let dump = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let job = Job::new(42, "CHEBI:15377", false, origin.url("/CHEBI:15377").to_string());
    let config = WorkerConfig {
        dump: dump.path().to_path_buf(),
        proxy: proxy.address(),
        timeout: Duration::from_secs(5),
        scratch: scratch.path().to_path_buf(),
    };

    let ping = probe(&job, &config)
        .await
        .expect("probe failed")
        .expect("probe timed out");
    persist(dump.path(), &job, &ping).unwrap();

    assert_eq!(ping.lui, "CHEBI:15377");
    assert!(!ping.random);
    assert_eq!(ping.final_status(), Some(200));

    let stored = PingLog::for_resource(dump.path(), 42).read().unwrap();
    assert_eq!(stored, vec![ping]);
    assert_eq!(ProgressLog::in_dump(dump.path()).read().unwrap(), vec![job]);
}

#[tokio::test]
async fn test_unreachable_host_is_recorded_not_dropped() {
    let proxy = start_proxy(Duration::from_secs(5)).await;
    let scratch = tempfile::tempdir().unwrap();
    let job = Job::new(1, "x", true, "https://probe.invalid/x");
    let config = WorkerConfig {
        dump: scratch.path().to_path_buf(),
        proxy: proxy.address(),
        timeout: Duration::from_secs(5),
        scratch: scratch.path().to_path_buf(),
    };

    let ping = probe(&job, &config).await.unwrap().expect("probe timed out");

    assert_eq!(ping.redirects.len(), 1);
    let hop = &ping.redirects[0];
    assert!(hop.dns_error);
    assert_eq!(hop.status, None);
    assert_eq!(ping.content, None);
    assert!(ping.random);
}
