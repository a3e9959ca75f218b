//! Navigation monitor: one page load turned into a redirect chain and content.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tokio::sync::mpsc::UnboundedReceiver;

use super::driver::{BrowserDriver, DriverEvent, DriverResponse, BLANK_PAGE};
use super::state::MonitorState;
use crate::config::{
    DESTRUCTIVE_ERROR_HEADERS, DOWNLOAD_GRACE_DIVISOR, DOWNLOAD_POLL_INTERVAL,
    DYNAMIC_CONTENT_GRACE, HEADER_X_DNS_ERROR, HEADER_X_INVALID_RESPONSE, HEADER_X_IP_PORT,
    HEADER_X_REQUEST_TIMEOUT, HEADER_X_RESPONSE_TIME, HEADER_X_SSL_ERROR,
    HTTP_STATUS_NO_CONTENT, HTTP_STATUS_REQUEST_TIMEOUT, NETWORK_IDLE_POLL,
};
use crate::content_type::{decode_content, sniff_encoding, sniff_mime};
use crate::error_handling::NavigationError;
use crate::models::{request_date_now, Redirect};

/// Result of one monitored navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub request_date: NaiveDateTime,
    pub redirects: Vec<Redirect>,
    pub content: Option<String>,
    pub content_type: Option<String>,
}

impl Navigation {
    /// The outcome recorded when the page did not load before the deadline.
    pub fn timed_out(url: &str, timeout: Duration, request_date: NaiveDateTime) -> Self {
        let mut redirect = Redirect::bare(url, Some(HTTP_STATUS_REQUEST_TIMEOUT));
        redirect.response_time = Some(timeout.as_millis() as u64);
        Self {
            request_date,
            redirects: vec![redirect],
            content: None,
            content_type: None,
        }
    }
}

/// Content of the page, once something has decided it.
enum Content {
    Unresolved,
    Resolved(Option<String>),
}

/// Drives a [`BrowserDriver`] through one navigation.
#[derive(Debug, Clone)]
pub struct NavigationMonitor {
    timeout: Duration,
    content_grace: Duration,
    download_grace: Duration,
}

impl NavigationMonitor {
    /// Creates a monitor bounding every wait by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            content_grace: DYNAMIC_CONTENT_GRACE,
            download_grace: timeout / DOWNLOAD_GRACE_DIVISOR,
        }
    }

    /// Overrides the settle time granted to client-side dynamic content.
    pub fn with_content_grace(mut self, grace: Duration) -> Self {
        self.content_grace = grace;
        self
    }

    /// Loads `url` through `driver` and reconstructs what the browser saw.
    ///
    /// Downloads land in a fresh directory under `scratch` that is removed
    /// when the navigation ends.
    ///
    /// # Arguments
    ///
    /// * `driver` - Browser driver, already routed through the intercepting proxy
    /// * `url` - Target URL
    /// * `scratch` - Parent directory for the download directory
    ///
    /// # Returns
    ///
    /// The request date, the main-frame redirect chain, and the content and
    /// content type of the final document. A navigation that times out yields
    /// a single synthetic `408` hop.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when no response can stand in for the failed
    /// navigation, and `NavigationError::RequestFailed` when the browser
    /// recorded a terminal failure for the final response.
    pub async fn run<D: BrowserDriver>(
        &self,
        driver: &mut D,
        url: &str,
        scratch: &Path,
    ) -> Result<Navigation, NavigationError> {
        let mut events = driver.subscribe();
        let downloads = tempfile::Builder::new()
            .prefix("download")
            .tempdir_in(scratch)?;
        driver.set_download_dir(downloads.path()).await?;

        let started = Instant::now();
        let deadline = started + self.timeout;
        let request_date = request_date_now();
        let mut state = MonitorState::new();

        let outcome = driver.navigate(url, self.timeout).await;
        state.drain(&mut events);

        let mut content = Content::Unresolved;
        let mut content_type = None;
        let response = match outcome {
            Ok(()) => {
                self.settle(&mut state, &mut events, deadline).await;
                None
            }
            Err(NavigationError::Timeout(_)) => {
                log::debug!("Navigation to {url} timed out after {:?}", self.timeout);
                return Ok(Navigation::timed_out(url, self.timeout, request_date));
            }
            Err(err @ NavigationError::Aborted(_)) => {
                let files = self.wait_for_download(downloads.path()).await?;
                state.drain(&mut events);
                let recovered = if let [file] = files.as_slice() {
                    match state.pop_last_response() {
                        Some(response) => {
                            let bytes = tokio::fs::read(file).await?;
                            let mime_type = sniff_mime(&bytes, &response.url);
                            let encoding = sniff_encoding(&bytes);
                            log::debug!(
                                "Downloaded {} bytes of {mime_type} from {}",
                                bytes.len(),
                                response.url
                            );
                            content_type =
                                Some(crate::content_type::content_type(&mime_type, &encoding));
                            content = Content::Resolved(Some(decode_content(
                                &bytes, &mime_type, &encoding,
                            )));
                            state.clear_failure(&response.url);
                            Some(response)
                        }
                        None => None,
                    }
                } else {
                    match state.pop_last_response() {
                        Some(response) if is_destructive(&response) => {
                            content = Content::Resolved(None);
                            state.clear_failure(&response.url);
                            Some(response)
                        }
                        _ => None,
                    }
                };
                Some(recovered.ok_or(err)?)
            }
            Err(err) => {
                let current = driver.current_url();
                Some(state.response_for(&current).cloned().ok_or(err)?)
            }
        };

        if let Some(response) = &response {
            if let Some(error_text) = state.failure_for(&response.url) {
                return Err(NavigationError::RequestFailed {
                    url: response.url.clone(),
                    error_text: error_text.to_string(),
                });
            }
        }

        let content = match content {
            Content::Resolved(content) => content,
            Content::Unresolved => Some(driver.rendered_document().await?),
        };

        let current = driver.current_url();
        let page_url = match &response {
            Some(response) if current == BLANK_PAGE => response.url.clone(),
            _ => current,
        };
        state.record_navigation(&page_url);
        let fallback = response
            .clone()
            .or_else(|| state.response_for(&page_url).cloned());
        if let Some(response) = &fallback {
            state.ensure_navigation(response);
        }

        if let Some(body) = &content {
            let header = state
                .navigations()
                .last()
                .and_then(|(_, response)| response.as_ref())
                .and_then(|response| response.header("content-type"))
                .map(str::to_string);
            content_type = header.or(content_type).or_else(|| {
                let mime_type = sniff_mime(body.as_bytes(), &page_url);
                Some(crate::content_type::content_type(&mime_type, "utf-8"))
            });
        }

        let redirects = state
            .navigations()
            .iter()
            .map(|(url, response)| match response {
                Some(response) => redirect_from_response(url, response),
                None => Redirect::bare(url.clone(), None),
            })
            .collect();

        Ok(Navigation {
            request_date,
            redirects,
            content,
            content_type,
        })
    }

    /// Waits while requests are outstanding, then grants the content grace,
    /// never past `deadline`.
    async fn settle(
        &self,
        state: &mut MonitorState,
        events: &mut UnboundedReceiver<DriverEvent>,
        deadline: Instant,
    ) {
        loop {
            state.drain(events);
            let now = Instant::now();
            if !state.has_outstanding() || now >= deadline {
                break;
            }
            tokio::time::sleep(NETWORK_IDLE_POLL.min(deadline - now)).await;
        }
        let grace = self
            .content_grace
            .min(deadline.saturating_duration_since(Instant::now()));
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        state.drain(events);
    }

    /// Polls `dir` until exactly one file is present or the grace window ends.
    async fn wait_for_download(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let started = Instant::now();
        let mut files = list_files(dir)?;
        while files.len() != 1 && started.elapsed() < self.download_grace {
            tokio::time::sleep(DOWNLOAD_POLL_INTERVAL).await;
            files = list_files(dir)?;
        }
        Ok(files)
    }
}

fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

/// Returns true if the proxy tagged `response` as a transport failure.
fn is_destructive(response: &DriverResponse) -> bool {
    DESTRUCTIVE_ERROR_HEADERS
        .iter()
        .any(|name| response.has_flag(&name.to_ascii_lowercase()))
}

/// Converts a response annotated by the intercepting proxy into a redirect hop.
pub fn redirect_from_response(url: &str, response: &DriverResponse) -> Redirect {
    let flag = |name: &str| response.has_flag(&name.to_ascii_lowercase());
    let response_time = response
        .header(&HEADER_X_RESPONSE_TIME.to_ascii_lowercase())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0).round() as u64);
    let status = if response.status != HTTP_STATUS_NO_CONTENT {
        Some(response.status)
    } else if flag(HEADER_X_REQUEST_TIMEOUT) {
        Some(HTTP_STATUS_REQUEST_TIMEOUT)
    } else {
        None
    };
    Redirect {
        url: url.to_string(),
        ip_port: response
            .header(&HEADER_X_IP_PORT.to_ascii_lowercase())
            .map(str::to_string),
        response_time,
        status,
        dns_error: flag(HEADER_X_DNS_ERROR),
        ssl_error: flag(HEADER_X_SSL_ERROR),
        invalid_response: flag(HEADER_X_INVALID_RESPONSE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::driver::DriverRequest;
    use std::collections::HashMap;
    use tokio::sync::mpsc::{self, UnboundedSender};

    fn response(url: &str, status: u16, headers: &[(&str, &str)]) -> DriverResponse {
        DriverResponse {
            url: url.to_string(),
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    /// What the scripted driver does when asked to navigate.
    enum Script {
        Load {
            events: Vec<DriverEvent>,
            final_url: String,
            document: String,
        },
        Fail {
            events: Vec<DriverEvent>,
            download: Option<Vec<u8>>,
            error: NavigationError,
        },
    }

    struct ScriptedDriver {
        script: Option<Script>,
        sender: Option<UnboundedSender<DriverEvent>>,
        download_dir: Option<PathBuf>,
        current_url: String,
        document: Option<String>,
    }

    impl ScriptedDriver {
        fn new(script: Script) -> Self {
            Self {
                script: Some(script),
                sender: None,
                download_dir: None,
                current_url: BLANK_PAGE.to_string(),
                document: None,
            }
        }

        fn emit(&self, events: Vec<DriverEvent>) {
            if let Some(sender) = &self.sender {
                for event in events {
                    sender.send(event).unwrap();
                }
            }
        }
    }

    impl BrowserDriver for ScriptedDriver {
        fn subscribe(&mut self) -> UnboundedReceiver<DriverEvent> {
            let (sender, receiver) = mpsc::unbounded_channel();
            self.sender = Some(sender);
            receiver
        }

        async fn set_download_dir(&mut self, dir: &Path) -> Result<(), NavigationError> {
            self.download_dir = Some(dir.to_path_buf());
            Ok(())
        }

        async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), NavigationError> {
            match self.script.take().unwrap() {
                Script::Load {
                    events,
                    final_url,
                    document,
                } => {
                    self.emit(events);
                    self.current_url = final_url;
                    self.document = Some(document);
                    Ok(())
                }
                Script::Fail {
                    events,
                    download,
                    error,
                } => {
                    self.emit(events);
                    if let Some(bytes) = download {
                        let dir = self.download_dir.as_ref().unwrap();
                        std::fs::write(dir.join("file.bin"), bytes).unwrap();
                    }
                    Err(error)
                }
            }
        }

        fn current_url(&self) -> String {
            self.current_url.clone()
        }

        async fn rendered_document(&mut self) -> Result<String, NavigationError> {
            self.document
                .clone()
                .ok_or_else(|| NavigationError::Driver("no document".into()))
        }
    }

    fn monitor() -> NavigationMonitor {
        NavigationMonitor::new(Duration::from_secs(6)).with_content_grace(Duration::ZERO)
    }

    fn loaded(url: &str, status: u16, headers: &[(&str, &str)]) -> Vec<DriverEvent> {
        let resp = response(url, status, headers);
        let request = DriverRequest {
            response: Some(resp.clone()),
            ..DriverRequest::new(url, vec![])
        };
        vec![
            DriverEvent::RequestStarted(DriverRequest::new(url, vec![])),
            DriverEvent::ResponseReceived(resp),
            DriverEvent::RequestFinished(request),
            DriverEvent::FrameNavigated {
                url: url.to_string(),
                main_frame: true,
            },
        ]
    }

    #[tokio::test]
    async fn test_successful_navigation_uses_rendered_document() {
        let scratch = tempfile::tempdir().unwrap();
        let url = "https://a.example/CHEBI:15377";
        let mut driver = ScriptedDriver::new(Script::Load {
            events: loaded(
                url,
                200,
                &[
                    ("content-type", "text/html; charset=utf-8"),
                    ("x-response-time", "0.25"),
                    ("x-ip-port", "93.184.216.34:443"),
                ],
            ),
            final_url: url.to_string(),
            document: "<html><body>water</body></html>".to_string(),
        });

        let navigation = monitor().run(&mut driver, url, scratch.path()).await.unwrap();
        assert_eq!(navigation.redirects.len(), 1);
        let hop = &navigation.redirects[0];
        assert_eq!(hop.status, Some(200));
        assert_eq!(hop.response_time, Some(250));
        assert_eq!(hop.ip_port.as_deref(), Some("93.184.216.34:443"));
        assert_eq!(
            navigation.content.as_deref(),
            Some("<html><body>water</body></html>")
        );
        assert_eq!(
            navigation.content_type.as_deref(),
            Some("text/html; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn test_timeout_yields_synthetic_408() {
        let scratch = tempfile::tempdir().unwrap();
        let mut driver = ScriptedDriver::new(Script::Fail {
            events: vec![],
            download: None,
            error: NavigationError::Timeout(Duration::from_secs(6)),
        });
        let navigation = monitor()
            .run(&mut driver, "https://slow.example/", scratch.path())
            .await
            .unwrap();
        assert_eq!(navigation.redirects.len(), 1);
        assert_eq!(navigation.redirects[0].status, Some(408));
        assert_eq!(navigation.redirects[0].response_time, Some(6000));
        assert!(navigation.content.is_none());
    }

    #[tokio::test]
    async fn test_aborted_download_becomes_content() {
        let scratch = tempfile::tempdir().unwrap();
        let url = "https://a.example/data.csv";
        let mut events = loaded(url, 200, &[("content-disposition", "attachment")]);
        events.pop();
        let mut driver = ScriptedDriver::new(Script::Fail {
            events,
            download: Some(b"id,name\n15377,water\n".to_vec()),
            error: NavigationError::Aborted(url.to_string()),
        });

        let navigation = monitor().run(&mut driver, url, scratch.path()).await.unwrap();
        assert_eq!(navigation.content.as_deref(), Some("id,name\n15377,water\n"));
        assert_eq!(
            navigation.content_type.as_deref(),
            Some("text/csv; charset=ascii")
        );
        assert_eq!(navigation.redirects.len(), 1);
        assert_eq!(navigation.redirects[0].status, Some(200));
    }

    #[tokio::test]
    async fn test_aborted_with_destructive_header_is_surfaced() {
        let scratch = tempfile::tempdir().unwrap();
        let url = "https://nxdomain.example/";
        let mut events = loaded(url, 204, &[("x-dns-error", "true")]);
        events.pop();
        let mut driver = ScriptedDriver::new(Script::Fail {
            events,
            download: None,
            error: NavigationError::Aborted(url.to_string()),
        });

        let navigation = NavigationMonitor {
            download_grace: Duration::ZERO,
            ..monitor()
        }
        .run(&mut driver, url, scratch.path())
        .await
        .unwrap();
        assert!(navigation.content.is_none());
        assert!(navigation.content_type.is_none());
        let hop = &navigation.redirects[0];
        assert_eq!(hop.status, None);
        assert!(hop.dns_error);
    }

    #[tokio::test]
    async fn test_aborted_without_download_or_marker_propagates() {
        let scratch = tempfile::tempdir().unwrap();
        let url = "https://a.example/";
        let mut events = loaded(url, 204, &[]);
        events.pop();
        let mut driver = ScriptedDriver::new(Script::Fail {
            events,
            download: None,
            error: NavigationError::Aborted(url.to_string()),
        });

        let err = NavigationMonitor {
            download_grace: Duration::ZERO,
            ..monitor()
        }
        .run(&mut driver, url, scratch.path())
        .await
        .unwrap_err();
        assert!(matches!(err, NavigationError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_recorded_failure_of_final_response_is_raised() {
        let scratch = tempfile::tempdir().unwrap();
        let url = "https://a.example/";
        let request = DriverRequest::new(url, vec![]);
        let mut driver = ScriptedDriver::new(Script::Fail {
            events: vec![
                DriverEvent::RequestStarted(request.clone()),
                DriverEvent::ResponseReceived(response(url, 200, &[])),
                DriverEvent::RequestFailed {
                    request,
                    error_text: "net::ERR_CONTENT_LENGTH_MISMATCH".into(),
                },
            ],
            download: None,
            error: NavigationError::Driver("navigation failed".into()),
        });
        driver.current_url = url.to_string();

        let err = monitor().run(&mut driver, url, scratch.path()).await.unwrap_err();
        match err {
            NavigationError::RequestFailed { error_text, .. } => {
                assert_eq!(error_text, "net::ERR_CONTENT_LENGTH_MISMATCH")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_redirect_from_response_maps_proxy_headers() {
        let hop = redirect_from_response(
            "https://a.example/",
            &response(
                "https://a.example/",
                204,
                &[("x-ssl-error", "true"), ("x-invalid-response", "")],
            ),
        );
        assert_eq!(hop.status, None);
        assert!(hop.ssl_error);
        assert!(!hop.invalid_response);
        assert!(!hop.dns_error);

        let hop = redirect_from_response(
            "https://a.example/",
            &response("https://a.example/", 204, &[("x-request-timeout", "true")]),
        );
        assert_eq!(hop.status, Some(408));

        let hop = redirect_from_response(
            "https://a.example/",
            &response("https://a.example/", 301, &[("x-response-time", "0.123")]),
        );
        assert_eq!(hop.status, Some(301));
        assert_eq!(hop.response_time, Some(123));
    }
}
