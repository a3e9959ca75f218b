//! A non-rendering browser driver built on `reqwest`.
//!
//! Follows redirects one hop at a time and emits the same lifecycle events a
//! headless browser would for the main document. It runs no scripts and loads
//! no sub-resources. Responses a browser would not render are saved to the
//! download directory and the navigation is aborted, as a browser does.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use scraper::Html;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

use super::driver::{BrowserDriver, DriverEvent, DriverRequest, DriverResponse, BLANK_PAGE};
use crate::config::{HTTP_STATUS_NO_CONTENT, MAX_REDIRECT_HOPS};
use crate::content_type::decode_text;
use crate::error_handling::{InitializationError, NavigationError};
use crate::initialization::init_driver_client;

const ERR_ABORTED: &str = "net::ERR_ABORTED";

/// Browser driver that fetches the main document with a plain HTTP client.
pub struct HttpDriver {
    client: reqwest::Client,
    sender: Option<UnboundedSender<DriverEvent>>,
    download_dir: Option<PathBuf>,
    current_url: String,
    document: Option<String>,
}

impl HttpDriver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            sender: None,
            download_dir: None,
            current_url: BLANK_PAGE.to_string(),
            document: None,
        }
    }

    /// Creates a driver sending every request through the proxy at `proxy`.
    ///
    /// # Errors
    ///
    /// Returns `InitializationError::HttpClientError` if the client cannot be built.
    pub fn through_proxy(proxy: &str, timeout: Duration) -> Result<Self, InitializationError> {
        Ok(Self::new(init_driver_client(proxy, timeout)?))
    }

    fn emit(&self, event: DriverEvent) {
        if let Some(sender) = &self.sender {
            // A dropped receiver just means nobody is monitoring
            let _ = sender.send(event);
        }
    }

    async fn fetch(&self, url: &Url) -> Result<(DriverResponse, Bytes), reqwest::Error> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        let body = response.bytes().await?;
        Ok((
            DriverResponse {
                url: url.to_string(),
                status,
                headers,
            },
            body,
        ))
    }

    async fn load(&mut self, url: &str, timeout: Duration) -> Result<(), NavigationError> {
        let mut target = Url::parse(url).map_err(|_| NavigationError::RequestFailed {
            url: url.to_string(),
            error_text: "net::ERR_INVALID_URL".to_string(),
        })?;
        let mut chain: Vec<DriverRequest> = Vec::new();

        loop {
            if chain.len() > MAX_REDIRECT_HOPS {
                return Err(NavigationError::RequestFailed {
                    url: target.to_string(),
                    error_text: "net::ERR_TOO_MANY_REDIRECTS".to_string(),
                });
            }

            let mut request = DriverRequest::new(target.as_str(), chain.clone());
            self.emit(DriverEvent::RequestStarted(request.clone()));

            let (response, body) = match self.fetch(&target).await {
                Ok(fetched) => fetched,
                Err(err) if err.is_timeout() => return Err(NavigationError::Timeout(timeout)),
                Err(err) => {
                    let error_text = net_error_text(&err).to_string();
                    log::debug!("GET {target} failed: {err}");
                    self.emit(DriverEvent::RequestFailed {
                        request,
                        error_text: error_text.clone(),
                    });
                    return Err(NavigationError::RequestFailed {
                        url: target.to_string(),
                        error_text,
                    });
                }
            };

            self.emit(DriverEvent::ResponseReceived(response.clone()));
            request.response = Some(response.clone());

            if let Some(next) = redirect_target(&target, &response) {
                chain.push(request);
                target = next;
                continue;
            }

            if response.status == HTTP_STATUS_NO_CONTENT || is_download(&response) {
                if response.status != HTTP_STATUS_NO_CONTENT {
                    self.save_download(&target, &response, &body).await?;
                }
                self.emit(DriverEvent::RequestFailed {
                    request,
                    error_text: ERR_ABORTED.to_string(),
                });
                return Err(NavigationError::Aborted(target.to_string()));
            }

            self.emit(DriverEvent::RequestFinished(request));
            self.document = Some(render(&body, response.header("content-type")));
            self.current_url = target.to_string();
            self.emit(DriverEvent::FrameNavigated {
                url: target.to_string(),
                main_frame: true,
            });
            return Ok(());
        }
    }

    async fn save_download(
        &self,
        url: &Url,
        response: &DriverResponse,
        body: &[u8],
    ) -> Result<(), NavigationError> {
        let dir = self
            .download_dir
            .as_ref()
            .ok_or_else(|| NavigationError::Driver("download directory not set".to_string()))?;
        let name = download_file_name(url, response);
        tokio::fs::write(dir.join(&name), body).await?;
        log::debug!("Saved {} bytes from {url} as {name}", body.len());
        Ok(())
    }
}

impl BrowserDriver for HttpDriver {
    fn subscribe(&mut self) -> UnboundedReceiver<DriverEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.sender = Some(sender);
        receiver
    }

    async fn set_download_dir(&mut self, dir: &Path) -> Result<(), NavigationError> {
        self.download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), NavigationError> {
        match tokio::time::timeout(timeout, self.load(url, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(NavigationError::Timeout(timeout)),
        }
    }

    fn current_url(&self) -> String {
        self.current_url.clone()
    }

    async fn rendered_document(&mut self) -> Result<String, NavigationError> {
        self.document
            .clone()
            .ok_or_else(|| NavigationError::Driver("no document has been loaded".to_string()))
    }
}

fn net_error_text(err: &reqwest::Error) -> &'static str {
    if err.is_connect() {
        "net::ERR_PROXY_CONNECTION_FAILED"
    } else if err.is_body() || err.is_decode() {
        "net::ERR_CONNECTION_CLOSED"
    } else {
        "net::ERR_FAILED"
    }
}

fn redirect_target(url: &Url, response: &DriverResponse) -> Option<Url> {
    if !matches!(response.status, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    url.join(response.header("location")?).ok()
}

fn mime_of(response: &DriverResponse) -> Option<String> {
    response.header("content-type").map(|value| {
        value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    })
}

fn is_html(mime: &str) -> bool {
    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Returns true if a browser would save `response` instead of rendering it.
fn is_download(response: &DriverResponse) -> bool {
    let attachment = response
        .header("content-disposition")
        .is_some_and(|value| value.trim().to_ascii_lowercase().starts_with("attachment"));
    if attachment {
        return true;
    }
    match mime_of(response) {
        None => false,
        Some(mime) if mime.is_empty() => false,
        Some(mime) => !(mime.starts_with("text/")
            || mime.ends_with("/xml")
            || mime.ends_with("+xml")
            || mime == "application/json"
            || mime == "application/javascript"),
    }
}

/// Picks the download file name from `Content-Disposition` or the URL path.
fn download_file_name(url: &Url, response: &DriverResponse) -> String {
    let from_header = response.header("content-disposition").and_then(|value| {
        value.split(';').find_map(|param| {
            let (key, value) = param.split_once('=')?;
            (key.trim().eq_ignore_ascii_case("filename"))
                .then(|| value.trim().trim_matches('"').to_string())
        })
    });
    let from_path = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(str::to_string);
    [from_header, from_path]
        .into_iter()
        .flatten()
        .map(|name| {
            name.rsplit(['/', '\\'])
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .find(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| "download".to_string())
}

/// Turns a response body into the document a browser would expose.
fn render(body: &[u8], content_type: Option<&str>) -> String {
    let text = decode_text(body, content_type);
    let mime = content_type
        .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .unwrap_or_default();
    if is_html(&mime) {
        Html::parse_document(&text).html()
    } else {
        text
    }
}
