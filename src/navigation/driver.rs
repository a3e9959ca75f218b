//! Browser driver interface.
//!
//! The navigation monitor only needs a narrow slice of a browser-automation
//! driver: five lifecycle events and a handful of commands. Any driver that
//! can provide them can be plugged in.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error_handling::NavigationError;

/// URL reported by drivers before the first navigation commits.
pub const BLANK_PAGE: &str = "about:blank";

/// A response as seen by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverResponse {
    pub url: String,
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
}

impl DriverResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns true if `name` is present with a non-empty value.
    pub fn has_flag(&self, name: &str) -> bool {
        self.header(name).is_some_and(|value| !value.is_empty())
    }
}

/// A request as seen by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverRequest {
    pub url: String,
    /// Earlier requests that redirected to this one, oldest first
    pub redirect_chain: Vec<DriverRequest>,
    /// Response, once one has been received
    pub response: Option<DriverResponse>,
}

impl DriverRequest {
    pub fn new(url: impl Into<String>, redirect_chain: Vec<DriverRequest>) -> Self {
        Self {
            url: url.into(),
            redirect_chain,
            response: None,
        }
    }

    /// The redirect chain followed by this request itself.
    pub fn hops(&self) -> impl Iterator<Item = &DriverRequest> {
        self.redirect_chain.iter().chain(std::iter::once(self))
    }
}

/// Lifecycle events emitted by a driver while a page loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    RequestStarted(DriverRequest),
    ResponseReceived(DriverResponse),
    RequestFinished(DriverRequest),
    RequestFailed {
        request: DriverRequest,
        error_text: String,
    },
    FrameNavigated {
        url: String,
        main_frame: bool,
    },
}

/// Commands the navigation monitor issues to a browser driver.
///
/// Events are delivered through the receiver returned by [`subscribe`], in
/// the order the browser observed them.
///
/// [`subscribe`]: BrowserDriver::subscribe
#[allow(async_fn_in_trait)]
pub trait BrowserDriver {
    /// Starts delivering lifecycle events to the returned receiver.
    fn subscribe(&mut self) -> UnboundedReceiver<DriverEvent>;

    /// Directs downloads into `dir`.
    async fn set_download_dir(&mut self, dir: &Path) -> Result<(), NavigationError>;

    /// Navigates the main frame and resolves once the document has loaded.
    ///
    /// # Errors
    ///
    /// - `NavigationError::Timeout` if the document did not load within `timeout`
    /// - `NavigationError::Aborted` if the browser turned the response into a download
    /// - any other variant for driver or page failures
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), NavigationError>;

    /// URL of the main frame, [`BLANK_PAGE`] before anything committed.
    fn current_url(&self) -> String;

    /// Serializes the rendered document, shadow trees included, back into markup.
    async fn rendered_document(&mut self) -> Result<String, NavigationError>;
}
