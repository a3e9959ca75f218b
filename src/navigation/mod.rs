//! Navigation monitoring.
//!
//! Reconstructs the redirect chain and final document of a page load from the
//! lifecycle events of a browser driver. The driver talks to origins through
//! the intercepting proxy, so every hop carries the proxy's diagnostic headers,
//! which are turned into [`Redirect`](crate::models::Redirect) records here.

mod driver;
mod http_driver;
mod monitor;
mod state;
mod url;

// Re-export public API
pub use driver::{BrowserDriver, DriverEvent, DriverRequest, DriverResponse, BLANK_PAGE};
pub use http_driver::HttpDriver;
pub use monitor::{redirect_from_response, Navigation, NavigationMonitor};
pub use state::MonitorState;
pub use url::normalise_url;
