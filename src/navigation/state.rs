//! Bookkeeping of the driver events of one navigation.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::UnboundedReceiver;

use super::driver::{DriverEvent, DriverRequest, DriverResponse};
use super::url::normalise_url;

fn is_redirect(status: u16) -> bool {
    (300..400).contains(&status) && status != 304
}

/// What the monitor knows about the page so far.
///
/// Requests are keyed by their exact URL, everything else by the normalized
/// URL, since browsers report the same resource with and without a trailing
/// slash or fragment depending on the event.
#[derive(Debug, Default)]
pub struct MonitorState {
    requests: HashMap<String, DriverRequest>,
    /// Responses in order of their last arrival
    responses: Vec<(String, DriverResponse)>,
    failures: HashMap<String, String>,
    /// Main-frame redirect chain in discovery order, keyed by exact URL
    navigations: Vec<(String, Option<DriverResponse>)>,
    in_flight: HashSet<String>,
    redirecting: HashSet<String>,
    finishing: HashSet<String>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies every event currently queued on `events`.
    pub fn drain(&mut self, events: &mut UnboundedReceiver<DriverEvent>) {
        while let Ok(event) = events.try_recv() {
            self.apply(event);
        }
    }

    pub fn apply(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::RequestStarted(request) => {
                if let Some(previous) = request.redirect_chain.last() {
                    let key = normalise_url(&previous.url);
                    self.redirecting.remove(key);
                    self.in_flight.remove(key);
                }
                self.in_flight.insert(normalise_url(&request.url).to_string());
                self.requests.insert(request.url.clone(), request);
            }
            DriverEvent::ResponseReceived(response) => {
                let key = normalise_url(&response.url).to_string();
                if is_redirect(response.status) {
                    self.redirecting.insert(key.clone());
                } else {
                    self.finishing.insert(key.clone());
                }
                if let Some(request) = self.requests.get_mut(&response.url) {
                    request.response = Some(response.clone());
                }
                self.record_response(key, response);
            }
            DriverEvent::RequestFinished(request) => {
                let key = normalise_url(&request.url).to_string();
                self.settle(&key);
                if let Some(response) = request.response.clone() {
                    self.record_response(key, response);
                }
                self.requests.insert(request.url.clone(), request);
            }
            DriverEvent::RequestFailed {
                request,
                error_text,
            } => {
                let key = normalise_url(&request.url).to_string();
                self.settle(&key);
                self.failures.insert(key, error_text);
                self.requests.insert(request.url.clone(), request);
            }
            DriverEvent::FrameNavigated { url, main_frame } => {
                if main_frame {
                    self.record_navigation(&url);
                }
            }
        }
    }

    fn settle(&mut self, key: &str) {
        self.in_flight.remove(key);
        self.finishing.remove(key);
        self.redirecting.remove(key);
    }

    fn record_response(&mut self, key: String, response: DriverResponse) {
        self.responses.retain(|(url, _)| *url != key);
        self.responses.push((key, response));
    }

    /// Appends the redirect chain that led to `url` to the navigations,
    /// skipping hops already recorded.
    pub fn record_navigation(&mut self, url: &str) {
        let Some(request) = self.requests.get(url) else {
            return;
        };
        let hops: Vec<(String, Option<DriverResponse>)> = request
            .hops()
            .map(|hop| {
                let response = hop.response.clone().or_else(|| {
                    self.requests
                        .get(&hop.url)
                        .and_then(|known| known.response.clone())
                });
                (hop.url.clone(), response)
            })
            .collect();
        for (hop_url, response) in hops {
            if !self.navigations.iter().any(|(known, _)| *known == hop_url) {
                self.navigations.push((hop_url, response));
            }
        }
    }

    /// Returns true while a redirect or an in-flight request is outstanding.
    pub fn has_outstanding(&self) -> bool {
        !self.redirecting.is_empty() || !self.in_flight.is_empty()
    }

    pub fn is_finishing(&self) -> bool {
        !self.finishing.is_empty()
    }

    /// Removes and returns the most recently received response.
    pub fn pop_last_response(&mut self) -> Option<DriverResponse> {
        self.responses.pop().map(|(_, response)| response)
    }

    pub fn response_for(&self, url: &str) -> Option<&DriverResponse> {
        let key = normalise_url(url);
        self.responses
            .iter()
            .find(|(known, _)| known == key)
            .map(|(_, response)| response)
    }

    pub fn failure_for(&self, url: &str) -> Option<&str> {
        self.failures.get(normalise_url(url)).map(String::as_str)
    }

    pub fn clear_failure(&mut self, url: &str) {
        self.failures.remove(normalise_url(url));
    }

    pub fn navigations(&self) -> &[(String, Option<DriverResponse>)] {
        &self.navigations
    }

    /// Records `response` as the only navigation when none were observed.
    pub fn ensure_navigation(&mut self, response: &DriverResponse) {
        if self.navigations.is_empty() {
            self.navigations
                .push((response.url.clone(), Some(response.clone())));
        }
    }
}
