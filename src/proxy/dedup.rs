//! Suppression of repeated log lines.

use std::sync::Mutex;

/// Logs a message unless it is identical to the previous one.
///
/// Under sustained failure (an unreachable origin hammered by redirects, a
/// resolver outage) the proxy would otherwise emit the same line thousands of
/// times. Only consecutive duplicates are suppressed.
#[derive(Debug, Default)]
pub struct ErrorDeduper {
    last: Mutex<Option<String>>,
}

impl ErrorDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `message` at `level`, returning whether it was emitted.
    pub fn report(&self, level: log::Level, message: String) -> bool {
        let Ok(mut last) = self.last.lock() else {
            log::log!(level, "{message}");
            return true;
        };
        if last.as_deref() == Some(message.as_str()) {
            return false;
        }
        log::log!(level, "{message}");
        *last = Some(message);
        true
    }
}
