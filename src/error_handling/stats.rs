//! Proxy outcome statistics.
//!
//! This module provides thread-safe counters of forwarded requests and
//! synthetic transport-fault responses, shared by every connection handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

use super::types::TransportFault;

/// Thread-safe proxy statistics tracker.
///
/// Tracks successfully forwarded requests, relaxed-pool fallbacks and every
/// transport fault using atomic counters. All fault kinds are initialized to
/// zero on creation.
///
/// # Thread Safety
///
/// This struct is thread-safe and can be shared across connection tasks using `Arc`.
pub struct ProxyStats {
    forwarded: AtomicUsize,
    ssl_fallbacks: AtomicUsize,
    truncated: AtomicUsize,
    faults: HashMap<TransportFault, AtomicUsize>,
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyStats {
    pub fn new() -> Self {
        let mut faults = HashMap::new();
        for fault in TransportFault::iter() {
            faults.insert(fault, AtomicUsize::new(0));
        }

        ProxyStats {
            forwarded: AtomicUsize::new(0),
            ssl_fallbacks: AtomicUsize::new(0),
            truncated: AtomicUsize::new(0),
            faults,
        }
    }

    /// Records an origin response relayed to the client.
    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a response obtained only through the relaxed pool.
    pub fn record_ssl_fallback(&self) {
        self.ssl_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a body truncated by a protocol error while streaming.
    pub fn record_truncated(&self) {
        self.truncated.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a synthetic fault response.
    pub fn record_fault(&self, fault: TransportFault) {
        if let Some(counter) = self.faults.get(&fault) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            log::error!(
                "Attempted to increment fault counter for {:?} which is not in the map",
                fault
            );
        }
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::SeqCst)
    }

    pub fn ssl_fallbacks(&self) -> usize {
        self.ssl_fallbacks.load(Ordering::SeqCst)
    }

    pub fn truncated(&self) -> usize {
        self.truncated.load(Ordering::SeqCst)
    }

    /// Get the count for a fault kind.
    pub fn fault_count(&self, fault: TransportFault) -> usize {
        self.faults
            .get(&fault)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Get total fault count across all fault kinds.
    pub fn total_faults(&self) -> usize {
        TransportFault::iter().map(|f| self.fault_count(f)).sum()
    }

    /// Logs a one-line summary followed by the non-zero fault counters.
    pub fn log_summary(&self) {
        log::info!(
            "Proxy handled {} request(s): {} forwarded ({} via relaxed TLS, {} truncated), {} synthetic",
            self.forwarded() + self.total_faults(),
            self.forwarded(),
            self.ssl_fallbacks(),
            self.truncated(),
            self.total_faults()
        );
        for fault in TransportFault::iter() {
            let count = self.fault_count(fault);
            if count > 0 {
                log::info!("   {}: {}", fault, count);
            }
        }
    }
}
