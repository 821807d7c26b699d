//! In-process counters describing admission behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Admission statistics of one controller.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    calls_admitted: AtomicU64,
    calls_bypassed: AtomicU64,
    calls_throttled: AtomicU64,
    backend_failures: AtomicU64,
    tier_rebuilds: AtomicU64,
}

impl Metrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.calls_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bypassed(&self) {
        self.inner.calls_bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttled(&self) {
        self.inner.calls_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backend_failure(&self) {
        self.inner.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tier_rebuild(&self) {
        self.inner.tier_rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls that ran inside a selected tier.
    pub fn calls_admitted(&self) -> u64 {
        self.inner.calls_admitted.load(Ordering::Relaxed)
    }

    /// Calls that ran without a timeout override.
    pub fn calls_bypassed(&self) -> u64 {
        self.inner.calls_bypassed.load(Ordering::Relaxed)
    }

    /// Calls refused because every tier was saturated.
    pub fn calls_throttled(&self) -> u64 {
        self.inner.calls_throttled.load(Ordering::Relaxed)
    }

    /// Shared-store commands that failed.
    pub fn backend_failures(&self) -> u64 {
        self.inner.backend_failures.load(Ordering::Relaxed)
    }

    /// Times the normalized tier cache was rebuilt.
    pub fn tier_rebuilds(&self) -> u64 {
        self.inner.tier_rebuilds.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_admitted: self.calls_admitted(),
            calls_bypassed: self.calls_bypassed(),
            calls_throttled: self.calls_throttled(),
            backend_failures: self.backend_failures(),
            tier_rebuilds: self.tier_rebuilds(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Calls that ran inside a selected tier
    pub calls_admitted: u64,
    /// Calls that ran without a timeout override
    pub calls_bypassed: u64,
    /// Calls refused because every tier was saturated
    pub calls_throttled: u64,
    /// Shared-store commands that failed
    pub backend_failures: u64,
    /// Times the normalized tier cache was rebuilt
    pub tier_rebuilds: u64,
}

impl MetricsSnapshot {
    /// Share of admission attempts that were throttled (0.0 to 1.0).
    pub fn throttle_rate(&self) -> f64 {
        let attempts = self.calls_admitted.saturating_add(self.calls_throttled);
        if attempts == 0 {
            0.0
        } else {
            self.calls_throttled as f64 / attempts as f64
        }
    }
}
