//! Pipeline metrics
//!
//! Atomic counters covering the producer side of the pipeline. All
//! operations use relaxed ordering; values are eventually consistent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the publish path
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Events accepted into the queue
    published: AtomicU64,

    /// Events dropped by a processor (intentional filtering)
    filtered: AtomicU64,

    /// Events dropped because the queue was full (drop-if-full clients)
    dropped: AtomicU64,

    /// Events that failed publishing (processor error or shutdown)
    failed: AtomicU64,

    /// Events acknowledged back to clients
    acked: AtomicU64,

    /// Clients currently connected
    active_clients: AtomicU64,
}

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub published: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub failed: u64,
    pub acked: u64,
    pub active_clients: u64,
}

impl PipelineMetrics {
    pub const fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            active_clients: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_acked(&self, count: u64) {
        self.acked.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn client_connected(&self) {
        self.active_clients.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn client_closed(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            published: self.published.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            active_clients: self.active_clients.load(Ordering::Relaxed),
        }
    }
}

/// Handle for reading pipeline metrics externally
///
/// Remains valid after the pipeline itself is consumed or closed.
#[derive(Clone)]
pub struct PipelineMetricsHandle {
    metrics: Arc<PipelineMetrics>,
}

impl PipelineMetricsHandle {
    pub(crate) fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self { metrics }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.metrics.snapshot()
    }
}
