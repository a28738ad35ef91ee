//! Queue observer - gauge and counter hooks
//!
//! The queue reports buffer movement to an observer so the embedding
//! application can export metrics without the queue knowing about any
//! metrics backend. All methods have no-op defaults.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives queue buffer metrics
pub trait QueueObserver: Send + Sync {
    /// The configured event-count bound, reported once at startup
    fn max_events(&self, _count: usize) {}

    /// The configured byte bound, reported once at startup
    fn max_bytes(&self, _bytes: u64) {}

    /// Events found in persisted storage at startup
    fn restored(&self, _count: usize, _bytes: u64) {}

    /// Events accepted into the buffer
    fn added(&self, _count: usize, _bytes: u64) {}

    /// Events handed out in a batch
    fn consumed(&self, _count: usize, _bytes: u64) {}

    /// Events acknowledged and released from the buffer
    fn acked(&self, _count: usize, _bytes: u64) {}

    /// Events refused or abandoned (full queue, encoder failure, close)
    fn dropped(&self, _count: usize) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl QueueObserver for NoopObserver {}

/// Observer backed by atomic counters
///
/// All counters use relaxed ordering; values are eventually consistent.
#[derive(Debug, Default)]
pub struct CountingObserver {
    added_events: AtomicU64,
    added_bytes: AtomicU64,
    consumed_events: AtomicU64,
    acked_events: AtomicU64,
    dropped_events: AtomicU64,
    restored_events: AtomicU64,
}

/// Point-in-time copy of a [`CountingObserver`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverSnapshot {
    pub added_events: u64,
    pub added_bytes: u64,
    pub consumed_events: u64,
    pub acked_events: u64,
    pub dropped_events: u64,
    pub restored_events: u64,
}

impl CountingObserver {
    /// Create a new observer with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> ObserverSnapshot {
        ObserverSnapshot {
            added_events: self.added_events.load(Ordering::Relaxed),
            added_bytes: self.added_bytes.load(Ordering::Relaxed),
            consumed_events: self.consumed_events.load(Ordering::Relaxed),
            acked_events: self.acked_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            restored_events: self.restored_events.load(Ordering::Relaxed),
        }
    }
}

impl QueueObserver for CountingObserver {
    fn restored(&self, count: usize, _bytes: u64) {
        self.restored_events
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn added(&self, count: usize, bytes: u64) {
        self.added_events.fetch_add(count as u64, Ordering::Relaxed);
        self.added_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn consumed(&self, count: usize, _bytes: u64) {
        self.consumed_events
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn acked(&self, count: usize, _bytes: u64) {
        self.acked_events.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn dropped(&self, count: usize) {
        self.dropped_events
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}
