//! Producer ACK coalescing
//!
//! Every tracked entry carries a reference to its producer's ACK state
//! plus a per-producer sequence number. When a queue acknowledges a run
//! of entries it advances each affected producer once with the sequence
//! delta, so N acked events cost one callback, not N.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::queue::AckFn;

/// Shared ACK state of one tracked producer
///
/// `last_acked` is only written by the owning queue's broker/core task;
/// the atomic is for shared ownership, not for cross-task races.
pub(crate) struct AckState {
    cb: AckFn,
    last_acked: AtomicU64,
}

impl AckState {
    pub fn new(cb: AckFn) -> Self {
        Self {
            cb,
            last_acked: AtomicU64::new(0),
        }
    }

    /// Advance the acknowledged sequence, firing the callback once with
    /// the delta
    pub fn ack_to(&self, seq: u64) {
        let last = self.last_acked.load(Ordering::Relaxed);
        if seq > last {
            self.last_acked.store(seq, Ordering::Relaxed);
            (self.cb)((seq - last) as usize);
        }
    }
}

/// Reference from a queued entry back to its producer's ACK state
#[derive(Clone)]
pub(crate) struct ProducerAck {
    pub state: Arc<AckState>,

    /// Position of the entry within this producer only (1-based, so a
    /// fresh producer's "nothing acked yet" state is simply 0)
    pub seq: u64,
}

/// Accumulates the highest acked sequence per producer, then fires each
/// callback once
#[derive(Default)]
pub(crate) struct AckBatch {
    // Keyed by state identity; one entry per distinct producer.
    producers: std::collections::HashMap<usize, (Arc<AckState>, u64)>,
}

impl AckBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, ack: ProducerAck) {
        let key = Arc::as_ptr(&ack.state) as usize;
        let slot = self.producers.entry(key).or_insert((ack.state, 0));
        slot.1 = slot.1.max(ack.seq);
    }

    /// Invoke every affected producer's callback with its delta
    pub fn fire(self) {
        for (_, (state, seq)) in self.producers {
            state.ack_to(seq);
        }
    }
}
