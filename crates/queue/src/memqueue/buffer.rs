//! Ring buffer indexed by monotonic entry ids
//!
//! Three cursors partition the id space:
//!
//! ```text
//!   acked          consumed            head
//!     |--- in flight ---|--- readable ---|--- free ---
//! ```
//!
//! Invariants: `acked <= consumed <= head` and
//! `head - acked <= capacity`. Slots are addressed by `id % capacity`;
//! a slot is reusable once the id passes the `acked` cursor.

use crate::entry::Entry;

use super::internal::ProducerAck;

/// One buffered entry plus its ACK bookkeeping
struct Slot {
    /// Payload; taken when the entry is handed out in a batch
    entry: Option<Entry>,

    /// Producer back-reference; taken when the entry is acknowledged
    producer: Option<ProducerAck>,

    /// Pre-encoded size for byte accounting (0 for structured entries)
    bytes: usize,
}

pub(super) struct RingBuffer {
    slots: Vec<Slot>,

    /// Next id to assign to a pushed entry
    pub head: u64,

    /// Next id to hand out to a batch
    pub consumed: u64,

    /// Next id not yet acknowledged
    pub acked: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            entry: None,
            producer: None,
            bytes: 0,
        });
        Self {
            slots,
            head: 0,
            consumed: 0,
            acked: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Entries currently occupying the buffer (readable + in flight)
    pub fn used(&self) -> usize {
        (self.head - self.acked) as usize
    }

    pub fn is_full(&self) -> bool {
        self.used() >= self.capacity()
    }

    /// Entries available for the next batch
    pub fn readable(&self) -> usize {
        (self.head - self.consumed) as usize
    }

    /// Insert an entry, returning its assigned id
    ///
    /// Caller must check `is_full` first.
    pub fn insert(&mut self, entry: Entry, producer: Option<ProducerAck>) -> u64 {
        debug_assert!(!self.is_full());
        let id = self.head;
        let idx = (id % self.slots.len() as u64) as usize;
        self.slots[idx] = Slot {
            bytes: entry.encoded_size(),
            entry: Some(entry),
            producer,
        };
        self.head += 1;
        id
    }

    /// Move the next `count` readable entries out for a batch
    pub fn consume(&mut self, count: usize) -> Vec<Entry> {
        let count = count.min(self.readable());
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let idx = (self.consumed % self.slots.len() as u64) as usize;
            // Every id below head was filled by insert.
            if let Some(entry) = self.slots[idx].entry.take() {
                out.push(entry);
            }
            self.consumed += 1;
        }
        out
    }

    /// Release `count` acknowledged entries, starting at the ACK cursor
    ///
    /// Returns the producer references of the released range so the
    /// broker can coalesce callbacks, plus the released byte total.
    pub fn release(&mut self, count: usize) -> (Vec<ProducerAck>, u64) {
        debug_assert!(self.acked + count as u64 <= self.consumed);
        let mut producers = Vec::new();
        let mut bytes = 0u64;
        for _ in 0..count {
            let idx = (self.acked % self.slots.len() as u64) as usize;
            if let Some(producer) = self.slots[idx].producer.take() {
                producers.push(producer);
            }
            bytes += self.slots[idx].bytes as u64;
            self.slots[idx].bytes = 0;
            self.acked += 1;
        }
        (producers, bytes)
    }
}
