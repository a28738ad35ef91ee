//! Queue, Producer, and Batch traits
//!
//! The pipeline controller and the output workers only see these traits;
//! whether events sit in memory or on disk is an implementation detail of
//! the configured queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::entry::{Entry, EntryId};
use crate::error::Result;

/// Coalesced acknowledgement callback
///
/// Invoked with the number of newly-acknowledged events, in the
/// producer's publish order. Never invoked once per event.
pub type AckFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Per-producer configuration
#[derive(Default)]
pub struct ProducerConfig {
    /// Acknowledgement callback; `None` produces an untracked producer
    pub ack: Option<AckFn>,

    /// Producer-side pre-serializer: events are encoded before they
    /// enter the queue, so the output path hands out ready-made bytes.
    /// The disk queue ignores this and always applies its own frame
    /// codec.
    pub encoder: Option<Arc<dyn crate::EntryEncoder>>,
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("ack", &self.ack.is_some())
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

/// Buffer bounds a queue exposes to the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferConfig {
    /// Maximum number of buffered events, when the bound is event-based
    pub max_events: Option<usize>,
    /// Maximum buffered bytes, when the bound is byte-based
    pub max_bytes: Option<u64>,
}

/// Cloneable cancellation handle for a producer
///
/// Cancelling unblocks an in-flight `publish` (which then returns
/// `(EntryId(0), false)`) even when the producer handle itself is held
/// by another task. Entries already accepted still deliver and ACK.
#[derive(Clone)]
pub struct ProducerCancel {
    tx: Arc<watch::Sender<bool>>,
}

impl ProducerCancel {
    /// Create a fresh cancellation pair
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Signal cancellation; idempotent
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl std::fmt::Debug for ProducerCancel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerCancel")
            .field("cancelled", &*self.tx.borrow())
            .finish()
    }
}

/// Producer-facing queue handle
///
/// One producer per pipeline client. Entries from one producer are
/// delivered and acknowledged in publish order.
#[async_trait]
pub trait Producer: Send {
    /// Publish an entry, waiting for space if the queue is full
    ///
    /// Returns the assigned entry id and `true` on acceptance, or
    /// `(EntryId(0), false)` when the producer or queue is closing.
    async fn publish(&mut self, entry: Entry) -> (EntryId, bool);

    /// Publish without waiting
    ///
    /// Returns `(EntryId(0), false)` immediately when the queue cannot
    /// accept the entry right now.
    async fn try_publish(&mut self, entry: Entry) -> (EntryId, bool);

    /// Close the producer
    ///
    /// Unblocks an in-flight `publish`. Entries already accepted are
    /// still delivered and acknowledged normally.
    fn close(&mut self);

    /// The producer's private cancellation handle
    fn cancel_handle(&self) -> ProducerCancel;
}

/// A group of entries handed to one output worker
pub trait Batch: Send + Sync {
    /// Monotonic batch identifier
    fn id(&self) -> u64;

    /// Number of entries in the batch
    fn count(&self) -> usize;

    /// Access an entry by index
    fn entry(&self, i: usize) -> Option<&Entry>;

    /// Move the entries out of the batch
    ///
    /// The batch keeps its acknowledgement bookkeeping; only the payload
    /// moves. Subsequent calls return an empty vector.
    fn take_entries(&mut self) -> Vec<Entry>;

    /// Acknowledge the batch
    ///
    /// Advances the queue's ACK cursor and, for the disk queue, its
    /// persisted read position. Calling `done` twice is a no-op.
    fn done(&self);
}

/// Abstract queue shared by the memory and disk implementations
#[async_trait]
pub trait Queue: Send + Sync {
    /// Configuration name of this implementation ("mem" / "disk")
    fn queue_type(&self) -> &'static str;

    /// The buffer bounds this queue enforces
    fn buffer_config(&self) -> BufferConfig;

    /// Create a producer handle
    fn producer(&self, config: ProducerConfig) -> Box<dyn Producer>;

    /// Pull the next batch, waiting until at least one entry is ready
    ///
    /// Returns at most `max_events` entries; fewer when a flush timeout
    /// expires or the queue is closing. `get(0)` returns an empty batch
    /// immediately. Fails with [`QueueError::Closed`] once the queue has
    /// shut down and no entries remain.
    ///
    /// [`QueueError::Closed`]: crate::QueueError::Closed
    async fn get(&self, max_events: usize) -> Result<Box<dyn Batch>>;

    /// Begin shutdown; idempotent and non-blocking
    fn close(&self);

    /// Wait until shutdown has completed
    async fn done(&self);
}
