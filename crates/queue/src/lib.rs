//! Skiff - Queue
//!
//! Bounded event buffering between producers and output workers.
//!
//! # Architecture
//!
//! ```text
//! [Producers]                [Broker task]                [Consumers]
//!    publish ──┐                                        ┌──→ get() → Batch
//!    publish ──┼──→ push channel ──→ ring / segments ───┤
//!    publish ──┘                         ▲              └──→ batch.done()
//!                                        └──────── ack channel
//! ```
//!
//! Two implementations share the [`Queue`] trait:
//!
//! - [`memqueue::MemoryQueue`]: a bounded in-memory ring served by a single
//!   broker task. Fast, volatile.
//! - [`diskqueue::DiskQueue`]: a segmented append-only log on disk with
//!   asynchronous writer/reader/deleter loops. Survives restarts; events
//!   are acknowledged to producers once persisted.
//!
//! # Key Design
//!
//! - **Message passing, not shared locks**: all queue state is owned by
//!   one broker task; producers and consumers talk to it over channels.
//! - **Coalesced ACKs**: a producer's callback fires once per ACK advance
//!   with a count, never once per event.
//! - **At-least-once**: an accepted event is delivered in exactly one
//!   batch per queue lifetime; after a disk queue crash an unacknowledged
//!   event may be delivered again.

pub mod diskqueue;
pub mod memqueue;

mod ack;
mod encoder;
mod entry;
mod error;
mod observer;
mod queue;

pub use diskqueue::{DiskQueue, DiskSettings};
pub use encoder::{CborEncoder, EntryDecoder, EntryEncoder};
pub use memqueue::{MemoryQueue, MemorySettings};
pub use entry::{Entry, EntryId};
pub use error::{QueueError, Result};
pub use observer::{CountingObserver, NoopObserver, ObserverSnapshot, QueueObserver};
pub use queue::{AckFn, Batch, BufferConfig, Producer, ProducerCancel, ProducerConfig, Queue};

/// Default number of events held by the memory queue
pub const DEFAULT_MEMORY_EVENTS: usize = 4096;

/// Default maximum number of entries handed out per batch
pub const DEFAULT_MAX_GET_REQUEST: usize = 1024;

/// Default segment size for the disk queue (100 MiB)
pub const DEFAULT_SEGMENT_SIZE: u64 = 100 * 1024 * 1024;
