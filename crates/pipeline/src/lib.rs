//! Skiff - Pipeline
//!
//! The publishing pipeline that connects event producers to output
//! workers through a bounded queue.
//!
//! # Architecture
//!
//! ```text
//! [Inputs]                [Pipeline]                  [Outputs]
//!   client.publish ──→ processors ──→ queue ──→ worker ──→ publish()
//!   client.publish ──→ processors ──┘   │       worker ──→ publish()
//!        ▲                              │           │
//!        └────────── ACK counts ◄───────┴─── batch.done()
//! ```
//!
//! # Key Design
//!
//! - **Clients**: each producer connects with its own processor chain,
//!   publish mode (block / drop-if-full / guaranteed), and coalesced ACK
//!   callback.
//! - **Queue-agnostic**: the pipeline treats the memory and disk queues
//!   uniformly through the [`skiff_queue::Queue`] trait.
//! - **Output workers**: one consumer task per output client pulls
//!   batches, publishes, and acknowledges; failed subsets re-enter
//!   through the worker's retry path, never through the producer side.
//! - **Close semantics**: clients can wait for in-flight ACKs up to a
//!   deadline before abandoning; pipeline close broadcasts to clients,
//!   then shuts the queue down.
//!
//! # Example
//!
//! ```ignore
//! let queue = Arc::new(MemoryQueue::new(MemorySettings::default())?);
//! let pipeline = Arc::new(Pipeline::new(queue, Settings::default()));
//!
//! let client = pipeline.connect_with(ClientConfig {
//!     ack: Some(Arc::new(|count| println!("{count} acked"))),
//!     ..ClientConfig::default()
//! });
//! client.publish(event).await?;
//! ```

mod client;
mod error;
mod metrics;
mod output;
mod pipeline;
mod processor;

pub use client::{Client, ClientConfig, PublishMode, WaitCloseMode};
pub use error::{PipelineError, Result};
pub use metrics::{PipelineMetrics, PipelineMetricsHandle, PipelineSnapshot};
pub use output::{
    OutputClient, OutputGroup, OutputGroupConfig, OutputMetricsHandle, OutputSnapshot,
    PublishOutcome,
};
pub use pipeline::{Pipeline, Settings};
pub use processor::{Chain, ClientChain, Processor, ProcessorSupport};

/// Default preferred batch size for output workers
pub const DEFAULT_BATCH_SIZE: usize = 1024;
