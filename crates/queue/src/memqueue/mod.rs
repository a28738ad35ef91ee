//! Memory queue - bounded in-memory ring served by a single broker task
//!
//! # Design
//!
//! - One broker task owns the ring buffer; producers, consumers, and
//!   batch acknowledgements reach it over three channels.
//! - A get request that cannot be filled immediately waits up to
//!   `flush_timeout` for more events before responding short.
//! - Acknowledgements coalesce: N acked events from one producer cost one
//!   callback invocation, not N.
//!
//! # Example
//!
//! ```ignore
//! let queue = MemoryQueue::new(MemorySettings::default())?;
//! let mut producer = queue.producer(ProducerConfig::default());
//! let (id, accepted) = producer.publish(event.into()).await;
//!
//! let mut batch = queue.get(64).await?;
//! // ... ship batch entries ...
//! batch.done();
//! ```

mod broker;
mod buffer;
mod internal;
mod producer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::entry::Entry;
use crate::error::{QueueError, Result};
use crate::observer::{NoopObserver, QueueObserver};
use crate::queue::{Batch, BufferConfig, Producer, ProducerConfig, Queue};
use crate::{DEFAULT_MAX_GET_REQUEST, DEFAULT_MEMORY_EVENTS};

use broker::{spawn, AckSender, BrokerHandles};
use internal::{AckState, BatchPayload, GetRequest};
use producer::MemoryProducer;

/// Configuration name of the memory queue
pub const QUEUE_TYPE: &str = "mem";

/// Memory queue tuning
#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// Maximum number of events held
    pub events: usize,

    /// Maximum number of entries handed out per batch
    pub max_get_request: usize,

    /// How long a partially-filled get request waits before responding
    /// short; zero responds as soon as any event is available
    pub flush_timeout: Duration,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            events: DEFAULT_MEMORY_EVENTS,
            max_get_request: DEFAULT_MAX_GET_REQUEST,
            flush_timeout: Duration::ZERO,
        }
    }
}

impl MemorySettings {
    /// Check the settings for construction
    pub fn validate(&self) -> Result<()> {
        if self.events == 0 {
            return Err(QueueError::Settings("events must be positive".into()));
        }
        if self.max_get_request == 0 {
            return Err(QueueError::Settings(
                "max_get_request must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded in-memory event queue
pub struct MemoryQueue {
    settings: MemorySettings,
    handles: BrokerHandles,
    observer: Arc<dyn QueueObserver>,
}

impl MemoryQueue {
    /// Create a memory queue with a no-op observer
    pub fn new(settings: MemorySettings) -> Result<Self> {
        Self::with_observer(settings, Arc::new(NoopObserver))
    }

    /// Create a memory queue reporting buffer movement to `observer`
    pub fn with_observer(
        settings: MemorySettings,
        observer: Arc<dyn QueueObserver>,
    ) -> Result<Self> {
        settings.validate()?;
        observer.max_events(settings.events);

        tracing::info!(
            events = settings.events,
            max_get_request = settings.max_get_request,
            flush_timeout_ms = settings.flush_timeout.as_millis() as u64,
            "starting memory queue"
        );

        let handles = spawn(settings.clone(), Arc::clone(&observer));
        Ok(Self {
            settings,
            handles,
            observer,
        })
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn queue_type(&self) -> &'static str {
        QUEUE_TYPE
    }

    fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            max_events: Some(self.settings.events),
            max_bytes: None,
        }
    }

    fn producer(&self, config: ProducerConfig) -> Box<dyn Producer> {
        let ack = config.ack.map(|cb| Arc::new(AckState::new(cb)));
        Box::new(MemoryProducer::new(
            self.handles.push_tx.clone(),
            self.handles.closing_rx.clone(),
            ack,
            config.encoder,
            Arc::clone(&self.observer),
        ))
    }

    async fn get(&self, max_events: usize) -> Result<Box<dyn Batch>> {
        if max_events == 0 {
            return Ok(Box::new(MemoryBatch::empty()));
        }

        let (tx, rx) = oneshot::channel();
        self.handles
            .get_tx
            .send(GetRequest {
                count: max_events,
                resp: tx,
            })
            .await
            .map_err(|_| QueueError::Closed)?;

        let payload = rx.await.map_err(|_| QueueError::Closed)?;
        Ok(Box::new(MemoryBatch::new(payload, self.handles.ack.clone())))
    }

    fn close(&self) {
        let _ = self.handles.close_tx.send(true);
    }

    async fn done(&self) {
        let mut rx = self.handles.done_rx.clone();
        // Err means the broker is gone, which is just as done.
        let _ = rx.wait_for(|finished| *finished).await;
    }
}

/// Batch handed out by the memory queue
struct MemoryBatch {
    id: u64,
    entries: Vec<Entry>,
    ack: Option<AckSender>,
    done_sent: AtomicBool,
}

impl MemoryBatch {
    fn new(payload: BatchPayload, ack: AckSender) -> Self {
        Self {
            id: payload.id,
            entries: payload.entries,
            ack: Some(ack),
            done_sent: AtomicBool::new(false),
        }
    }

    fn empty() -> Self {
        Self {
            id: 0,
            entries: Vec::new(),
            ack: None,
            done_sent: AtomicBool::new(false),
        }
    }
}

impl Batch for MemoryBatch {
    fn id(&self) -> u64 {
        self.id
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, i: usize) -> Option<&Entry> {
        self.entries.get(i)
    }

    fn take_entries(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.entries)
    }

    fn done(&self) {
        if self.done_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ack) = &self.ack {
            ack.send(self.id);
        }
    }
}

#[cfg(test)]
#[path = "memqueue_test.rs"]
mod memqueue_test;
