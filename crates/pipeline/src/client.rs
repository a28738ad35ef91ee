//! Pipeline client - the producer-facing handle
//!
//! A client wraps a queue producer together with its processor chain,
//! publish mode, and acknowledgement bookkeeping. Clients are created
//! with [`Pipeline::connect_with`](crate::Pipeline::connect_with) and
//! must be closed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use skiff_event::{AckTag, Event};
use skiff_queue::{Entry, Producer, ProducerCancel};

use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::processor::{Chain, ClientChain};

/// How a publish behaves when the queue has no room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// Wait for space; fail only on shutdown
    #[default]
    Blocking,
    /// Never wait; drops are counted on the client
    DropIfFull,
    /// Like [`PublishMode::Blocking`], but retry transient refusals a
    /// few times before giving up
    Guaranteed,
}

/// When a closing client waits for outstanding acknowledgements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitCloseMode {
    /// Close immediately; in-flight events are abandoned silently
    #[default]
    NoWaitOnClose,
    /// `Client::close` waits up to `wait_close` for pending ACKs
    WaitOnClientClose,
    /// `Pipeline::close` waits up to the pipeline's `wait_close` for
    /// this client's pending ACKs
    WaitOnPipelineClose,
}

/// Per-client configuration
#[derive(Default)]
pub struct ClientConfig {
    pub publish_mode: PublishMode,
    pub wait_close_mode: WaitCloseMode,
    /// Deadline for [`WaitCloseMode::WaitOnClientClose`]
    pub wait_close: Duration,
    /// Client-specific processors, run before the pipeline-wide chain
    pub processors: Chain,
    /// Coalesced acknowledgement callback
    pub ack: Option<skiff_queue::AckFn>,
    /// Pre-serialize events on the producer side (memory queue only;
    /// the disk queue always applies its own frame codec)
    pub encoder: Option<std::sync::Arc<dyn skiff_queue::EntryEncoder>>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("publish_mode", &self.publish_mode)
            .field("wait_close_mode", &self.wait_close_mode)
            .field("wait_close", &self.wait_close)
            .field("processors", &self.processors)
            .field("ack", &self.ack.is_some())
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

/// State shared between a client and the pipeline's registry
pub(crate) struct ClientShared {
    pub id: u64,
    pub closed: AtomicBool,
    /// Accepted-but-unacknowledged events (tracked clients only)
    pub pending: AtomicU64,
    /// Events dropped by drop-if-full publishes
    pub dropped: AtomicU64,
    /// Signalled whenever `pending` reaches zero
    pub notify: Notify,
    pub wait_close_mode: WaitCloseMode,
    /// Whether acknowledgements are tracked for this client
    pub tracked: bool,
}

impl ClientShared {
    /// ACK-side bookkeeping: drop the pending count and wake waiters at
    /// zero
    pub fn finish_pending(&self, count: u64) {
        let prev = self.pending.fetch_sub(count, Ordering::SeqCst);
        if prev <= count {
            self.notify.notify_waiters();
        }
    }

    /// Wait until no events are pending or the deadline passes; returns
    /// the number of events still pending
    pub async fn wait_pending(&self, deadline: Duration) -> u64 {
        let deadline = Instant::now() + deadline;
        loop {
            if self.pending.load(Ordering::SeqCst) == 0 {
                return 0;
            }
            let notified = self.notify.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending.load(Ordering::SeqCst);
            }
        }
    }
}

/// Producer-facing pipeline handle
pub struct Client {
    pub(crate) shared: Arc<ClientShared>,
    pub(crate) producer: Mutex<Box<dyn Producer>>,
    pub(crate) cancel: ProducerCancel,
    pub(crate) chain: ClientChain,
    pub(crate) mode: PublishMode,
    pub(crate) wait_close: Duration,
    pub(crate) seq: AtomicU64,
    pub(crate) metrics: Arc<PipelineMetrics>,
}

impl Client {
    /// Publish one event
    ///
    /// Returns `Ok(true)` when the event entered the queue, `Ok(false)`
    /// when it was filtered by a processor or dropped by a drop-if-full
    /// publish, and `Err(Closed)` on shutdown.
    pub async fn publish(&self, event: Event) -> Result<bool> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PipelineError::Closed);
        }

        let processed = match self.chain.run(event) {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!(
                    client = self.shared.id,
                    error = %e,
                    "processor failed, dropping event"
                );
                self.metrics.record_failed();
                return Ok(false);
            }
        };
        let Some(mut event) = processed else {
            self.metrics.record_filtered();
            return Ok(false);
        };

        // Processors are done; only now does the event learn where its
        // acknowledgement belongs.
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        event.set_ack_tag(AckTag::Producer {
            id: self.shared.id,
            seq,
        });

        if self.shared.tracked {
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
        }

        let accepted = self.publish_entry(Entry::Event(event)).await;
        if accepted {
            self.metrics.record_published();
            return Ok(true);
        }

        if self.shared.tracked {
            self.shared.finish_pending(1);
        }
        match self.mode {
            PublishMode::DropIfFull => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_dropped();
                Ok(false)
            }
            _ => {
                self.metrics.record_failed();
                Err(PipelineError::Closed)
            }
        }
    }

    /// Publish a batch of events in order; returns how many were
    /// accepted
    pub async fn publish_all(&self, events: Vec<Event>) -> Result<usize> {
        let mut accepted = 0;
        for event in events {
            if self.publish(event).await? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    async fn publish_entry(&self, entry: Entry) -> bool {
        let mut producer = self.producer.lock().await;
        match self.mode {
            PublishMode::DropIfFull => producer.try_publish(entry).await.1,
            PublishMode::Blocking => producer.publish(entry).await.1,
            PublishMode::Guaranteed => {
                // A refusal while the queue is healthy is either
                // momentary or permanent (oversized, unencodable); a few
                // attempts cover the former without spinning on the
                // latter.
                let mut backoff = Duration::from_millis(50);
                for attempt in 0..5 {
                    let (_, accepted) = producer.publish(entry.clone()).await;
                    if accepted {
                        return true;
                    }
                    if self.shared.closed.load(Ordering::Acquire) {
                        return false;
                    }
                    tracing::debug!(
                        client = self.shared.id,
                        attempt,
                        "publish refused, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(1));
                }
                false
            }
        }
    }

    /// Events dropped by drop-if-full publishes
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Accepted events not yet acknowledged (tracked clients only)
    pub fn pending(&self) -> u64 {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Stop publishing and, per the wait-close mode, wait for in-flight
    /// acknowledgements before abandoning them
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if self.shared.tracked
            && self.shared.wait_close_mode == WaitCloseMode::WaitOnClientClose
            && !self.wait_close.is_zero()
        {
            let remaining = self.shared.wait_pending(self.wait_close).await;
            if remaining > 0 {
                tracing::warn!(
                    client = self.shared.id,
                    abandoned = remaining,
                    "close deadline passed with events still unacknowledged"
                );
            }
        }

        self.cancel.cancel();
        self.producer.lock().await.close();
        self.metrics.client_closed();
        tracing::debug!(client = self.shared.id, "pipeline client closed");
        Ok(())
    }
}
