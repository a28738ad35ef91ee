//! Pipeline controller
//!
//! Owns the queue, hands out clients, and coordinates shutdown. The
//! controller itself runs no long-lived task: all pipeline state is
//! either inside the queue's broker or on this struct behind a lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use skiff_queue::{Producer, ProducerConfig, Queue};

use crate::client::{Client, ClientConfig, ClientShared, WaitCloseMode};
use crate::error::Result;
use crate::metrics::{PipelineMetrics, PipelineMetricsHandle};
use crate::processor::{Chain, ProcessorSupport};

/// Pipeline-wide settings
#[derive(Default)]
pub struct Settings {
    /// Deadline for clients using
    /// [`WaitCloseMode::WaitOnPipelineClose`]
    pub wait_close: Duration,

    /// Processors applied to every client's events, after the client's
    /// own chain
    pub processors: Chain,
}

/// A registered client as the pipeline sees it
struct RegisteredClient {
    shared: Arc<ClientShared>,
    cancel: skiff_queue::ProducerCancel,
}

/// The publishing pipeline
///
/// Any number of clients may connect; there is no artificial cap.
pub struct Pipeline {
    queue: Arc<dyn Queue>,
    support: ProcessorSupport,
    wait_close: Duration,
    clients: Mutex<Vec<RegisteredClient>>,
    next_client_id: AtomicU64,
    metrics: Arc<PipelineMetrics>,
    closing: AtomicBool,
}

impl Pipeline {
    pub fn new(queue: Arc<dyn Queue>, settings: Settings) -> Self {
        tracing::info!(
            queue_type = queue.queue_type(),
            global_processors = ?settings.processors.names(),
            "pipeline starting"
        );
        Self {
            queue,
            support: ProcessorSupport::new(settings.processors),
            wait_close: settings.wait_close,
            clients: Mutex::new(Vec::new()),
            next_client_id: AtomicU64::new(1),
            metrics: Arc::new(PipelineMetrics::new()),
            closing: AtomicBool::new(false),
        }
    }

    /// Connect with default client settings
    pub fn connect(&self) -> Client {
        self.connect_with(ClientConfig::default())
    }

    /// Connect a new producer client
    pub fn connect_with(&self, config: ClientConfig) -> Client {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        // Acknowledgements are tracked when the caller wants them or a
        // wait-close mode needs the pending count.
        let tracked =
            config.ack.is_some() || config.wait_close_mode != WaitCloseMode::NoWaitOnClose;

        let shared = Arc::new(ClientShared {
            id,
            closed: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
            wait_close_mode: config.wait_close_mode,
            tracked,
        });

        let ack = tracked.then(|| {
            let shared = Arc::clone(&shared);
            let metrics = Arc::clone(&self.metrics);
            let user_ack = config.ack;
            let ack: skiff_queue::AckFn = Arc::new(move |count| {
                metrics.record_acked(count as u64);
                shared.finish_pending(count as u64);
                if let Some(user_ack) = &user_ack {
                    user_ack(count);
                }
            });
            ack
        });

        let producer = self.queue.producer(ProducerConfig {
            ack,
            encoder: config.encoder,
        });
        let cancel = producer.cancel_handle();

        self.clients.lock().push(RegisteredClient {
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        });
        self.metrics.client_connected();
        tracing::debug!(
            client = id,
            tracked,
            mode = ?config.publish_mode,
            "pipeline client connected"
        );

        Client {
            shared,
            producer: tokio::sync::Mutex::new(producer),
            cancel,
            chain: self.support.client_chain(config.processors),
            mode: config.publish_mode,
            wait_close: config.wait_close,
            seq: AtomicU64::new(0),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// The queue this pipeline publishes into
    pub fn queue(&self) -> Arc<dyn Queue> {
        Arc::clone(&self.queue)
    }

    /// Handle for reading pipeline metrics
    pub fn metrics_handle(&self) -> PipelineMetricsHandle {
        PipelineMetricsHandle::new(Arc::clone(&self.metrics))
    }

    /// Shut the pipeline down
    ///
    /// Waits for clients that asked to be waited on, broadcasts close to
    /// every client, then closes the queue and waits for its shutdown to
    /// complete.
    pub async fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            self.queue.done().await;
            return Ok(());
        }

        let clients: Vec<(Arc<ClientShared>, skiff_queue::ProducerCancel)> = self
            .clients
            .lock()
            .iter()
            .map(|rc| (Arc::clone(&rc.shared), rc.cancel.clone()))
            .collect();

        if !self.wait_close.is_zero() {
            for (shared, _) in &clients {
                if shared.tracked
                    && shared.wait_close_mode == WaitCloseMode::WaitOnPipelineClose
                {
                    let remaining = shared.wait_pending(self.wait_close).await;
                    if remaining > 0 {
                        tracing::warn!(
                            client = shared.id,
                            abandoned = remaining,
                            "pipeline close deadline passed with events unacknowledged"
                        );
                    }
                }
            }
        }

        for (shared, cancel) in &clients {
            shared.closed.store(true, Ordering::Release);
            cancel.cancel();
        }

        self.queue.close();
        self.queue.done().await;

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            published = snapshot.published,
            filtered = snapshot.filtered,
            dropped = snapshot.dropped,
            failed = snapshot.failed,
            acked = snapshot.acked,
            "pipeline closed"
        );
        Ok(())
    }
}
