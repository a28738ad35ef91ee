//! Output worker group
//!
//! One consumer task per output client: pull a batch, publish it, and
//! acknowledge. A failed subset re-enters through the worker's local
//! retry queue with exponential backoff; the underlying queue batch is
//! acknowledged only once every one of its events has been published,
//! so retries never touch the producer side.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use skiff_queue::{Batch, Entry, Queue};

use crate::DEFAULT_BATCH_SIZE;

/// Result of publishing a batch to an output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Every event was accepted downstream
    Success,
    /// The listed indices failed and must be retried
    Retry(Vec<usize>),
    /// Nothing was accepted; retry the whole batch
    RetryAll,
}

/// A downstream destination for event batches
#[async_trait]
pub trait OutputClient: Send + Sync {
    /// Publish a batch; partial failures report the failed indices
    async fn publish(&self, events: &[Entry]) -> PublishOutcome;

    /// Name for logging
    fn name(&self) -> &str {
        "output"
    }
}

/// Worker tuning
#[derive(Debug, Clone)]
pub struct OutputGroupConfig {
    /// Preferred batch size requested from the queue; the queue may
    /// return fewer on flush timeout or close
    pub batch_size: usize,

    /// First retry delay after a failed publish
    pub retry_backoff: Duration,

    /// Backoff cap
    pub max_retry_backoff: Duration,
}

impl Default for OutputGroupConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(10),
        }
    }
}

/// Shared ACK bookkeeping of one queue batch
///
/// Split batches (partial retries) share the origin; the queue-side
/// `done` fires exactly once, when the last event is published or the
/// batch is abandoned at shutdown.
struct BatchOrigin {
    batch: Box<dyn Batch>,
    outstanding: AtomicUsize,
}

impl BatchOrigin {
    fn complete(&self, count: usize) {
        if count == 0 {
            return;
        }
        let prev = self.outstanding.fetch_sub(count, Ordering::AcqRel);
        if prev <= count {
            self.batch.done();
        }
    }
}

/// A unit of work in a worker loop: fresh batch or retried subset
struct WorkBatch {
    events: Vec<Entry>,
    origin: Arc<BatchOrigin>,
    attempt: u32,
}

impl WorkBatch {
    fn from_queue(mut batch: Box<dyn Batch>) -> Self {
        let events = batch.take_entries();
        let outstanding = AtomicUsize::new(events.len());
        Self {
            events,
            origin: Arc::new(BatchOrigin {
                batch,
                outstanding,
            }),
            attempt: 0,
        }
    }

    /// Acknowledge the published part and carve out the failed subset
    fn split_retry(mut self, mut failed: Vec<usize>) -> Option<WorkBatch> {
        failed.sort_unstable();
        failed.dedup();
        failed.retain(|&i| i < self.events.len());
        if failed.is_empty() {
            self.origin.complete(self.events.len());
            return None;
        }

        let mut retry_events = Vec::with_capacity(failed.len());
        for &i in &failed {
            retry_events.push(self.events[i].clone());
        }
        self.origin.complete(self.events.len() - retry_events.len());

        Some(WorkBatch {
            events: retry_events,
            origin: Arc::clone(&self.origin),
            attempt: self.attempt + 1,
        })
    }
}

/// Per-worker metrics
#[derive(Debug, Default)]
pub struct OutputMetrics {
    batches_published: AtomicU64,
    events_published: AtomicU64,
    retries: AtomicU64,
    events_abandoned: AtomicU64,
}

/// Point-in-time copy of one worker's counters
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputSnapshot {
    pub batches_published: u64,
    pub events_published: u64,
    pub retries: u64,
    pub events_abandoned: u64,
}

impl OutputMetrics {
    fn snapshot(&self) -> OutputSnapshot {
        OutputSnapshot {
            batches_published: self.batches_published.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            events_abandoned: self.events_abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Handle for reading a worker group's metrics
#[derive(Clone)]
pub struct OutputMetricsHandle {
    metrics: Vec<Arc<OutputMetrics>>,
}

impl OutputMetricsHandle {
    /// Aggregated snapshot across all workers
    pub fn snapshot(&self) -> OutputSnapshot {
        let mut total = OutputSnapshot::default();
        for metrics in &self.metrics {
            let s = metrics.snapshot();
            total.batches_published += s.batches_published;
            total.events_published += s.events_published;
            total.retries += s.retries;
            total.events_abandoned += s.events_abandoned;
        }
        total
    }
}

/// A group of output workers draining one queue
pub struct OutputGroup {
    workers: Vec<JoinHandle<()>>,
    close_tx: watch::Sender<bool>,
    metrics: Vec<Arc<OutputMetrics>>,
}

impl OutputGroup {
    /// Spawn one worker per output client
    pub fn start(
        queue: Arc<dyn Queue>,
        clients: Vec<Arc<dyn OutputClient>>,
        config: OutputGroupConfig,
    ) -> Self {
        let (close_tx, close_rx) = watch::channel(false);
        let mut workers = Vec::with_capacity(clients.len());
        let mut metrics = Vec::with_capacity(clients.len());

        tracing::info!(
            workers = clients.len(),
            batch_size = config.batch_size,
            "output worker group starting"
        );

        for client in clients {
            let worker_metrics = Arc::new(OutputMetrics::default());
            metrics.push(Arc::clone(&worker_metrics));
            workers.push(tokio::spawn(worker_loop(
                Arc::clone(&queue),
                client,
                config.clone(),
                close_rx.clone(),
                worker_metrics,
            )));
        }

        Self {
            workers,
            close_tx,
            metrics,
        }
    }

    /// Handle for reading the group's metrics
    pub fn metrics_handle(&self) -> OutputMetricsHandle {
        OutputMetricsHandle {
            metrics: self.metrics.clone(),
        }
    }

    /// Signal the workers to stop and wait for them
    ///
    /// Workers also stop on their own once the queue closes and their
    /// retries resolve; this forces the issue for outputs that are down.
    pub async fn stop(self) {
        let _ = self.close_tx.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
        tracing::debug!("output worker group stopped");
    }
}

async fn worker_loop(
    queue: Arc<dyn Queue>,
    client: Arc<dyn OutputClient>,
    config: OutputGroupConfig,
    mut close_rx: watch::Receiver<bool>,
    metrics: Arc<OutputMetrics>,
) {
    let name = client.name().to_string();
    tracing::debug!(output = %name, "output worker starting");

    let mut retries: VecDeque<WorkBatch> = VecDeque::new();
    let mut backoff = config.retry_backoff;

    'outer: loop {
        let work = if let Some(retry) = retries.pop_front() {
            // Wait out the backoff before re-presenting, unless shutdown
            // is forcing the issue.
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = close_rx.wait_for(|closed| *closed) => {
                    retries.push_front(retry);
                    break 'outer;
                }
            }
            retry
        } else {
            backoff = config.retry_backoff;
            tokio::select! {
                result = queue.get(config.batch_size) => match result {
                    Ok(batch) => {
                        if batch.count() == 0 {
                            batch.done();
                            continue;
                        }
                        WorkBatch::from_queue(batch)
                    }
                    Err(_) => break 'outer,
                },
                _ = close_rx.wait_for(|closed| *closed) => break 'outer,
            }
        };

        match client.publish(&work.events).await {
            PublishOutcome::Success => {
                metrics
                    .batches_published
                    .fetch_add(1, Ordering::Relaxed);
                metrics
                    .events_published
                    .fetch_add(work.events.len() as u64, Ordering::Relaxed);
                let count = work.events.len();
                work.origin.complete(count);
                backoff = config.retry_backoff;
            }
            PublishOutcome::Retry(failed) => {
                metrics.retries.fetch_add(1, Ordering::Relaxed);
                let failed_count = failed.len();
                let published = work.events.len().saturating_sub(failed_count);
                metrics
                    .events_published
                    .fetch_add(published as u64, Ordering::Relaxed);
                tracing::debug!(
                    output = %name,
                    attempt = work.attempt,
                    failed = failed_count,
                    "partial publish failure, retrying subset"
                );
                if let Some(retry) = work.split_retry(failed) {
                    retries.push_back(retry);
                    backoff = (backoff * 2).min(config.max_retry_backoff);
                }
            }
            PublishOutcome::RetryAll => {
                metrics.retries.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    output = %name,
                    attempt = work.attempt,
                    events = work.events.len(),
                    "publish failed, retrying batch"
                );
                retries.push_back(work);
                backoff = (backoff * 2).min(config.max_retry_backoff);
            }
        }
    }

    // Whatever is still unpublished is abandoned: the queue batch is
    // released so queue shutdown can finish, and the count is kept
    // honest in the metrics. Stop after closing the pipeline; a disk
    // queue that is already shut down ignores the release and replays
    // the events on restart.
    let mut abandoned = 0;
    for work in retries {
        abandoned += work.events.len();
        let count = work.events.len();
        work.origin.complete(count);
    }
    if abandoned > 0 {
        metrics
            .events_abandoned
            .fetch_add(abandoned as u64, Ordering::Relaxed);
        tracing::warn!(
            output = %name,
            abandoned,
            "output worker stopping with unpublished events"
        );
    }

    tracing::debug!(output = %name, "output worker stopped");
}
