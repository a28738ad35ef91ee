//! skiff-stress - pipeline stress and soak tool
//!
//! Drives the full publishing pipeline with synthetic producers against
//! a counting (optionally flaky) output, then prints the totals. Useful
//! for shaking out queue regressions under load.
//!
//! # Usage
//!
//! ```bash
//! # 8 producers x 10k events through the memory queue
//! skiff-stress --producers 8 --events 10000
//!
//! # Disk queue from a config file, with a flaky output
//! skiff-stress --config skiff.toml --fail-every 7
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skiff_config::{Config, LogFormat, QueueSettings, QueueType};
use skiff_event::Event;
use skiff_pipeline::{
    ClientConfig, OutputClient, OutputGroup, OutputGroupConfig, Pipeline, PublishOutcome,
    Settings,
};
use skiff_queue::{
    CountingObserver, DiskQueue, Entry, MemoryQueue, Queue, QueueObserver,
};

/// Pipeline stress and soak tool
#[derive(Parser, Debug)]
#[command(name = "skiff-stress")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a configuration file; defaults apply without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured queue type (mem, disk)
    #[arg(long)]
    queue: Option<String>,

    /// Number of concurrent producers
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Events published per producer
    #[arg(long, default_value_t = 10_000)]
    events: usize,

    /// Approximate payload size per event in bytes
    #[arg(long, default_value_t = 256)]
    payload_size: usize,

    /// Batch size the output workers request
    #[arg(long, default_value_t = 512)]
    batch_size: usize,

    /// Make the output fail every Nth batch to exercise the retry path
    #[arg(long)]
    fail_every: Option<u64>,
}

/// Output that counts events and optionally fails on a schedule
struct CountingOutput {
    events: AtomicU64,
    batches: AtomicU64,
    fail_every: Option<u64>,
}

#[async_trait]
impl OutputClient for CountingOutput {
    async fn publish(&self, events: &[Entry]) -> PublishOutcome {
        let batch_number = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(every) = self.fail_every {
            if batch_number % every == 0 {
                return PublishOutcome::RetryAll;
            }
        }
        self.events.fetch_add(events.len() as u64, Ordering::Relaxed);
        PublishOutcome::Success
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(queue) = &cli.queue {
        config.queue.queue_type = match queue.as_str() {
            "mem" => QueueType::Mem,
            "disk" => QueueType::Disk,
            other => anyhow::bail!("unknown queue type '{other}' (expected mem or disk)"),
        };
    }
    if let Some(every) = cli.fail_every {
        anyhow::ensure!(every >= 2, "--fail-every must be at least 2");
    }

    init_logging(&config)?;

    let observer = Arc::new(CountingObserver::new());
    let queue: Arc<dyn Queue> = match config.queue.settings()? {
        QueueSettings::Memory(settings) => Arc::new(MemoryQueue::with_observer(
            settings,
            Arc::clone(&observer) as Arc<dyn QueueObserver>,
        )?),
        QueueSettings::Disk(settings) => Arc::new(DiskQueue::with_observer(
            settings,
            Arc::clone(&observer) as Arc<dyn QueueObserver>,
        )?),
    };

    let pipeline = Arc::new(Pipeline::new(Arc::clone(&queue), Settings::default()));

    let output = Arc::new(CountingOutput {
        events: AtomicU64::new(0),
        batches: AtomicU64::new(0),
        fail_every: cli.fail_every,
    });
    let group = OutputGroup::start(
        Arc::clone(&queue),
        vec![Arc::clone(&output) as Arc<dyn OutputClient>],
        OutputGroupConfig {
            batch_size: cli.batch_size,
            ..OutputGroupConfig::default()
        },
    );
    let output_metrics = group.metrics_handle();

    let total = cli.producers * cli.events;
    tracing::info!(
        queue_type = queue.queue_type(),
        producers = cli.producers,
        events_per_producer = cli.events,
        total,
        payload_size = cli.payload_size,
        "stress run starting"
    );

    let started = Instant::now();
    let acked = Arc::new(AtomicU64::new(0));

    let mut tasks = Vec::with_capacity(cli.producers);
    for producer_id in 0..cli.producers {
        let pipeline = Arc::clone(&pipeline);
        let acked = Arc::clone(&acked);
        let events = cli.events;
        let payload_size = cli.payload_size;

        tasks.push(tokio::spawn(async move {
            let client = pipeline.connect_with(ClientConfig {
                ack: Some(Arc::new(move |count| {
                    acked.fetch_add(count as u64, Ordering::Relaxed);
                })),
                ..ClientConfig::default()
            });

            let mut published = 0usize;
            let mut payload = String::with_capacity(payload_size);
            for i in 0..events {
                payload.clear();
                // Scoped so the thread-local RNG never crosses an await.
                {
                    let mut rng = rand::thread_rng();
                    while payload.len() < payload_size {
                        payload.push(rng.gen_range('a'..='z'));
                    }
                }

                let mut event = Event::new();
                event.fields_mut().put("producer", json!(producer_id));
                event.fields_mut().put("sequence", json!(i));
                event.fields_mut().put("message", json!(payload));

                match client.publish(event).await {
                    Ok(true) => published += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(producer = producer_id, error = %e, "publish failed");
                        break;
                    }
                }
            }

            // Wait for this producer's events to be acknowledged before
            // closing, so the totals below are exact.
            while client.pending() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            client.close().await.ok();
            published
        }));
    }

    let mut published = 0usize;
    for task in tasks {
        published += task.await.context("producer task panicked")?;
    }

    pipeline.close().await.ok();
    group.stop().await;

    let elapsed = started.elapsed();
    let queue_stats = observer.snapshot();
    let output_stats = output_metrics.snapshot();
    let rate = published as f64 / elapsed.as_secs_f64();

    tracing::info!(
        published,
        acked = acked.load(Ordering::Relaxed),
        delivered = output.events.load(Ordering::Relaxed),
        retried_batches = output_stats.retries,
        abandoned = output_stats.events_abandoned,
        queue_added = queue_stats.added_events,
        queue_acked = queue_stats.acked_events,
        queue_dropped = queue_stats.dropped_events,
        elapsed_ms = elapsed.as_millis() as u64,
        events_per_sec = rate as u64,
        "stress run finished"
    );

    println!(
        "{published} events published, {} delivered in {:.2}s ({:.0} events/s)",
        output.events.load(Ordering::Relaxed),
        elapsed.as_secs_f64(),
        rate,
    );

    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log.level.as_str()))
        .map_err(|e| anyhow::anyhow!("invalid log level: {e}"))?;

    let registry = tracing_subscriber::registry().with(filter);
    match config.log.format {
        LogFormat::Console => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}
