//! Memory queue benchmark suite
//!
//! Publish/consume throughput of the broker under different batch sizes.
//!
//! Run with: `cargo bench -p skiff-queue`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;

use skiff_event::Event;
use skiff_queue::{Batch, Entry, MemoryQueue, MemorySettings, Producer, ProducerConfig, Queue};

fn make_entry(i: usize) -> Entry {
    let mut event = Event::new();
    event.fields_mut().put("message", json!("benchmark event payload"));
    event.fields_mut().put("count", json!(i));
    Entry::Event(event)
}

/// Publish N events, then drain them in batches and ack
fn bench_publish_consume(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish_consume");

    for batch_size in [1usize, 16, 256, 1024] {
        const EVENTS: usize = 4096;
        group.throughput(Throughput::Elements(EVENTS as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                b.to_async(&rt).iter(|| async move {
                    let queue = MemoryQueue::new(MemorySettings {
                        events: EVENTS,
                        max_get_request: 1024,
                        ..MemorySettings::default()
                    })
                    .unwrap();
                    let mut producer = queue.producer(ProducerConfig::default());

                    for i in 0..EVENTS {
                        producer.publish(make_entry(i)).await;
                    }

                    let mut consumed = 0;
                    while consumed < EVENTS {
                        let batch = queue.get(batch_size).await.unwrap();
                        consumed += batch.count();
                        batch.done();
                    }
                    black_box(consumed)
                });
            },
        );
    }

    group.finish();
}

/// Publish-side cost alone, with a discarding consumer running behind
fn bench_publish_only(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Elements(1));

    group.bench_function("tracked_producer", |b| {
        // Queue construction spawns the broker task and needs the
        // runtime entered.
        let _guard = rt.enter();
        let queue = Arc::new(
            MemoryQueue::new(MemorySettings {
                events: 1 << 16,
                ..MemorySettings::default()
            })
            .unwrap(),
        );

        // Drain in the background so the buffer never fills.
        let drain = Arc::clone(&queue);
        rt.spawn(async move {
            while let Ok(batch) = drain.get(1024).await {
                batch.done();
            }
        });

        let producer = Arc::new(tokio::sync::Mutex::new(queue.producer(ProducerConfig {
            ack: Some(Arc::new(|_count| {})),
            ..ProducerConfig::default()
        })));
        b.to_async(&rt).iter(|| {
            let producer = Arc::clone(&producer);
            async move {
                let mut producer = producer.lock().await;
                black_box(producer.publish(make_entry(0)).await)
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_publish_consume, bench_publish_only);
criterion_main!(benches);
