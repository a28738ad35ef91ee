//! Disk queue tests
//!
//! Persistence, recovery, corruption handling, and capacity blocking,
//! exercised through the public queue API against temp directories.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use crate::diskqueue::{DiskQueue, DiskSettings};
use crate::encoder::{CborEncoder, EntryEncoder};
use crate::{Batch, Entry, Producer, ProducerConfig, Queue, QueueError};
use skiff_event::Event;

/// Fixed-timestamp event so every encoded frame has the same size
fn event(i: usize, pad: usize) -> Event {
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut event = Event::with_timestamp(ts);
    event.fields_mut().put("count", json!(i as u64 + 1000));
    if pad > 0 {
        event.fields_mut().put("pad", json!("x".repeat(pad)));
    }
    event
}

fn count_of(entry: &Entry) -> u64 {
    entry
        .as_event()
        .unwrap()
        .fields()
        .get("count")
        .unwrap()
        .as_u64()
        .unwrap()
        - 1000
}

fn small_settings(dir: &TempDir) -> DiskSettings {
    let mut settings = DiskSettings::new(dir.path());
    settings.max_segment_size = 64 * 1024;
    settings.retry_interval = Duration::from_millis(10);
    settings.max_retry_interval = Duration::from_millis(100);
    settings
}

fn ack_config() -> (ProducerConfig, mpsc::UnboundedReceiver<usize>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = ProducerConfig {
        ack: Some(Arc::new(move |count| {
            let _ = tx.send(count);
        })),
        ..ProducerConfig::default()
    };
    (config, rx)
}

/// Collect exactly `count` entries through repeated gets, acking each
/// batch
async fn consume(queue: &DiskQueue, count: usize) -> Vec<u64> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let batch = timeout(Duration::from_secs(5), queue.get(count - out.len()))
            .await
            .expect("get timed out")
            .expect("queue closed early");
        for i in 0..batch.count() {
            out.push(count_of(batch.entry(i).unwrap()));
        }
        batch.done();
    }
    out
}

#[tokio::test]
async fn test_publish_persist_consume_in_order() {
    let dir = TempDir::new().unwrap();
    let queue = DiskQueue::new(small_settings(&dir)).unwrap();
    let (config, mut acks) = ack_config();
    let mut producer = queue.producer(config);

    for i in 0..20 {
        let (_, accepted) = producer.publish(Entry::Event(event(i, 0))).await;
        assert!(accepted);
    }

    // Producers are acknowledged on persistence, before any consumer
    // shows up.
    let mut write_acked = 0;
    while write_acked < 20 {
        write_acked += timeout(Duration::from_secs(5), acks.recv())
            .await
            .expect("write ack timed out")
            .unwrap();
    }
    assert_eq!(write_acked, 20);

    let values = consume(&queue, 20).await;
    assert_eq!(values, (0..20).collect::<Vec<u64>>());

    queue.close();
    timeout(Duration::from_secs(5), queue.done())
        .await
        .expect("shutdown timed out");
}

#[tokio::test]
async fn test_restart_resumes_at_acked_position() {
    let dir = TempDir::new().unwrap();

    // First run: 50 writes, 20 acks.
    {
        let queue = DiskQueue::new(small_settings(&dir)).unwrap();
        let mut producer = queue.producer(ProducerConfig::default());
        for i in 0..50 {
            let (_, accepted) = producer.publish(Entry::Event(event(i, 0))).await;
            assert!(accepted);
        }
        let acked = consume(&queue, 20).await;
        assert_eq!(acked, (0..20).collect::<Vec<u64>>());

        queue.close();
        timeout(Duration::from_secs(5), queue.done())
            .await
            .expect("shutdown timed out");
    }

    // Second run: the acked prefix never reappears; 20..49 replay in
    // order.
    {
        let queue = DiskQueue::new(small_settings(&dir)).unwrap();
        let values = consume(&queue, 30).await;
        assert_eq!(values, (20..50).collect::<Vec<u64>>());

        queue.close();
        queue.done().await;
    }
}

#[tokio::test]
async fn test_lost_state_file_replays_but_loses_nothing() {
    let dir = TempDir::new().unwrap();

    {
        let queue = DiskQueue::new(small_settings(&dir)).unwrap();
        let mut producer = queue.producer(ProducerConfig::default());
        for i in 0..5 {
            producer.publish(Entry::Event(event(i, 0))).await;
        }
        let acked = consume(&queue, 2).await;
        assert_eq!(acked, vec![0, 1]);
        queue.close();
        queue.done().await;
    }

    std::fs::remove_file(dir.path().join("state.dat")).unwrap();

    {
        let queue = DiskQueue::new(small_settings(&dir)).unwrap();
        // The acked prefix replays (the position is gone), but every
        // unacknowledged event is still there.
        let values = consume(&queue, 5).await;
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        queue.close();
        queue.done().await;
    }
}

#[tokio::test]
async fn test_corrupted_frame_truncates_segment_and_continues() {
    let dir = TempDir::new().unwrap();
    let settings = small_settings(&dir);

    {
        let queue = DiskQueue::new(settings.clone()).unwrap();
        let mut producer = queue.producer(ProducerConfig::default());
        for i in 0..10 {
            producer.publish(Entry::Event(event(i, 0))).await;
        }
        queue.close();
        queue.done().await;
    }

    // All ten frames are the same size; flip a payload byte inside the
    // sixth frame of segment 0.
    let frame_bytes = {
        let encoded = CborEncoder.encode(&event(0, 0)).unwrap();
        encoded.len() as u64 + super::frames::FRAME_OVERHEAD
    };
    let seg_path = dir.path().join("0.seg");
    let mut data = std::fs::read(&seg_path).unwrap();
    let corrupt_at = (super::segments::SEGMENT_HEADER_SIZE + 5 * frame_bytes + 6) as usize;
    data[corrupt_at] ^= 0xff;
    std::fs::write(&seg_path, &data).unwrap();

    {
        let queue = DiskQueue::new(settings).unwrap();

        // Frames before the corruption arrive intact.
        let values = consume(&queue, 5).await;
        assert_eq!(values, vec![0, 1, 2, 3, 4]);

        // Nothing after the corruption point survives from segment 0,
        // but the queue keeps working: new events land in a new segment
        // and flow through.
        let mut producer = queue.producer(ProducerConfig::default());
        producer.publish(Entry::Event(event(77, 0))).await;
        let values = consume(&queue, 1).await;
        assert_eq!(values, vec![77]);

        queue.close();
        queue.done().await;
    }
}

#[tokio::test]
async fn test_full_queue_blocks_until_deletion_frees_space() {
    let dir = TempDir::new().unwrap();
    let mut settings = small_settings(&dir);
    // Each padded event overflows a segment on its own, so every event
    // gets its own ~1.1 KiB segment, and the buffer holds three of them.
    settings.max_segment_size = 1024;
    settings.max_buffer_size = 4096;

    let queue = Arc::new(DiskQueue::new(settings).unwrap());
    let mut producer = queue.producer(ProducerConfig::default());

    for i in 0..3 {
        let (_, accepted) = producer.publish(Entry::Event(event(i, 1000))).await;
        assert!(accepted, "event {i} should fit");
    }

    let blocked = tokio::spawn(async move {
        let result = producer.publish(Entry::Event(event(3, 1000))).await;
        (producer, result)
    });
    sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "publish should block at capacity");

    // Ack the first event; its segment is deleted and space frees up.
    let batch = queue.get(1).await.unwrap();
    assert_eq!(count_of(batch.entry(0).unwrap()), 0);
    batch.done();

    let (_, (_, accepted)) = timeout(Duration::from_secs(5), blocked)
        .await
        .expect("blocked publish never resumed")
        .unwrap();
    assert!(accepted);

    queue.close();
    queue.done().await;
}

#[tokio::test]
async fn test_try_publish_full_queue_fails_fast() {
    let dir = TempDir::new().unwrap();
    let mut settings = small_settings(&dir);
    settings.max_segment_size = 1024;
    settings.max_buffer_size = 2048;

    let queue = DiskQueue::new(settings).unwrap();
    let mut producer = queue.producer(ProducerConfig::default());

    let (_, accepted) = producer.publish(Entry::Event(event(0, 1000))).await;
    assert!(accepted);

    let started = Instant::now();
    let (id, accepted) = producer.try_publish(Entry::Event(event(1, 1000))).await;
    assert_eq!((id.0, accepted), (0, false));
    assert!(started.elapsed() < Duration::from_millis(200));

    queue.close();
    queue.done().await;
}

#[tokio::test]
async fn test_duplicate_done_is_noop() {
    let dir = TempDir::new().unwrap();
    let queue = DiskQueue::new(small_settings(&dir)).unwrap();
    let mut producer = queue.producer(ProducerConfig::default());

    for i in 0..6 {
        producer.publish(Entry::Event(event(i, 0))).await;
    }

    let first = timeout(Duration::from_secs(5), queue.get(3))
        .await
        .unwrap()
        .unwrap();
    let got_first = first.count();
    first.done();
    first.done();

    // The remaining events still arrive exactly once.
    let rest = consume(&queue, 6 - got_first).await;
    assert_eq!(rest.len(), 6 - got_first);
    let mut all: Vec<u64> = (0..first.count()).map(|i| count_of(first.entry(i).unwrap())).collect();
    all.extend(rest);
    assert_eq!(all, (0..6).collect::<Vec<u64>>());

    queue.close();
    queue.done().await;
}

#[tokio::test]
async fn test_get_zero_returns_empty_batch() {
    let dir = TempDir::new().unwrap();
    let queue = DiskQueue::new(small_settings(&dir)).unwrap();

    let started = Instant::now();
    let batch = queue.get(0).await.unwrap();
    assert_eq!(batch.count(), 0);
    assert!(started.elapsed() < Duration::from_millis(50));
    batch.done();

    queue.close();
    queue.done().await;
}

#[tokio::test]
async fn test_close_unblocks_waiting_consumer() {
    let dir = TempDir::new().unwrap();
    let queue = Arc::new(DiskQueue::new(small_settings(&dir)).unwrap());

    let waiting = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.get(1).await.map(|b| b.count()) }
    });
    sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    queue.close();
    let result = timeout(Duration::from_secs(5), waiting)
        .await
        .expect("get did not unblock")
        .unwrap();
    assert!(matches!(result, Err(QueueError::Closed)));

    queue.done().await;
}

#[tokio::test]
async fn test_oversized_event_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut settings = small_settings(&dir);
    settings.max_segment_size = 1024;
    settings.max_buffer_size = 2048;

    let queue = DiskQueue::new(settings).unwrap();
    let mut producer = queue.producer(ProducerConfig::default());

    // Larger than the whole buffer: blocking would never resolve, so it
    // is refused outright.
    let (id, accepted) = producer.publish(Entry::Event(event(0, 4000))).await;
    assert_eq!((id.0, accepted), (0, false));

    queue.close();
    queue.done().await;
}

#[test]
fn test_settings_rejected_at_construction() {
    let dir = TempDir::new().unwrap();
    let mut settings = DiskSettings::new(dir.path());
    settings.max_segment_size = 1024 * 1024;
    settings.max_buffer_size = 1024 * 1024;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let _guard = runtime.enter();
    assert!(matches!(
        DiskQueue::new(settings),
        Err(QueueError::Settings(_))
    ));
}
