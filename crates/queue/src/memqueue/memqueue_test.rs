//! Memory queue tests
//!
//! Broker behavior exercised through the public queue API: publish/get
//! ordering, ACK coalescing, flush timing, capacity blocking, and close
//! semantics.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use crate::memqueue::{MemoryQueue, MemorySettings};
use crate::{Batch, CountingObserver, Entry, Producer, ProducerConfig, Queue, QueueError};
use skiff_event::Event;

fn event(i: usize) -> Entry {
    let mut event = Event::new();
    event.fields_mut().put("count", json!(i));
    Entry::Event(event)
}

fn settings(events: usize) -> MemorySettings {
    MemorySettings {
        events,
        ..MemorySettings::default()
    }
}

/// Producer config whose ACK callback forwards counts into a channel
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

#[tokio::test]
async fn test_publish_get_roundtrip_in_order() {
    let queue = MemoryQueue::new(settings(16)).unwrap();
    let mut producer = queue.producer(ProducerConfig::default());

    for i in 0..5 {
        let (id, accepted) = producer.publish(event(i)).await;
        assert!(accepted);
        assert_eq!(id.0, i as u64);
    }

    let batch = queue.get(5).await.unwrap();
    assert_eq!(batch.count(), 5);
    for i in 0..5 {
        let entry = batch.entry(i).unwrap();
        let event = entry.as_event().unwrap();
        assert_eq!(event.fields().get("count"), Some(&json!(i)));
    }
    batch.done();
}

#[tokio::test]
async fn test_ack_coalesces_to_one_callback_per_batch() {
    let queue = MemoryQueue::new(settings(128)).unwrap();
    let (config, mut acks) = ack_config();
    let mut producer = queue.producer(config);

    for i in 0..100 {
        let (_, accepted) = producer.publish(event(i)).await;
        assert!(accepted);
    }

    // Consume and ack in batches of 10: exactly 10 callbacks of 10.
    for _ in 0..10 {
        let batch = queue.get(10).await.unwrap();
        assert_eq!(batch.count(), 10);
        batch.done();

        let count = timeout(Duration::from_secs(2), acks.recv())
            .await
            .expect("ack callback timed out")
            .unwrap();
        assert_eq!(count, 10);
    }

    // No extra callbacks.
    assert!(acks.try_recv().is_err());
}

#[tokio::test]
async fn test_out_of_order_done_still_acks_in_order() {
    let queue = MemoryQueue::new(settings(32)).unwrap();
    let (config, mut acks) = ack_config();
    let mut producer = queue.producer(config);

    for i in 0..8 {
        producer.publish(event(i)).await;
    }

    let first = queue.get(4).await.unwrap();
    let second = queue.get(4).await.unwrap();

    // Completing the later batch first must not ack anything yet.
    second.done();
    sleep(Duration::from_millis(50)).await;
    assert!(acks.try_recv().is_err());

    // Completing the earlier batch releases both ranges in one advance.
    first.done();
    let count = timeout(Duration::from_secs(2), acks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count, 8);
}

#[tokio::test]
async fn test_duplicate_done_is_noop() {
    let queue = MemoryQueue::new(settings(16)).unwrap();
    let (config, mut acks) = ack_config();
    let mut producer = queue.producer(config);

    for i in 0..4 {
        producer.publish(event(i)).await;
    }

    let batch = queue.get(4).await.unwrap();
    batch.done();
    batch.done();

    let count = timeout(Duration::from_secs(2), acks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count, 4);

    sleep(Duration::from_millis(50)).await;
    assert!(acks.try_recv().is_err());
}

#[tokio::test]
async fn test_try_publish_full_queue_fails_fast() {
    let queue = MemoryQueue::new(settings(2)).unwrap();
    let mut producer = queue.producer(ProducerConfig::default());

    assert!(producer.publish(event(0)).await.1);
    assert!(producer.publish(event(1)).await.1);

    let started = Instant::now();
    let (id, accepted) = producer.try_publish(event(2)).await;
    assert_eq!(id.0, 0);
    assert!(!accepted);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_publish_blocks_until_space_frees() {
    let queue = Arc::new(MemoryQueue::new(settings(2)).unwrap());
    let mut producer = queue.producer(ProducerConfig::default());

    producer.publish(event(0)).await;
    producer.publish(event(1)).await;

    let blocked = tokio::spawn(async move {
        let result = producer.publish(event(2)).await;
        (producer, result)
    });

    sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    let batch = queue.get(2).await.unwrap();
    batch.done();

    let (_, (id, accepted)) = timeout(Duration::from_secs(2), blocked)
        .await
        .unwrap()
        .unwrap();
    assert!(accepted);
    assert_eq!(id.0, 2);
}

#[tokio::test]
async fn test_flush_timeout_returns_short_batch() {
    let queue = MemoryQueue::new(MemorySettings {
        events: 64,
        max_get_request: 1024,
        flush_timeout: Duration::from_millis(100),
    })
    .unwrap();
    let mut producer = queue.producer(ProducerConfig::default());

    for i in 0..3 {
        producer.publish(event(i)).await;
    }

    let started = Instant::now();
    let batch = queue.get(1000).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(batch.count(), 3);
    assert!(elapsed >= Duration::from_millis(90), "returned too early: {elapsed:?}");
    batch.done();
}

#[tokio::test]
async fn test_flush_fills_batch_before_timeout() {
    let queue = MemoryQueue::new(MemorySettings {
        events: 64,
        max_get_request: 1024,
        flush_timeout: Duration::from_secs(5),
    })
    .unwrap();
    let mut producer = queue.producer(ProducerConfig::default());
    producer.publish(event(0)).await;

    let queue = Arc::new(queue);
    let getter = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.get(3).await })
    };

    sleep(Duration::from_millis(20)).await;
    producer.publish(event(1)).await;
    producer.publish(event(2)).await;

    // The request fills to its target well before the 5s flush timer.
    let batch = timeout(Duration::from_secs(1), getter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(batch.count(), 3);
    batch.done();
}

#[tokio::test]
async fn test_get_zero_returns_empty_batch() {
    let queue = MemoryQueue::new(settings(8)).unwrap();

    let started = Instant::now();
    let batch = queue.get(0).await.unwrap();
    assert_eq!(batch.count(), 0);
    assert!(started.elapsed() < Duration::from_millis(50));
    batch.done();
}

#[tokio::test]
async fn test_close_unblocks_blocked_producer() {
    let queue = Arc::new(MemoryQueue::new(settings(2)).unwrap());
    let mut producer = queue.producer(ProducerConfig::default());

    producer.publish(event(0)).await;
    producer.publish(event(1)).await;

    let blocked_push = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move {
            let mut p = queue.producer(ProducerConfig::default());
            p.publish(event(2)).await
        }
    });

    sleep(Duration::from_millis(50)).await;
    assert!(!blocked_push.is_finished());
    queue.close();

    let (id, accepted) = timeout(Duration::from_secs(2), blocked_push)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((id.0, accepted), (0, false));

    timeout(Duration::from_secs(2), queue.done())
        .await
        .expect("queue shutdown did not complete");

    let (_, accepted) = queue.producer(ProducerConfig::default()).publish(event(9)).await;
    assert!(!accepted);
}

#[tokio::test]
async fn test_close_unblocks_waiting_consumer() {
    let queue = Arc::new(MemoryQueue::new(settings(4)).unwrap());

    let waiting_get = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move { queue.get(5).await.map(|batch| batch.count()) }
    });

    sleep(Duration::from_millis(50)).await;
    assert!(!waiting_get.is_finished());
    queue.close();

    let result = timeout(Duration::from_secs(2), waiting_get)
        .await
        .expect("get did not unblock on close")
        .unwrap();
    assert!(matches!(result, Err(QueueError::Closed)));

    timeout(Duration::from_secs(2), queue.done())
        .await
        .expect("queue shutdown did not complete");
}

#[tokio::test]
async fn test_close_waits_for_inflight_batch() {
    let queue = Arc::new(MemoryQueue::new(settings(8)).unwrap());
    let (config, mut acks) = ack_config();
    let mut producer = queue.producer(config);

    for i in 0..4 {
        producer.publish(event(i)).await;
    }
    let batch = queue.get(4).await.unwrap();

    queue.close();
    assert!(timeout(Duration::from_millis(100), queue.done()).await.is_err());

    batch.done();
    timeout(Duration::from_secs(2), queue.done())
        .await
        .expect("shutdown should finish once the batch is acked");

    // The in-flight batch still acked through close.
    let count = acks.recv().await.unwrap();
    assert_eq!(count, 4);
}

#[tokio::test]
async fn test_close_accounts_for_every_pending_event() {
    let observer = Arc::new(CountingObserver::new());
    let queue =
        MemoryQueue::with_observer(settings(16), Arc::clone(&observer) as _).unwrap();
    let mut producer = queue.producer(ProducerConfig::default());

    for i in 0..10 {
        producer.publish(event(i)).await;
    }

    // Deliver 4, leave 6 unconsumed, then close.
    let batch = queue.get(4).await.unwrap();
    queue.close();
    batch.done();
    queue.done().await;

    let snapshot = observer.snapshot();
    assert_eq!(snapshot.added_events, 10);
    assert_eq!(snapshot.acked_events + snapshot.dropped_events, 10);
    assert_eq!(snapshot.acked_events, 4);
    assert_eq!(snapshot.dropped_events, 6);
}

#[tokio::test]
async fn test_producer_close_unblocks_publish() {
    let queue = Arc::new(MemoryQueue::new(settings(1)).unwrap());
    let mut producer = queue.producer(ProducerConfig::default());
    producer.publish(event(0)).await;

    let cancel = producer.cancel_handle();
    let blocked = tokio::spawn(async move { producer.publish(event(1)).await });

    sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());
    cancel.cancel();

    let (id, accepted) = timeout(Duration::from_secs(2), blocked)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((id.0, accepted), (0, false));

    // The queue itself is unaffected.
    let batch = queue.get(1).await.unwrap();
    assert_eq!(batch.count(), 1);
    batch.done();
}

#[tokio::test]
async fn test_interleaved_producers_ack_independently() {
    let queue = MemoryQueue::new(settings(32)).unwrap();
    let (config_a, mut acks_a) = ack_config();
    let (config_b, mut acks_b) = ack_config();
    let mut a = queue.producer(config_a);
    let mut b = queue.producer(config_b);

    for i in 0..3 {
        a.publish(event(i)).await;
        b.publish(event(100 + i)).await;
    }

    let batch = queue.get(6).await.unwrap();
    assert_eq!(batch.count(), 6);
    batch.done();

    let from_a = timeout(Duration::from_secs(2), acks_a.recv())
        .await
        .unwrap()
        .unwrap();
    let from_b = timeout(Duration::from_secs(2), acks_b.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from_a, 3);
    assert_eq!(from_b, 3);
}

#[tokio::test]
async fn test_producer_side_encoder_stores_bytes() {
    use crate::{CborEncoder, EntryDecoder};

    let queue = MemoryQueue::new(settings(8)).unwrap();
    let mut producer = queue.producer(ProducerConfig {
        encoder: Some(Arc::new(CborEncoder)),
        ..ProducerConfig::default()
    });

    let mut event = Event::new();
    event.fields_mut().put("message", json!("early encoding"));
    let (_, accepted) = producer.publish(Entry::Event(event.clone())).await;
    assert!(accepted);

    // The queue holds bytes, not the structured event.
    let batch = queue.get(1).await.unwrap();
    let stored = batch.entry(0).unwrap();
    let bytes = stored.as_bytes().expect("entry should be pre-encoded");
    let decoded = CborEncoder.decode(bytes).unwrap();
    assert_eq!(decoded.fields(), event.fields());
    batch.done();
}

#[tokio::test]
async fn test_closed_queue_error_from_get() {
    let queue = MemoryQueue::new(settings(4)).unwrap();
    queue.close();
    queue.done().await;

    match queue.get(1).await {
        Err(QueueError::Closed) => {}
        other => panic!("expected Closed, got {:?}", other.map(|b| b.count())),
    }
}
