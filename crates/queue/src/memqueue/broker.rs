//! Broker task - all memory queue state lives here
//!
//! The broker serializes every state mutation through one `select!` loop
//! reading the push, get, and ack channels. Producers and consumers never
//! touch the buffer directly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::observer::QueueObserver;

use super::buffer::RingBuffer;
use super::internal::{BatchPayload, GetRequest, PushRequest};
use super::MemorySettings;

/// An acknowledged or abandoned run of entry ids, keyed by its first id
struct DoneRange {
    count: usize,
    /// False for entries abandoned at close; their producers get no ACK
    delivered: bool,
}

pub(super) struct Broker {
    settings: MemorySettings,
    buffer: RingBuffer,
    observer: Arc<dyn QueueObserver>,

    /// Consumers waiting for a batch, FIFO
    pending_gets: VecDeque<GetRequest>,

    /// Producers parked until the buffer has space, FIFO
    blocked_pushes: VecDeque<PushRequest>,

    /// Handed-out batches: batch id → (first entry id, count)
    outstanding: HashMap<u64, (u64, usize)>,

    /// Completed ranges not yet passed by the ACK cursor
    done_ranges: HashMap<u64, DoneRange>,

    next_batch_id: u64,

    /// Armed while the head get request waits for a partial batch to fill
    flush_deadline: Option<Instant>,

    closing: bool,
}

impl Broker {
    pub fn new(settings: MemorySettings, observer: Arc<dyn QueueObserver>) -> Self {
        let capacity = settings.events;
        Self {
            settings,
            buffer: RingBuffer::new(capacity),
            observer,
            pending_gets: VecDeque::new(),
            blocked_pushes: VecDeque::new(),
            outstanding: HashMap::new(),
            done_ranges: HashMap::new(),
            next_batch_id: 1,
            flush_deadline: None,
            closing: false,
        }
    }

    pub async fn run(
        mut self,
        mut push_rx: mpsc::Receiver<PushRequest>,
        mut get_rx: mpsc::Receiver<GetRequest>,
        mut ack_rx: mpsc::UnboundedReceiver<u64>,
        mut close_rx: watch::Receiver<bool>,
        done_tx: watch::Sender<bool>,
    ) {
        tracing::debug!(
            events = self.settings.events,
            max_get_request = self.settings.max_get_request,
            flush_timeout_ms = self.settings.flush_timeout.as_millis() as u64,
            "memory queue broker starting"
        );

        loop {
            let flush = self.flush_deadline;
            tokio::select! {
                biased;

                _ = close_rx.wait_for(|closed| *closed), if !self.closing => {
                    self.begin_close();
                }
                Some(batch_id) = ack_rx.recv() => {
                    self.handle_ack(batch_id);
                }
                Some(req) = push_rx.recv() => {
                    self.handle_push(req);
                }
                Some(req) = get_rx.recv() => {
                    self.handle_get(req);
                }
                _ = tokio::time::sleep_until(flush.unwrap_or_else(Instant::now)),
                    if flush.is_some() =>
                {
                    self.flush_expired();
                }
                // Every channel is gone: nothing can reach the broker
                // anymore.
                else => break,
            }

            self.serve_blocked_pushes();
            self.serve_gets();

            if self.closing && self.buffer.acked == self.buffer.consumed {
                break;
            }
        }

        tracing::debug!(
            accepted = self.buffer.head,
            delivered = self.buffer.consumed,
            "memory queue broker stopped"
        );
        let _ = done_tx.send(true);
    }

    fn handle_push(&mut self, req: PushRequest) {
        if self.closing {
            let _ = req.resp.send(None);
            return;
        }
        if self.buffer.is_full() {
            if req.can_block {
                self.blocked_pushes.push_back(req);
            } else {
                self.observer.dropped(1);
                let _ = req.resp.send(None);
            }
            return;
        }
        self.accept_push(req);
    }

    fn accept_push(&mut self, req: PushRequest) {
        let bytes = req.entry.encoded_size() as u64;
        let id = self.buffer.insert(req.entry, req.producer);
        self.observer.added(1, bytes);
        if req.resp.send(Some(crate::EntryId(id))).is_err() {
            // Producer gave up while parked; the entry stays queued and
            // is delivered normally.
            tracing::trace!(entry = id, "producer left before push response");
        }
    }

    fn handle_get(&mut self, req: GetRequest) {
        if self.closing {
            // Dropping the response channel surfaces Closed to the consumer.
            return;
        }
        self.pending_gets.push_back(req);
    }

    /// Advance the ACK cursor past every completed range that now touches
    /// it, then notify producers once each
    fn handle_ack(&mut self, batch_id: u64) {
        let Some((start, count)) = self.outstanding.remove(&batch_id) else {
            // Unknown id: duplicate done() call. No-op.
            return;
        };
        self.done_ranges.insert(
            start,
            DoneRange {
                count,
                delivered: true,
            },
        );
        self.advance_acked();
    }

    fn advance_acked(&mut self) {
        let mut callbacks = crate::ack::AckBatch::new();
        let mut released = 0usize;
        let mut released_bytes = 0u64;

        while let Some(range) = self.done_ranges.remove(&self.buffer.acked) {
            let (producers, bytes) = self.buffer.release(range.count);
            if range.delivered {
                released += range.count;
                released_bytes += bytes;
                for producer in producers {
                    callbacks.add(producer);
                }
            }
        }

        if released > 0 {
            self.observer.acked(released, released_bytes);
        }
        callbacks.fire();
    }

    fn serve_blocked_pushes(&mut self) {
        while !self.buffer.is_full() {
            let Some(req) = self.blocked_pushes.pop_front() else {
                return;
            };
            self.accept_push(req);
        }
    }

    /// Serve pending get requests FIFO; arm the flush timer when the head
    /// request can only be filled partially
    fn serve_gets(&mut self) {
        loop {
            let Some(front) = self.pending_gets.front() else {
                self.flush_deadline = None;
                return;
            };
            let want = front.count.clamp(1, self.settings.max_get_request);
            let available = self.buffer.readable();

            if self.closing {
                // New gets are refused during close; anything still here
                // predates it and fails like the rest.
                self.pending_gets.pop_front();
                continue;
            }
            if available == 0 {
                self.flush_deadline = None;
                return;
            }
            if available >= want || self.settings.flush_timeout.is_zero() {
                self.respond_front(want.min(available));
                continue;
            }
            if self.flush_deadline.is_none() {
                self.flush_deadline = Some(Instant::now() + self.settings.flush_timeout);
            }
            return;
        }
    }

    fn flush_expired(&mut self) {
        self.flush_deadline = None;
        let Some(front) = self.pending_gets.front() else {
            return;
        };
        let want = front.count.clamp(1, self.settings.max_get_request);
        let available = self.buffer.readable();
        if available > 0 {
            self.respond_front(want.min(available));
        }
    }

    fn respond_front(&mut self, count: usize) {
        let req = self
            .pending_gets
            .pop_front()
            .expect("respond_front requires a pending get");
        self.flush_deadline = None;

        let start = self.buffer.consumed;
        let entries = self.buffer.consume(count);
        let count = entries.len();
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        self.outstanding.insert(id, (start, count));
        self.observer.consumed(count, 0);

        if req.resp.send(BatchPayload { id, entries }).is_err() {
            // Consumer vanished between get() and the response. The range
            // must not wedge the ACK cursor, but nothing was delivered, so
            // no producer callback fires.
            self.outstanding.remove(&id);
            self.done_ranges.insert(
                start,
                DoneRange {
                    count,
                    delivered: false,
                },
            );
            self.observer.dropped(count);
            self.advance_acked();
        }
    }

    fn begin_close(&mut self) {
        self.closing = true;
        self.flush_deadline = None;

        let parked = self.blocked_pushes.len();
        for req in self.blocked_pushes.drain(..) {
            let _ = req.resp.send(None);
        }

        // Entries nobody consumed are abandoned, with their count kept
        // honest in the observer totals. Their producers get no ACK.
        let remaining = self.buffer.readable();
        if remaining > 0 {
            let start = self.buffer.consumed;
            self.buffer.consume(remaining);
            self.done_ranges.insert(
                start,
                DoneRange {
                    count: remaining,
                    delivered: false,
                },
            );
            self.observer.dropped(remaining);
        }

        // Consumers waiting on a batch fail with Closed.
        self.pending_gets.clear();

        tracing::debug!(
            blocked_producers = parked,
            abandoned = remaining,
            in_flight = self.outstanding.len(),
            "memory queue closing"
        );

        self.advance_acked();
    }
}

/// Handle used by batches to report completion
#[derive(Clone)]
pub(super) struct AckSender {
    tx: mpsc::UnboundedSender<u64>,
}

impl AckSender {
    pub fn new(tx: mpsc::UnboundedSender<u64>) -> Self {
        Self { tx }
    }

    pub fn send(&self, batch_id: u64) {
        // The broker may already be gone during shutdown.
        let _ = self.tx.send(batch_id);
    }
}

/// Assemble the broker and its channels
pub(super) struct BrokerHandles {
    pub push_tx: mpsc::Sender<PushRequest>,
    pub get_tx: mpsc::Sender<GetRequest>,
    pub ack: AckSender,
    pub close_tx: watch::Sender<bool>,
    pub closing_rx: watch::Receiver<bool>,
    pub done_rx: watch::Receiver<bool>,
}

pub(super) fn spawn(settings: MemorySettings, observer: Arc<dyn QueueObserver>) -> BrokerHandles {
    let (push_tx, push_rx) = mpsc::channel(settings.input_channel_size());
    let (get_tx, get_rx) = mpsc::channel(8);
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);

    let broker = Broker::new(settings, observer);
    tokio::spawn(broker.run(push_rx, get_rx, ack_rx, close_rx.clone(), done_tx));

    BrokerHandles {
        push_tx,
        get_tx,
        ack: AckSender::new(ack_tx),
        close_tx,
        closing_rx: close_rx,
        done_rx,
    }
}

impl MemorySettings {
    /// Push channel size: a fraction of the buffer keeps `try_publish`
    /// honest about momentary overload without adding real latency
    pub(super) fn input_channel_size(&self) -> usize {
        (self.events / 2).clamp(1, 4096)
    }
}
