//! Memory queue producers
//!
//! A producer is a thin channel client: it builds a push request, sends
//! it to the broker, and waits for the assigned entry id. Tracked
//! producers additionally carry shared ACK state that the broker drives.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use crate::encoder::EntryEncoder;
use crate::entry::{Entry, EntryId};
use crate::observer::QueueObserver;
use crate::queue::{Producer, ProducerCancel};

use super::internal::{AckState, ProducerAck, PushRequest};

pub(super) struct MemoryProducer {
    push_tx: mpsc::Sender<PushRequest>,

    /// Queue-wide close signal
    closing_rx: watch::Receiver<bool>,

    /// Private cancellation signal; closing it unblocks `publish`
    cancel_rx: watch::Receiver<bool>,
    cancel: ProducerCancel,

    /// ACK state shared with the broker, absent for untracked producers
    ack: Option<Arc<AckState>>,

    /// Optional producer-side pre-serializer
    encoder: Option<Arc<dyn EntryEncoder>>,
    observer: Arc<dyn QueueObserver>,

    /// Count of accepted entries; seeds the per-entry sequence (1-based,
    /// so a fresh producer's "nothing acked yet" state is simply 0)
    produced: u64,
}

impl MemoryProducer {
    pub fn new(
        push_tx: mpsc::Sender<PushRequest>,
        closing_rx: watch::Receiver<bool>,
        ack: Option<Arc<AckState>>,
        encoder: Option<Arc<dyn EntryEncoder>>,
        observer: Arc<dyn QueueObserver>,
    ) -> Self {
        let (cancel, cancel_rx) = ProducerCancel::new();
        Self {
            push_tx,
            closing_rx,
            cancel_rx,
            cancel,
            ack,
            encoder,
            observer,
            produced: 0,
        }
    }

    /// Apply the configured encoder, dropping the event on failure
    fn encode(&self, entry: Entry) -> Option<Entry> {
        let Some(encoder) = &self.encoder else {
            return Some(entry);
        };
        match entry {
            Entry::Bytes(bytes) => Some(Entry::Bytes(bytes)),
            Entry::Event(event) => match encoder.encode(&event) {
                Ok(bytes) => Some(Entry::Bytes(bytes)),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping event that failed to encode");
                    self.observer.dropped(1);
                    None
                }
            },
        }
    }

    fn make_request(
        &self,
        entry: Entry,
        can_block: bool,
    ) -> (PushRequest, oneshot::Receiver<Option<EntryId>>) {
        let (tx, rx) = oneshot::channel();
        let producer = self.ack.as_ref().map(|state| ProducerAck {
            state: Arc::clone(state),
            seq: self.produced + 1,
        });
        (
            PushRequest {
                entry,
                producer,
                can_block,
                resp: tx,
            },
            rx,
        )
    }

    fn is_open(&self) -> bool {
        !*self.cancel_rx.borrow() && !*self.closing_rx.borrow()
    }

    /// Wait for the broker's response, bailing out on close
    async fn await_response(&mut self, rx: oneshot::Receiver<Option<EntryId>>) -> (EntryId, bool) {
        tokio::select! {
            resp = rx => match resp {
                Ok(Some(id)) => {
                    self.produced += 1;
                    (id, true)
                }
                // None: refused; Err: broker gone.
                _ => (EntryId(0), false),
            },
            _ = self.closing_rx.wait_for(|closed| *closed) => (EntryId(0), false),
            _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => (EntryId(0), false),
        }
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn publish(&mut self, entry: Entry) -> (EntryId, bool) {
        if !self.is_open() {
            return (EntryId(0), false);
        }
        let Some(entry) = self.encode(entry) else {
            return (EntryId(0), false);
        };
        let (req, rx) = self.make_request(entry, true);

        tokio::select! {
            sent = self.push_tx.send(req) => {
                if sent.is_err() {
                    return (EntryId(0), false);
                }
            }
            _ = self.closing_rx.wait_for(|closed| *closed) => return (EntryId(0), false),
            _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => return (EntryId(0), false),
        }
        self.await_response(rx).await
    }

    async fn try_publish(&mut self, entry: Entry) -> (EntryId, bool) {
        if !self.is_open() {
            return (EntryId(0), false);
        }
        let Some(entry) = self.encode(entry) else {
            return (EntryId(0), false);
        };
        let (req, rx) = self.make_request(entry, false);

        if self.push_tx.try_send(req).is_err() {
            tracing::debug!("dropping event, queue input is saturated");
            return (EntryId(0), false);
        }
        self.await_response(rx).await
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }

    fn cancel_handle(&self) -> ProducerCancel {
        self.cancel.clone()
    }
}
