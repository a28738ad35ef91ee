//! Disk queue producers
//!
//! Events are encoded on the producer side (frames store bytes), then
//! offered to the core loop. The ACK callback fires once the frame is
//! persisted, not when an output consumes it: "accepted downstream"
//! means "on disk" for this queue.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use crate::ack::{AckState, ProducerAck};
use crate::encoder::EntryEncoder;
use crate::entry::{Entry, EntryId};
use crate::observer::QueueObserver;
use crate::queue::{Producer, ProducerCancel};

use super::internal::ProducerWriteRequest;

pub(super) struct DiskProducer {
    request_tx: mpsc::Sender<ProducerWriteRequest>,
    closing_rx: watch::Receiver<bool>,
    cancel_rx: watch::Receiver<bool>,
    cancel: ProducerCancel,
    encoder: Arc<dyn EntryEncoder>,
    observer: Arc<dyn QueueObserver>,
    ack: Option<Arc<AckState>>,
    produced: u64,
}

impl DiskProducer {
    pub fn new(
        request_tx: mpsc::Sender<ProducerWriteRequest>,
        closing_rx: watch::Receiver<bool>,
        encoder: Arc<dyn EntryEncoder>,
        observer: Arc<dyn QueueObserver>,
        ack: Option<Arc<AckState>>,
    ) -> Self {
        let (cancel, cancel_rx) = ProducerCancel::new();
        Self {
            request_tx,
            closing_rx,
            cancel_rx,
            cancel,
            encoder,
            observer,
            ack,
            produced: 0,
        }
    }

    fn is_open(&self) -> bool {
        !*self.cancel_rx.borrow() && !*self.closing_rx.borrow()
    }

    /// Serialize the entry; pre-encoded entries pass through untouched
    fn encode(&self, entry: Entry) -> Option<Bytes> {
        match entry {
            Entry::Bytes(bytes) => Some(bytes),
            Entry::Event(event) => match self.encoder.encode(&event) {
                Ok(bytes) => Some(bytes),
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
        bytes: Bytes,
        can_block: bool,
    ) -> (ProducerWriteRequest, oneshot::Receiver<Option<EntryId>>) {
        let (tx, rx) = oneshot::channel();
        let producer = self.ack.as_ref().map(|state| ProducerAck {
            state: Arc::clone(state),
            seq: self.produced + 1,
        });
        (
            ProducerWriteRequest {
                bytes,
                producer,
                can_block,
                resp: tx,
            },
            rx,
        )
    }

    async fn await_response(&mut self, rx: oneshot::Receiver<Option<EntryId>>) -> (EntryId, bool) {
        tokio::select! {
            resp = rx => match resp {
                Ok(Some(id)) => {
                    self.produced += 1;
                    (id, true)
                }
                _ => (EntryId(0), false),
            },
            _ = self.closing_rx.wait_for(|closed| *closed) => (EntryId(0), false),
            _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => (EntryId(0), false),
        }
    }
}

#[async_trait]
impl Producer for DiskProducer {
    async fn publish(&mut self, entry: Entry) -> (EntryId, bool) {
        if !self.is_open() {
            return (EntryId(0), false);
        }
        let Some(bytes) = self.encode(entry) else {
            return (EntryId(0), false);
        };
        let (req, rx) = self.make_request(bytes, true);

        tokio::select! {
            sent = self.request_tx.send(req) => {
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
        let Some(bytes) = self.encode(entry) else {
            return (EntryId(0), false);
        };
        let (req, rx) = self.make_request(bytes, false);

        if self.request_tx.try_send(req).is_err() {
            tracing::debug!("dropping event, disk queue input is saturated");
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
