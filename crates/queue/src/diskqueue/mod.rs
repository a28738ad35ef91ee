//! Disk queue - segmented append-only log with persistent read position
//!
//! # Architecture
//!
//! ```text
//!  [Producers] ──→ core loop ──→ writer loop ──→ <id>.seg files
//!                   │   ▲  │
//!                   │   │  └──→ deleter loop (fully-acked segments)
//!                   │   └────── batch.done() → position → state.dat
//!                   └──→ reader loop ──→ decoded frames ──→ get()
//! ```
//!
//! # Design
//!
//! - The core loop owns every structural decision; the writer, reader,
//!   and deleter loops execute one request at a time.
//! - Producers are acknowledged when their frames are persisted, so a
//!   crash never loses an acknowledged event.
//! - The consumer position `(segment, frame, byte)` is checkpointed to
//!   `state.dat` on every ACK advance; losing it replays unacknowledged
//!   events once, which at-least-once delivery permits.
//! - A corrupted frame truncates its segment at the last good frame,
//!   logs the incident, and consumption continues with the next segment.

mod backoff;
mod core_loop;
mod deleter_loop;
mod frames;
mod internal;
mod producer;
mod reader_loop;
mod segments;
mod settings;
mod state_file;
mod writer_loop;

pub use settings::DiskSettings;

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use crate::ack::AckState;
use crate::encoder::{CborEncoder, EntryEncoder};
use crate::entry::Entry;
use crate::error::{QueueError, Result};
use crate::observer::{NoopObserver, QueueObserver};
use crate::queue::{Batch, BufferConfig, Producer, ProducerConfig, Queue};

use self::core_loop::{CoreChannels, CoreLoop, InitialState};
use self::deleter_loop::DeleterLoop;
use self::internal::{DecodedFrame, FrameMeta, ProducerWriteRequest};
use self::producer::DiskProducer;
use self::reader_loop::ReaderLoop;
use self::segments::{scan_existing_segments, SegmentState};
use self::state_file::{position_from_path, QueuePosition, StateFile};
use self::writer_loop::WriterLoop;

/// Configuration name of the disk queue
pub const QUEUE_TYPE: &str = "disk";

/// Persistent on-disk event queue
pub struct DiskQueue {
    settings: DiskSettings,
    producer_tx: mpsc::Sender<ProducerWriteRequest>,
    frame_rx: Mutex<mpsc::Receiver<DecodedFrame>>,
    ack_tx: mpsc::UnboundedSender<Vec<FrameMeta>>,
    close_tx: watch::Sender<bool>,
    closing_rx: watch::Receiver<bool>,
    done_rx: watch::Receiver<bool>,
    next_batch_id: AtomicU64,
    encoder: Arc<dyn EntryEncoder>,
    observer: Arc<dyn QueueObserver>,
}

impl DiskQueue {
    /// Open (or create) a disk queue with a no-op observer
    pub fn new(settings: DiskSettings) -> Result<Self> {
        Self::with_observer(settings, Arc::new(NoopObserver))
    }

    /// Open (or create) a disk queue reporting to `observer`
    ///
    /// Fatal here: invalid settings, an unwritable directory, or a state
    /// file that cannot be opened for writing. Once the queue is running
    /// no disk error is fatal.
    pub fn with_observer(
        settings: DiskSettings,
        observer: Arc<dyn QueueObserver>,
    ) -> Result<Self> {
        let encoder: Arc<dyn EntryEncoder> = Arc::new(CborEncoder);
        let (state_file, initial) = recover(&settings, observer.as_ref())?;

        let (producer_tx, producer_rx) = mpsc::channel(64);
        let (writer_req_tx, writer_req_rx) = mpsc::channel(1);
        let (writer_resp_tx, writer_resp_rx) = mpsc::channel(1);
        let (reader_req_tx, reader_req_rx) = mpsc::channel(1);
        let (reader_resp_tx, reader_resp_rx) = mpsc::channel(1);
        let (deleter_req_tx, deleter_req_rx) = mpsc::unbounded_channel();
        let (deleter_resp_tx, deleter_resp_rx) = mpsc::channel(16);
        let (frame_tx, frame_rx) = mpsc::channel(settings.read_ahead);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let writer = WriterLoop::new(
            settings.clone(),
            encoder.encoding_id(),
            writer_req_rx,
            writer_resp_tx,
            close_rx.clone(),
        );
        let reader = ReaderLoop::new(
            reader_req_rx,
            reader_resp_tx,
            frame_tx,
            close_rx.clone(),
            Arc::new(CborEncoder),
        );
        let deleter = DeleterLoop::new(
            settings.clone(),
            deleter_req_rx,
            deleter_resp_tx,
            close_rx.clone(),
        );
        let core = CoreLoop::new(
            settings.clone(),
            Arc::clone(&observer),
            state_file,
            initial,
            CoreChannels {
                producer_rx,
                writer_req_tx,
                writer_resp_rx,
                reader_req_tx,
                reader_resp_rx,
                deleter_req_tx,
                deleter_resp_rx,
                ack_rx,
                close_rx: close_rx.clone(),
                done_tx,
            },
        );

        tokio::spawn(writer.run());
        tokio::spawn(reader.run());
        tokio::spawn(deleter.run());
        tokio::spawn(core.run());

        Ok(Self {
            settings,
            producer_tx,
            frame_rx: Mutex::new(frame_rx),
            ack_tx,
            close_tx,
            closing_rx: close_rx,
            done_rx,
            next_batch_id: AtomicU64::new(1),
            encoder,
            observer,
        })
    }
}

#[async_trait]
impl Queue for DiskQueue {
    fn queue_type(&self) -> &'static str {
        QUEUE_TYPE
    }

    fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            max_events: None,
            max_bytes: (self.settings.max_buffer_size > 0)
                .then_some(self.settings.max_buffer_size),
        }
    }

    fn producer(&self, config: ProducerConfig) -> Box<dyn Producer> {
        let ack = config.ack.map(|cb| Arc::new(AckState::new(cb)));
        Box::new(DiskProducer::new(
            self.producer_tx.clone(),
            self.closing_rx.clone(),
            Arc::clone(&self.encoder),
            Arc::clone(&self.observer),
            ack,
        ))
    }

    async fn get(&self, max_events: usize) -> Result<Box<dyn Batch>> {
        if max_events == 0 {
            return Ok(Box::new(DiskBatch::empty()));
        }

        let mut frame_rx = self.frame_rx.lock().await;
        let first = frame_rx.recv().await.ok_or(QueueError::Closed)?;

        let mut entries = Vec::with_capacity(max_events.min(64));
        let mut metas = Vec::with_capacity(max_events.min(64));
        entries.push(first.entry);
        metas.push(first.meta);
        while entries.len() < max_events {
            match frame_rx.try_recv() {
                Ok(frame) => {
                    entries.push(frame.entry);
                    metas.push(frame.meta);
                }
                Err(_) => break,
            }
        }
        drop(frame_rx);

        Ok(Box::new(DiskBatch {
            id: self.next_batch_id.fetch_add(1, Ordering::Relaxed),
            entries,
            metas,
            ack_tx: Some(self.ack_tx.clone()),
            done_sent: AtomicBool::new(false),
        }))
    }

    fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    async fn done(&self) {
        let mut rx = self.done_rx.clone();
        let _ = rx.wait_for(|finished| *finished).await;
    }
}

/// Batch handed out by the disk queue
struct DiskBatch {
    id: u64,
    entries: Vec<Entry>,
    metas: Vec<FrameMeta>,
    ack_tx: Option<mpsc::UnboundedSender<Vec<FrameMeta>>>,
    done_sent: AtomicBool,
}

impl DiskBatch {
    fn empty() -> Self {
        Self {
            id: 0,
            entries: Vec::new(),
            metas: Vec::new(),
            ack_tx: None,
            done_sent: AtomicBool::new(false),
        }
    }
}

impl Batch for DiskBatch {
    fn id(&self) -> u64 {
        self.id
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, i: usize) -> Option<&Entry> {
        self.entries.get(i)
    }

    fn take_entries(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.entries)
    }

    fn done(&self) {
        if self.done_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ack_tx) = &self.ack_tx {
            // The core may already be gone during shutdown.
            let _ = ack_tx.send(self.metas.clone());
        }
    }
}

/// Rebuild queue state from the directory contents
///
/// Indexes the surviving segments, loads and normalizes the persisted
/// position, and decides which segments are stale. Errors here are the
/// only fatal disk errors in the queue's lifetime.
fn recover(
    settings: &DiskSettings,
    observer: &dyn QueueObserver,
) -> Result<(StateFile, InitialState)> {
    settings.validate()?;
    fs::create_dir_all(settings.directory())?;

    let mut state_loaded = true;
    let mut position = match position_from_path(&settings.state_file_path()) {
        Ok(position) => position,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            state_loaded = false;
            QueuePosition::default()
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "could not load the persisted queue position, falling back to the oldest segment"
            );
            state_loaded = false;
            QueuePosition::default()
        }
    };
    if position.frame_index == 0 && position.byte_index != 0 {
        // State written before the frame index existed: restart the
        // segment from the top. Events read but unacknowledged under the
        // old state replay once.
        tracing::warn!(
            segment = position.segment_id,
            byte_index = position.byte_index,
            "state file has no frame index; rereading the segment from the start"
        );
        position.byte_index = 0;
    }

    // Failing to open the state file for writing signals a permission
    // problem that would also break segment creation, so it is fatal now
    // rather than a degradation later.
    let state_file = StateFile::open(&settings.state_file_path())?;

    let scanned = scan_existing_segments(settings.directory())?;
    let mut next_segment_id = scanned.last().map(|(id, _)| id + 1).unwrap_or(0);

    let mut stale_segments = Vec::new();
    let mut segments = VecDeque::new();
    let mut buffered_bytes = 0u64;
    let mut restored_bytes = 0u64;
    for (id, len) in scanned {
        buffered_bytes += len;
        if id < position.segment_id {
            stale_segments.push((id, len));
        } else {
            restored_bytes += len;
            segments.push_back(SegmentState::restored(id, len));
        }
    }

    // Normalize the position against what actually survived on disk.
    if let Some(seg) = segments.iter_mut().find(|s| s.id == position.segment_id) {
        // Frames before the position were acknowledged in a previous run.
        seg.acked_frames = position.frame_index;
    } else if let Some(next_live) = segments.iter().find(|s| s.id > position.segment_id) {
        // The position's segment was fully acked and deleted; resume at
        // the start of the oldest surviving one.
        tracing::debug!(
            segment = position.segment_id,
            resumed_at = next_live.id,
            "advancing position to the oldest surviving segment"
        );
        position = QueuePosition {
            segment_id: next_live.id,
            frame_index: 0,
            byte_index: 0,
        };
    } else if state_loaded {
        // Everything up to and including the position's segment is gone;
        // resume cleanly at the next id ever to be created.
        next_segment_id = next_segment_id.max(position.segment_id + 1);
        position = QueuePosition {
            segment_id: next_segment_id,
            frame_index: 0,
            byte_index: 0,
        };
    }

    observer.max_bytes(settings.max_buffer_size);
    observer.restored(0, restored_bytes);
    tracing::info!(
        path = %settings.directory().display(),
        segments = segments.len(),
        bytes = restored_bytes,
        segment = position.segment_id,
        frame = position.frame_index,
        "disk queue opened"
    );

    Ok((
        state_file,
        InitialState {
            position,
            segments,
            stale_segments,
            next_segment_id,
            buffered_bytes,
        },
    ))
}

#[cfg(test)]
#[path = "diskqueue_test.rs"]
mod diskqueue_test;
