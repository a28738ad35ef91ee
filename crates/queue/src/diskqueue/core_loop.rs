//! Core loop - owns all disk queue structural state
//!
//! Segment metadata, pending frames, blocked producers, the read cursor,
//! and the persisted ACK position are all mutated here and nowhere else.
//! The writer, reader, and deleter loops are pure executors: the core
//! hands them one request at a time and ingests their responses.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::ack::AckBatch;
use crate::entry::EntryId;
use crate::observer::QueueObserver;

use super::frames::frame_size;
use super::internal::{
    DeleteRequest, DeleteResponse, FrameMeta, PendingFrame, ProducerAck, ProducerWriteRequest,
    ReadRequest, ReadResponse, WriteFrame, WriteRequest, WriteResponse,
};
use super::segments::{SegmentId, SegmentState, SEGMENT_HEADER_SIZE};
use super::settings::DiskSettings;
use super::state_file::{QueuePosition, StateFile};

/// Read cursor: the next frame to hand to the reader loop
struct ReadPos {
    segment: SegmentId,
    /// Byte offset within the segment file; zero means "validate the
    /// header first"
    offset: u64,
    /// Frame index within the segment
    frame_index: u64,
}

/// State assembled by startup recovery (see `mod.rs`)
pub(super) struct InitialState {
    pub position: QueuePosition,
    pub segments: VecDeque<SegmentState>,
    /// Segments older than the position, going straight to the deleter
    pub stale_segments: Vec<(SegmentId, u64)>,
    pub next_segment_id: SegmentId,
    pub buffered_bytes: u64,
}

pub(super) struct CoreChannels {
    pub producer_rx: mpsc::Receiver<ProducerWriteRequest>,
    pub writer_req_tx: mpsc::Sender<WriteRequest>,
    pub writer_resp_rx: mpsc::Receiver<WriteResponse>,
    pub reader_req_tx: mpsc::Sender<ReadRequest>,
    pub reader_resp_rx: mpsc::Receiver<ReadResponse>,
    pub deleter_req_tx: mpsc::UnboundedSender<DeleteRequest>,
    pub deleter_resp_rx: mpsc::Receiver<DeleteResponse>,
    pub ack_rx: mpsc::UnboundedReceiver<Vec<FrameMeta>>,
    pub close_rx: watch::Receiver<bool>,
    pub done_tx: watch::Sender<bool>,
}

pub(super) struct CoreLoop {
    settings: DiskSettings,
    observer: Arc<dyn QueueObserver>,
    state_file: StateFile,

    /// ACK cursor, persisted to `state.dat` on every advance
    position: QueuePosition,

    /// Live segments in id order: being written, read, or acked
    segments: VecDeque<SegmentState>,

    /// Segments handed to the deleter: id → bytes still accounted
    deleting: HashMap<SegmentId, u64>,

    /// Bytes held: scheduled bytes of live segments plus not-yet-deleted
    /// files; the capacity policy checks against this
    buffered_bytes: u64,

    /// Frames accepted but not yet dispatched to the writer
    pending_frames: Vec<PendingFrame>,

    /// ACK slots of the write request in flight, one per frame in
    /// dispatch order, so a partially-flushed request at shutdown only
    /// acknowledges what actually reached disk
    inflight_acks: Vec<Option<ProducerAck>>,

    /// Producers parked until deletion frees space, FIFO
    blocked_producers: VecDeque<ProducerWriteRequest>,

    writing: bool,
    reading: bool,

    read_pos: ReadPos,
    /// Run-global id assigned to the next frame read
    next_frame_id: u64,
    /// Run-global id of the next frame to acknowledge
    next_ack_frame_id: u64,
    /// Out-of-order batch completions waiting for the ACK cursor
    pending_acks: BTreeMap<u64, FrameMeta>,

    next_segment_id: SegmentId,
    /// Accepted-entry counter backing the ids handed to producers
    next_entry_id: u64,

    closing: bool,

    channels: CoreChannels,
}

impl CoreLoop {
    pub fn new(
        settings: DiskSettings,
        observer: Arc<dyn QueueObserver>,
        state_file: StateFile,
        initial: InitialState,
        channels: CoreChannels,
    ) -> Self {
        let read_pos = ReadPos {
            segment: initial.position.segment_id,
            offset: initial.position.byte_index,
            frame_index: initial.position.frame_index,
        };
        Self {
            settings,
            observer,
            state_file,
            position: initial.position,
            segments: initial.segments,
            deleting: HashMap::new(),
            buffered_bytes: initial.buffered_bytes,
            pending_frames: Vec::new(),
            inflight_acks: Vec::new(),
            blocked_producers: VecDeque::new(),
            writing: false,
            reading: false,
            read_pos,
            next_frame_id: 0,
            next_ack_frame_id: 0,
            pending_acks: BTreeMap::new(),
            next_segment_id: initial.next_segment_id,
            next_entry_id: 0,
            closing: false,
            channels,
        }
        .with_stale_segments(initial.stale_segments)
    }

    fn with_stale_segments(mut self, stale: Vec<(SegmentId, u64)>) -> Self {
        for (id, bytes) in stale {
            tracing::debug!(segment = id, "deleting segment behind the persisted position");
            self.deleting.insert(id, bytes);
            let _ = self.channels.deleter_req_tx.send(DeleteRequest {
                segment: id,
                path: self.settings.segment_path(id),
            });
        }
        self
    }

    pub async fn run(mut self) {
        tracing::debug!("disk queue core loop starting");
        self.maintain();

        loop {
            tokio::select! {
                biased;

                _ = async { let _ = self.channels.close_rx.wait_for(|closed| *closed).await; }, if !self.closing => {
                    self.begin_close();
                }
                Some(metas) = self.channels.ack_rx.recv() => {
                    self.handle_ack(metas);
                }
                Some(resp) = self.channels.writer_resp_rx.recv() => {
                    self.handle_write_response(resp);
                }
                Some(resp) = self.channels.reader_resp_rx.recv() => {
                    self.handle_read_response(resp);
                }
                Some(resp) = self.channels.deleter_resp_rx.recv() => {
                    self.handle_delete_response(resp);
                }
                Some(req) = self.channels.producer_rx.recv() => {
                    self.handle_producer_request(req);
                }
                // Every channel is gone: nothing can reach the core
                // anymore.
                else => break,
            }

            self.maintain();

            if self.closing && !self.writing && !self.reading && self.pending_frames.is_empty() {
                // Batch completions already sent must still advance the
                // persisted position, or they would replay next run.
                while let Ok(metas) = self.channels.ack_rx.try_recv() {
                    self.handle_ack(metas);
                }
                break;
            }
        }

        if let Err(e) = self.state_file.write_position(self.position) {
            tracing::warn!(error = %e, "could not persist final queue position");
        }
        tracing::info!(
            segment = self.position.segment_id,
            frame = self.position.frame_index,
            "disk queue core loop stopped"
        );
        let _ = self.channels.done_tx.send(true);
    }

    fn maintain(&mut self) {
        self.maybe_write();
        if !self.closing {
            self.maybe_read();
            self.serve_blocked_producers();
        }
    }

    // ---- producer side ----------------------------------------------------

    fn handle_producer_request(&mut self, req: ProducerWriteRequest) {
        if self.closing {
            let _ = req.resp.send(None);
            return;
        }

        let fsize = frame_size(req.bytes.len());
        let max = self.settings.max_buffer_size;
        if max > 0 && fsize + SEGMENT_HEADER_SIZE > max {
            tracing::warn!(
                frame_bytes = fsize,
                max_bytes = max,
                "event larger than the queue can ever hold, refusing"
            );
            self.observer.dropped(1);
            let _ = req.resp.send(None);
            return;
        }

        if self.can_accept(fsize) {
            let id = self.accept_frame(req.bytes, req.producer);
            let _ = req.resp.send(Some(id));
        } else if req.can_block {
            self.blocked_producers.push_back(req);
        } else {
            self.observer.dropped(1);
            let _ = req.resp.send(None);
        }
    }

    fn can_accept(&self, fsize: u64) -> bool {
        let max = self.settings.max_buffer_size;
        if max == 0 {
            return true;
        }
        let header = if self.would_create_segment(fsize) {
            SEGMENT_HEADER_SIZE
        } else {
            0
        };
        self.buffered_bytes + fsize + header <= max
    }

    fn would_create_segment(&self, fsize: u64) -> bool {
        match self.segments.back() {
            Some(seg) if !seg.sealed => {
                // The first frame of a segment is always admitted, even
                // oversized ones: they get a segment of their own.
                seg.scheduled_bytes != SEGMENT_HEADER_SIZE
                    && seg.scheduled_bytes + fsize > self.settings.max_segment_size
            }
            _ => true,
        }
    }

    fn accept_frame(&mut self, bytes: bytes::Bytes, producer: Option<ProducerAck>) -> EntryId {
        let fsize = frame_size(bytes.len());

        let segment = if self.would_create_segment(fsize) {
            if let Some(last) = self.segments.back_mut() {
                last.sealed = true;
            }
            let id = self.next_segment_id;
            self.next_segment_id += 1;
            self.segments.push_back(SegmentState::fresh(id));
            self.buffered_bytes += SEGMENT_HEADER_SIZE;
            id
        } else {
            self.segments.back().expect("unsealed write segment").id
        };

        let seg = self.segments.back_mut().expect("segment just ensured");
        debug_assert_eq!(seg.id, segment);
        seg.scheduled_bytes += fsize;
        self.buffered_bytes += fsize;

        self.pending_frames.push(PendingFrame {
            segment,
            bytes,
            producer,
        });
        self.observer.added(1, fsize);

        let id = EntryId(self.next_entry_id);
        self.next_entry_id += 1;
        id
    }

    fn serve_blocked_producers(&mut self) {
        while let Some(front) = self.blocked_producers.front() {
            let fsize = frame_size(front.bytes.len());
            if !self.can_accept(fsize) {
                return;
            }
            let req = self.blocked_producers.pop_front().expect("front exists");
            let id = self.accept_frame(req.bytes, req.producer);
            let _ = req.resp.send(Some(id));
        }
    }

    // ---- writer side ------------------------------------------------------

    fn maybe_write(&mut self) {
        if self.writing || self.pending_frames.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending_frames);
        let mut frames = Vec::with_capacity(pending.len());
        for frame in pending {
            self.inflight_acks.push(frame.producer);
            frames.push(WriteFrame {
                segment: frame.segment,
                bytes: frame.bytes,
            });
        }

        self.writing = true;
        if self
            .channels
            .writer_req_tx
            .try_send(WriteRequest { frames })
            .is_err()
        {
            // Writer is gone; only happens on shutdown.
            self.writing = false;
            self.inflight_acks.clear();
        }
    }

    /// Producers are acknowledged here: their events are on disk
    fn handle_write_response(&mut self, resp: WriteResponse) {
        self.writing = false;

        let mut frames_flushed = 0u64;
        for write in resp.segments {
            frames_flushed += write.frames_written;
            if let Some(seg) = self.segment_mut(write.segment) {
                if !seg.truncated {
                    seg.written_bytes += write.bytes_written;
                }
            }
        }

        // Normally every frame flushed; a request aborted by close may
        // leave a suffix unwritten, and those producers get no ACK.
        let unwritten = self
            .inflight_acks
            .len()
            .saturating_sub(frames_flushed as usize);
        if unwritten > 0 {
            tracing::warn!(unwritten, "write request ended before flushing every frame");
        }
        let mut acks = AckBatch::new();
        for producer in self
            .inflight_acks
            .drain(..)
            .take(frames_flushed as usize)
            .flatten()
        {
            acks.add(producer);
        }
        acks.fire();
    }

    // ---- reader side ------------------------------------------------------

    fn maybe_read(&mut self) {
        if self.reading {
            return;
        }
        loop {
            let Some(seg) = self.segments.iter().find(|s| s.id == self.read_pos.segment)
            else {
                // The read cursor points at a segment that does not exist
                // yet; nothing to do until a producer creates it.
                return;
            };

            let data_start = self.read_pos.offset.max(SEGMENT_HEADER_SIZE);
            if seg.written_bytes > data_start {
                let req = ReadRequest {
                    segment: seg.id,
                    path: self.settings.segment_path(seg.id),
                    start_offset: self.read_pos.offset,
                    end_offset: seg.written_bytes,
                    start_frame_index: self.read_pos.frame_index,
                    next_frame_id: self.next_frame_id,
                };
                self.reading = true;
                if self.channels.reader_req_tx.try_send(req).is_err() {
                    self.reading = false;
                }
                return;
            }

            if seg.sealed && seg.written_bytes >= seg.scheduled_bytes {
                // Exhausted: the frame count is now final.
                let id = seg.id;
                let frames = self.read_pos.frame_index;
                if let Some(seg) = self.segment_mut(id) {
                    seg.frames_total = Some(frames);
                }
                let next = self.next_read_segment(id);
                self.read_pos = ReadPos {
                    segment: next,
                    offset: 0,
                    frame_index: 0,
                };
                self.maybe_complete_segments();
                continue;
            }

            // More frames are scheduled but not yet written.
            return;
        }
    }

    fn handle_read_response(&mut self, resp: ReadResponse) {
        self.reading = false;

        let start_offset = self.read_pos.offset;
        self.read_pos.offset = resp.end_offset;
        self.read_pos.frame_index += resp.frames_read;
        self.next_frame_id += resp.frames_read;

        if resp.frames_read > 0 {
            let bytes = resp.end_offset.saturating_sub(start_offset);
            self.observer.consumed(resp.frames_read as usize, bytes);
        }

        if resp.corrupt {
            tracing::warn!(
                segment = resp.segment,
                offset = resp.end_offset,
                "corrupted frame detected, truncating segment at last good frame"
            );
            if let Some(seg) = self.segment_mut(resp.segment) {
                let lost = seg.scheduled_bytes.saturating_sub(resp.end_offset);
                seg.scheduled_bytes = resp.end_offset;
                seg.written_bytes = resp.end_offset;
                seg.sealed = true;
                seg.truncated = true;
                self.buffered_bytes = self.buffered_bytes.saturating_sub(lost);
            }
        }
    }

    // ---- ACK side ---------------------------------------------------------

    fn handle_ack(&mut self, metas: Vec<FrameMeta>) {
        for meta in metas {
            if meta.frame_id >= self.next_ack_frame_id {
                self.pending_acks.insert(meta.frame_id, meta);
            }
        }

        let mut advanced = 0usize;
        let mut bytes = 0u64;
        let mut last: Option<FrameMeta> = None;
        while let Some(meta) = self.pending_acks.remove(&self.next_ack_frame_id) {
            self.next_ack_frame_id += 1;
            advanced += 1;
            bytes += meta.size_on_disk;
            if let Some(seg) = self.segment_mut(meta.segment) {
                seg.acked_frames += 1;
            }
            last = Some(meta);
        }

        let Some(last) = last else { return };
        self.position = QueuePosition {
            segment_id: last.segment,
            frame_index: last.seg_frame_index + 1,
            byte_index: last.end_offset,
        };
        // Best-effort: losing the state file means replay, not data loss.
        if let Err(e) = self.state_file.write_position(self.position) {
            tracing::warn!(error = %e, "could not persist queue position");
        }
        self.observer.acked(advanced, bytes);
        self.maybe_complete_segments();
    }

    fn maybe_complete_segments(&mut self) {
        while let Some(front) = self.segments.front() {
            if !front.is_complete() {
                return;
            }
            let seg = self.segments.pop_front().expect("front exists");
            tracing::debug!(
                segment = seg.id,
                frames = seg.acked_frames,
                "segment fully acked, scheduling deletion"
            );
            self.deleting.insert(seg.id, seg.scheduled_bytes);
            let _ = self.channels.deleter_req_tx.send(DeleteRequest {
                segment: seg.id,
                path: self.settings.segment_path(seg.id),
            });
        }
    }

    fn handle_delete_response(&mut self, resp: DeleteResponse) {
        if let Some(bytes) = self.deleting.remove(&resp.segment) {
            self.buffered_bytes = self.buffered_bytes.saturating_sub(bytes);
        }
    }

    // ---- shutdown ---------------------------------------------------------

    fn begin_close(&mut self) {
        self.closing = true;

        let parked = self.blocked_producers.len();
        for req in self.blocked_producers.drain(..) {
            let _ = req.resp.send(None);
        }
        if let Some(last) = self.segments.back_mut() {
            last.sealed = true;
        }

        tracing::debug!(
            blocked_producers = parked,
            pending_frames = self.pending_frames.len(),
            "disk queue closing"
        );
    }

    // ---- helpers ----------------------------------------------------------

    fn segment_mut(&mut self, id: SegmentId) -> Option<&mut SegmentState> {
        self.segments.iter_mut().find(|s| s.id == id)
    }

    fn next_read_segment(&self, after: SegmentId) -> SegmentId {
        self.segments
            .iter()
            .map(|s| s.id)
            .filter(|id| *id > after)
            .min()
            .unwrap_or(self.next_segment_id.max(after + 1))
    }
}
