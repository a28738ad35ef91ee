//! Message types between producers, the core loop, and the helper loops

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::entry::{Entry, EntryId};

use super::segments::SegmentId;

pub(super) use crate::ack::ProducerAck;

/// Producer → core: append one encoded event
pub(super) struct ProducerWriteRequest {
    pub bytes: Bytes,

    /// ACK bookkeeping; the callback fires when the frame is persisted
    pub producer: Option<ProducerAck>,

    /// Whether the core may park this request until space frees up
    pub can_block: bool,

    /// Assigned entry id, or `None` when the entry was refused
    pub resp: oneshot::Sender<Option<EntryId>>,
}

/// A frame accepted by the core, waiting for the writer loop
pub(super) struct PendingFrame {
    pub segment: SegmentId,
    pub bytes: Bytes,
    pub producer: Option<ProducerAck>,
}

/// Core → writer: a run of frames, possibly spanning segments
pub(super) struct WriteRequest {
    pub frames: Vec<WriteFrame>,
}

pub(super) struct WriteFrame {
    pub segment: SegmentId,
    pub bytes: Bytes,
}

/// Writer → core: confirmed bytes per segment for one request
pub(super) struct WriteResponse {
    pub segments: Vec<SegmentWrite>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SegmentWrite {
    pub segment: SegmentId,
    /// Bytes appended during this request, header included
    pub bytes_written: u64,
    pub frames_written: u64,
}

/// Core → reader: stream frames from one region of one segment
pub(super) struct ReadRequest {
    pub segment: SegmentId,
    pub path: PathBuf,

    /// Byte offset to start at; zero reads and validates the header first
    pub start_offset: u64,

    /// Confirmed written size; the reader never reads past this
    pub end_offset: u64,

    /// Frame index within the segment at `start_offset`
    pub start_frame_index: u64,

    /// Run-global id of the first frame read
    pub next_frame_id: u64,
}

/// Reader → core: result of one read request
pub(super) struct ReadResponse {
    pub segment: SegmentId,
    pub frames_read: u64,

    /// Byte offset after the last good frame
    pub end_offset: u64,

    /// A checksum/decode failure or torn frame stopped the read; the
    /// segment is truncated at `end_offset`
    pub corrupt: bool,
}

/// One decoded frame flowing from the reader to consumers
pub(super) struct DecodedFrame {
    pub meta: FrameMeta,
    pub entry: Entry,
}

/// Frame bookkeeping carried through batches back to the ACK tracker
#[derive(Debug, Clone, Copy)]
pub(super) struct FrameMeta {
    /// Run-global, monotonically increasing read id
    pub frame_id: u64,
    pub segment: SegmentId,
    /// Frame index within its segment
    pub seg_frame_index: u64,
    /// Byte offset after this frame in the segment file
    pub end_offset: u64,
    pub size_on_disk: u64,
}

/// Core → deleter: unlink one fully-acked segment file
pub(super) struct DeleteRequest {
    pub segment: SegmentId,
    pub path: PathBuf,
}

/// Deleter → core: the segment file is gone
pub(super) struct DeleteResponse {
    pub segment: SegmentId,
}
