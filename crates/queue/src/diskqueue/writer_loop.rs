//! Writer loop - appends frames to segment files
//!
//! Consumes one write request at a time. Frames arrive pre-assigned to
//! segments in id order; the loop rolls to a new file whenever the
//! segment id changes, writing the fixed header first. Transient I/O
//! errors retry forever with exponential backoff; only queue close
//! interrupts the retries.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use tokio::sync::{mpsc, watch};

use super::backoff::Backoff;
use super::frames;
use super::internal::{SegmentWrite, WriteRequest, WriteResponse};
use super::segments::{SegmentHeader, SegmentId, SEGMENT_HEADER_SIZE};
use super::settings::DiskSettings;

struct OpenSegment {
    id: SegmentId,
    file: File,
    /// Bytes confirmed written; used to truncate away torn partial
    /// writes before a retry
    confirmed: u64,
}

pub(super) struct WriterLoop {
    settings: DiskSettings,
    encoding: u32,
    req_rx: mpsc::Receiver<WriteRequest>,
    resp_tx: mpsc::Sender<WriteResponse>,
    close_rx: watch::Receiver<bool>,
    current: Option<OpenSegment>,
}

impl WriterLoop {
    pub fn new(
        settings: DiskSettings,
        encoding: u32,
        req_rx: mpsc::Receiver<WriteRequest>,
        resp_tx: mpsc::Sender<WriteResponse>,
        close_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            settings,
            encoding,
            req_rx,
            resp_tx,
            close_rx,
            current: None,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("disk queue writer loop starting");

        while let Some(req) = self.req_rx.recv().await {
            let (writes, aborted) = self.process(req).await;
            // Capacity-1 response channel; the core always drains it
            // before issuing another request.
            let _ = self.resp_tx.send(WriteResponse { segments: writes }).await;
            if aborted {
                break;
            }
        }

        self.finalize_current();
        tracing::debug!("disk queue writer loop stopped");
    }

    /// Write every frame of the request, grouping consecutive frames of
    /// the same segment into one buffer. Returns the per-segment byte
    /// counts and whether close aborted the request midway.
    async fn process(&mut self, req: WriteRequest) -> (Vec<SegmentWrite>, bool) {
        let mut writes: Vec<SegmentWrite> = Vec::new();
        let mut backoff = Backoff::new(
            self.settings.retry_interval,
            self.settings.max_retry_interval,
        );

        let mut buffer: Vec<u8> = Vec::new();
        let mut buffered_frames = 0u64;

        let mut frames = req.frames.into_iter().peekable();
        while let Some(frame) = frames.next() {
            let segment = frame.segment;
            frames::append_frame(&mut buffer, &frame.bytes);
            buffered_frames += 1;

            let same_segment_next = frames
                .peek()
                .is_some_and(|next| next.segment == segment);
            if same_segment_next {
                continue;
            }

            let flushed = self
                .flush_buffer(segment, &buffer, buffered_frames, &mut backoff)
                .await;
            match flushed {
                Some(write) => merge_write(&mut writes, write),
                None => return (writes, true),
            }
            buffer.clear();
            buffered_frames = 0;
        }

        if self.settings.sync_writes {
            if let Some(open) = &self.current {
                if let Err(e) = open.file.sync_all() {
                    tracing::warn!(
                        segment = open.id,
                        error = %e,
                        "fsync failed after write request"
                    );
                }
            }
        }

        (writes, false)
    }

    /// Append one segment's buffered frames, rolling files as needed.
    /// Returns `None` when close interrupted the retry loop.
    async fn flush_buffer(
        &mut self,
        segment: SegmentId,
        buffer: &[u8],
        frame_count: u64,
        backoff: &mut Backoff,
    ) -> Option<SegmentWrite> {
        let mut header_bytes = 0u64;

        loop {
            let result = (|| -> std::io::Result<()> {
                if self.current.as_ref().map(|c| c.id) != Some(segment) {
                    self.finalize_current();
                    let path = self.settings.segment_path(segment);
                    let mut file = File::create(&path)?;
                    SegmentHeader::new(self.encoding).write_to(&mut file)?;
                    self.current = Some(OpenSegment {
                        id: segment,
                        file,
                        confirmed: SEGMENT_HEADER_SIZE,
                    });
                    header_bytes = SEGMENT_HEADER_SIZE;
                }

                let open = self.current.as_mut().expect("segment just ensured");
                open.file.write_all(buffer)?;
                open.confirmed += buffer.len() as u64;
                Ok(())
            })();

            match result {
                Ok(()) => {
                    backoff.reset();
                    return Some(SegmentWrite {
                        segment,
                        bytes_written: header_bytes + buffer.len() as u64,
                        frames_written: frame_count,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        segment,
                        error = %e,
                        "segment write failed, retrying"
                    );
                    // Truncate away whatever the failed write left behind
                    // and rewind the cursor to the last confirmed byte.
                    if let Some(open) = self.current.as_mut() {
                        let _ = open.file.set_len(open.confirmed);
                        let _ = open.file.seek(SeekFrom::Start(open.confirmed));
                    }
                    if header_bytes > 0 {
                        // Header write may itself have failed; start over.
                        self.current = None;
                        header_bytes = 0;
                    }
                    if !backoff.wait(&mut self.close_rx).await {
                        tracing::warn!(segment, "write abandoned, queue is closing");
                        return None;
                    }
                }
            }
        }
    }

    fn finalize_current(&mut self) {
        if let Some(open) = self.current.take() {
            if let Err(e) = open.file.sync_all() {
                tracing::warn!(segment = open.id, error = %e, "fsync on segment roll failed");
            }
        }
    }
}

fn merge_write(writes: &mut Vec<SegmentWrite>, write: SegmentWrite) {
    if let Some(last) = writes.last_mut() {
        if last.segment == write.segment {
            last.bytes_written += write.bytes_written;
            last.frames_written += write.frames_written;
            return;
        }
    }
    writes.push(write);
}
