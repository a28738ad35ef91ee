//! Reader loop - streams frames off disk and decodes them
//!
//! One read request covers one region of one segment; decoded frames
//! flow into a bounded channel consumed by `get()`. Any corruption
//! (checksum mismatch, torn frame, undecodable payload) terminates the
//! request early: the frames read so far are delivered, the response
//! marks the segment truncated at the failure point, and consumption
//! continues with the next segment.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::encoder::EntryDecoder;
use crate::entry::Entry;

use super::frames::{frame_size, read_frame, FrameRead};
use super::internal::{DecodedFrame, FrameMeta, ReadRequest, ReadResponse};
use super::segments::{SegmentHeader, SEGMENT_HEADER_SIZE};

pub(super) struct ReaderLoop {
    req_rx: mpsc::Receiver<ReadRequest>,
    resp_tx: mpsc::Sender<ReadResponse>,
    frame_tx: mpsc::Sender<DecodedFrame>,
    close_rx: watch::Receiver<bool>,
    decoder: Arc<dyn EntryDecoder>,
}

impl ReaderLoop {
    pub fn new(
        req_rx: mpsc::Receiver<ReadRequest>,
        resp_tx: mpsc::Sender<ReadResponse>,
        frame_tx: mpsc::Sender<DecodedFrame>,
        close_rx: watch::Receiver<bool>,
        decoder: Arc<dyn EntryDecoder>,
    ) -> Self {
        Self {
            req_rx,
            resp_tx,
            frame_tx,
            close_rx,
            decoder,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("disk queue reader loop starting");

        while let Some(req) = self.req_rx.recv().await {
            let resp = self.process(req).await;
            // Capacity-1 response channel; the core always drains it
            // before issuing another request, even while closing.
            if self.resp_tx.send(resp).await.is_err() {
                break;
            }
        }

        tracing::debug!("disk queue reader loop stopped");
    }

    async fn process(&mut self, req: ReadRequest) -> ReadResponse {
        let mut offset = req.start_offset;
        let mut frames_read = 0u64;

        let mut reader = match self.open_at(&req, &mut offset) {
            Ok(reader) => reader,
            Err(corrupt_at) => {
                return ReadResponse {
                    segment: req.segment,
                    frames_read: 0,
                    end_offset: corrupt_at,
                    corrupt: true,
                }
            }
        };

        while offset < req.end_offset {
            let payload = match read_frame(&mut reader) {
                Ok(FrameRead::Frame(payload)) => payload,
                Ok(FrameRead::Eof) | Ok(FrameRead::Corrupt) => {
                    // Torn tail or checksum mismatch: stop here, the
                    // core truncates the segment at this offset.
                    return ReadResponse {
                        segment: req.segment,
                        frames_read,
                        end_offset: offset,
                        corrupt: true,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        segment = req.segment,
                        offset,
                        error = %e,
                        "segment read failed"
                    );
                    return ReadResponse {
                        segment: req.segment,
                        frames_read,
                        end_offset: offset,
                        corrupt: true,
                    };
                }
            };

            let size = frame_size(payload.len());
            let entry = match self.decoder.decode(&payload) {
                Ok(event) => Entry::Event(event),
                Err(e) => {
                    // The checksum passed but the payload is garbage;
                    // treat it like any other corruption.
                    tracing::warn!(
                        segment = req.segment,
                        offset,
                        error = %e,
                        "stored frame failed to decode"
                    );
                    return ReadResponse {
                        segment: req.segment,
                        frames_read,
                        end_offset: offset,
                        corrupt: true,
                    };
                }
            };

            offset += size;
            let frame = DecodedFrame {
                meta: FrameMeta {
                    frame_id: req.next_frame_id + frames_read,
                    segment: req.segment,
                    seg_frame_index: req.start_frame_index + frames_read,
                    end_offset: offset,
                    size_on_disk: size,
                },
                entry,
            };

            tokio::select! {
                sent = self.frame_tx.send(frame) => {
                    if sent.is_err() {
                        // Consumers are gone; report progress up to the
                        // previous frame so nothing is recorded as read
                        // that was never delivered.
                        return ReadResponse {
                            segment: req.segment,
                            frames_read,
                            end_offset: offset - size,
                            corrupt: false,
                        };
                    }
                }
                _ = self.close_rx.wait_for(|closed| *closed) => {
                    return ReadResponse {
                        segment: req.segment,
                        frames_read,
                        end_offset: offset - size,
                        corrupt: false,
                    };
                }
            }
            frames_read += 1;
        }

        ReadResponse {
            segment: req.segment,
            frames_read,
            end_offset: offset,
            corrupt: false,
        }
    }

    /// Open the segment file positioned at the request's start offset,
    /// validating the header when starting from the top
    fn open_at(&self, req: &ReadRequest, offset: &mut u64) -> Result<BufReader<File>, u64> {
        let file = match File::open(&req.path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(segment = req.segment, error = %e, "cannot open segment");
                return Err(*offset);
            }
        };
        let mut reader = BufReader::with_capacity(32 * 1024, file);

        if req.start_offset < SEGMENT_HEADER_SIZE {
            match SegmentHeader::read_from(&mut reader) {
                Ok(_) => *offset = SEGMENT_HEADER_SIZE,
                Err(e) => {
                    tracing::warn!(segment = req.segment, error = %e, "bad segment header");
                    return Err(0);
                }
            }
        } else if let Err(e) = reader.seek(SeekFrom::Start(req.start_offset)) {
            tracing::warn!(segment = req.segment, error = %e, "cannot seek in segment");
            return Err(*offset);
        }

        Ok(reader)
    }
}
