//! Segment files and their lifecycle
//!
//! A segment is one append-only file named `<id>.seg`: a fixed header
//! followed by checksummed frames. Segments move through
//! `writing → sealed → reading → acked → deleted`, strictly in id order,
//! and ids are never reused.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Segment file magic
pub(super) const SEGMENT_MAGIC: u32 = 0xBEA7_D15C;

/// Current segment format version
pub(super) const SEGMENT_VERSION: u32 = 1;

/// Bytes of `magic | version | encoding` at the start of each segment
pub(super) const SEGMENT_HEADER_SIZE: u64 = 12;

pub(super) type SegmentId = u64;

/// Fixed header at the start of every segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SegmentHeader {
    pub version: u32,
    /// Payload codec id (see [`crate::encoder`])
    pub encoding: u32,
}

impl SegmentHeader {
    pub fn new(encoding: u32) -> Self {
        Self {
            version: SEGMENT_VERSION,
            encoding,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&SEGMENT_MAGIC.to_le_bytes())?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.encoding.to_le_bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE as usize];
        reader.read_exact(&mut buf)?;

        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != SEGMENT_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad segment magic {magic:#010x}"),
            ));
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version == 0 || version > SEGMENT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported segment version {version}"),
            ));
        }
        let encoding = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        Ok(Self { version, encoding })
    }
}

/// Core-loop bookkeeping for one live segment
#[derive(Debug)]
pub(super) struct SegmentState {
    pub id: SegmentId,

    /// Header plus every frame assigned to this segment, whether or not
    /// the writer has flushed it yet
    pub scheduled_bytes: u64,

    /// Bytes confirmed on disk; readers never read past this
    pub written_bytes: u64,

    /// No more frames will be assigned
    pub sealed: bool,

    /// Ignore late writer updates after a corruption truncation
    pub truncated: bool,

    /// Total frame count, known once the reader exhausts the segment
    pub frames_total: Option<u64>,

    /// Frames of this segment passed by the ACK cursor
    pub acked_frames: u64,
}

impl SegmentState {
    /// A brand-new segment the writer has not touched yet
    pub fn fresh(id: SegmentId) -> Self {
        Self {
            id,
            scheduled_bytes: SEGMENT_HEADER_SIZE,
            written_bytes: 0,
            sealed: false,
            truncated: false,
            frames_total: None,
            acked_frames: 0,
        }
    }

    /// A segment found on disk at startup; already sealed
    pub fn restored(id: SegmentId, byte_count: u64) -> Self {
        Self {
            id,
            scheduled_bytes: byte_count,
            written_bytes: byte_count,
            sealed: true,
            truncated: false,
            frames_total: None,
            acked_frames: 0,
        }
    }

    /// Whether every frame of the segment has been read and acknowledged
    pub fn is_complete(&self) -> bool {
        matches!(self.frames_total, Some(total) if self.acked_frames >= total)
    }
}

/// Index the `<id>.seg` files in a queue directory, ordered by id
///
/// Unparseable file names are ignored; a segment too short to hold a
/// header is indexed anyway and falls out as an empty, truncated segment
/// when read.
pub(super) fn scan_existing_segments(dir: &Path) -> io::Result<Vec<(SegmentId, u64)>> {
    let mut segments = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let name = dirent.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".seg")) else {
            continue;
        };
        let Ok(id) = stem.parse::<SegmentId>() else {
            tracing::warn!(file = ?name, "ignoring unparseable segment file name");
            continue;
        };
        let len = dirent.metadata()?.len();
        segments.push((id, len));
    }
    segments.sort_unstable_by_key(|(id, _)| *id);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_roundtrip() {
        let header = SegmentHeader::new(0);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, SEGMENT_HEADER_SIZE);

        let decoded = SegmentHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut buf = Vec::new();
        SegmentHeader::new(0).write_to(&mut buf).unwrap();
        buf[0] ^= 0xff;
        assert!(SegmentHeader::read_from(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_scan_orders_by_id() {
        let dir = tempfile::tempdir().unwrap();
        for id in [7u64, 3, 11] {
            fs::write(dir.path().join(format!("{id}.seg")), b"x").unwrap();
        }
        fs::write(dir.path().join("state.dat"), b"y").unwrap();
        fs::write(dir.path().join("not-a-number.seg"), b"z").unwrap();

        let segments = scan_existing_segments(dir.path()).unwrap();
        let ids: Vec<u64> = segments.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 7, 11]);
    }
}
