//! Read-position checkpoint (`state.dat`)
//!
//! Little-endian `u32 version | u64 segment_id | u64 frame_index |
//! u64 byte_index`, rewritten in place on every ACK advance. Loss of the
//! file causes replay, never data loss, so writes are best-effort after
//! startup.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Current state file version; version 0 files predate `frame_index`
pub(super) const STATE_VERSION: u32 = 1;

/// The next unread frame of the disk queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct QueuePosition {
    pub segment_id: u64,
    /// Index of the next unread frame within the segment
    pub frame_index: u64,
    /// Byte offset of the next unread frame within the segment file
    pub byte_index: u64,
}

/// Load the persisted position
///
/// Version 0 files lack the `frame_index` field; it reads as zero and
/// the caller resets `byte_index` accordingly.
pub(super) fn position_from_path(path: &Path) -> io::Result<QueuePosition> {
    let mut file = File::open(path)?;

    let mut word = [0u8; 4];
    file.read_exact(&mut word)?;
    let version = u32::from_le_bytes(word);

    let mut long = [0u8; 8];
    file.read_exact(&mut long)?;
    let segment_id = u64::from_le_bytes(long);

    match version {
        0 => {
            file.read_exact(&mut long)?;
            let byte_index = u64::from_le_bytes(long);
            Ok(QueuePosition {
                segment_id,
                frame_index: 0,
                byte_index,
            })
        }
        1 => {
            file.read_exact(&mut long)?;
            let frame_index = u64::from_le_bytes(long);
            file.read_exact(&mut long)?;
            let byte_index = u64::from_le_bytes(long);
            Ok(QueuePosition {
                segment_id,
                frame_index,
                byte_index,
            })
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported state file version {other}"),
        )),
    }
}

/// Writable handle on the state file
///
/// Opened write-only at startup; failing to open it is fatal because it
/// signals a permission problem that would also break segment creation.
pub(super) struct StateFile {
    file: File,
}

impl StateFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).create(true).open(path)?;
        Ok(Self { file })
    }

    /// Rewrite the position in place
    pub fn write_position(&mut self, position: QueuePosition) -> io::Result<()> {
        let mut buf = [0u8; 28];
        buf[0..4].copy_from_slice(&STATE_VERSION.to_le_bytes());
        buf[4..12].copy_from_slice(&position.segment_id.to_le_bytes());
        buf[12..20].copy_from_slice(&position.frame_index.to_le_bytes());
        buf[20..28].copy_from_slice(&position.byte_index.to_le_bytes());

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");

        let position = QueuePosition {
            segment_id: 12,
            frame_index: 345,
            byte_index: 6789,
        };
        StateFile::open(&path)
            .unwrap()
            .write_position(position)
            .unwrap();

        assert_eq!(position_from_path(&path).unwrap(), position);
    }

    #[test]
    fn test_rewrite_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");
        let mut state = StateFile::open(&path).unwrap();

        state
            .write_position(QueuePosition {
                segment_id: 1,
                frame_index: 2,
                byte_index: 3,
            })
            .unwrap();
        state
            .write_position(QueuePosition {
                segment_id: 4,
                frame_index: 5,
                byte_index: 6,
            })
            .unwrap();

        let position = position_from_path(&path).unwrap();
        assert_eq!(position.segment_id, 4);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 28);
    }

    #[test]
    fn test_legacy_version_reads_zero_frame_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");

        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&9u64.to_le_bytes());
        buf.extend_from_slice(&512u64.to_le_bytes());
        std::fs::write(&path, &buf).unwrap();

        let position = position_from_path(&path).unwrap();
        assert_eq!(position.segment_id, 9);
        assert_eq!(position.frame_index, 0);
        assert_eq!(position.byte_index, 512);
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = position_from_path(&dir.path().join("state.dat")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
