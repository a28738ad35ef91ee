//! On-disk frame format
//!
//! `u32 length | payload | u32 crc32c(payload)`, little-endian. Frames
//! are self-contained: a reader can always resynchronize at a segment
//! boundary, and a torn or corrupted frame is detected by the checksum.

use std::io::{self, Read};

use bytes::Bytes;

/// Length prefix plus checksum suffix
pub(super) const FRAME_OVERHEAD: u64 = 8;

/// Largest payload the reader will attempt to allocate; anything above
/// is treated as corruption of the length field
const MAX_FRAME_PAYLOAD: u32 = 256 * 1024 * 1024;

/// Total on-disk size of a frame with the given payload
pub(super) fn frame_size(payload_len: usize) -> u64 {
    payload_len as u64 + FRAME_OVERHEAD
}

/// Append one frame to a write buffer
pub(super) fn append_frame(buf: &mut Vec<u8>, payload: &[u8]) {
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&crc32c::crc32c(payload).to_le_bytes());
}

/// Outcome of reading one frame
pub(super) enum FrameRead {
    /// A complete, checksum-valid frame
    Frame(Bytes),
    /// Clean end of data
    Eof,
    /// Torn frame or checksum mismatch; reading must stop here
    Corrupt,
}

/// Read one frame, tolerating a torn tail
///
/// A clean EOF before the length prefix is `Eof`; running out of data
/// mid-frame or failing the checksum is `Corrupt`. I/O errors propagate.
pub(super) fn read_frame<R: Read>(reader: &mut R) -> io::Result<FrameRead> {
    let mut word = [0u8; 4];
    match read_exact_or_eof(reader, &mut word)? {
        ReadExact::Eof => return Ok(FrameRead::Eof),
        ReadExact::Short => return Ok(FrameRead::Corrupt),
        ReadExact::Full => {}
    }
    let len = u32::from_le_bytes(word);
    if len > MAX_FRAME_PAYLOAD {
        return Ok(FrameRead::Corrupt);
    }

    let mut payload = vec![0u8; len as usize];
    match read_exact_or_eof(reader, &mut payload)? {
        ReadExact::Full => {}
        _ => return Ok(FrameRead::Corrupt),
    }

    match read_exact_or_eof(reader, &mut word)? {
        ReadExact::Full => {}
        _ => return Ok(FrameRead::Corrupt),
    }
    let expected = u32::from_le_bytes(word);
    if crc32c::crc32c(&payload) != expected {
        return Ok(FrameRead::Corrupt);
    }

    Ok(FrameRead::Frame(Bytes::from(payload)))
}

enum ReadExact {
    Full,
    Short,
    Eof,
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<ReadExact> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadExact::Eof
                } else {
                    ReadExact::Short
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadExact::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        append_frame(&mut buf, b"payload one");
        append_frame(&mut buf, b"");
        append_frame(&mut buf, b"payload two");
        assert_eq!(
            buf.len() as u64,
            frame_size(11) + frame_size(0) + frame_size(11)
        );

        let mut cursor = Cursor::new(&buf);
        for expected in [&b"payload one"[..], b"", b"payload two"] {
            match read_frame(&mut cursor).unwrap() {
                FrameRead::Frame(payload) => assert_eq!(&payload[..], expected),
                _ => panic!("expected a frame"),
            }
        }
        assert!(matches!(read_frame(&mut cursor).unwrap(), FrameRead::Eof));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut buf = Vec::new();
        append_frame(&mut buf, b"sensitive bits");
        buf[6] ^= 0x01;

        let mut cursor = Cursor::new(&buf);
        assert!(matches!(read_frame(&mut cursor).unwrap(), FrameRead::Corrupt));
    }

    #[test]
    fn test_torn_tail_detected() {
        let mut buf = Vec::new();
        append_frame(&mut buf, b"this frame gets torn");
        buf.truncate(buf.len() - 6);

        let mut cursor = Cursor::new(&buf);
        assert!(matches!(read_frame(&mut cursor).unwrap(), FrameRead::Corrupt));
    }

    #[test]
    fn test_absurd_length_is_corruption() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf.extend_from_slice(b"garbage");

        let mut cursor = Cursor::new(&buf);
        assert!(matches!(read_frame(&mut cursor).unwrap(), FrameRead::Corrupt));
    }
}
