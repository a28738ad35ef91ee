//! Entry encoding
//!
//! Producers can serialize events before they enter the queue, so the
//! output path hands out ready-made bytes instead of re-serializing per
//! batch. The disk queue always encodes: its frames store bytes.
//!
//! CBOR is the default codec. It is self-delimiting and tolerates
//! streaming reads, which matters when a segment is truncated mid-frame.

use bytes::Bytes;
use skiff_event::Event;

use crate::error::{QueueError, Result};

/// Serializes events into queue entries
pub trait EntryEncoder: Send + Sync {
    /// Encode one event; failures drop the event on the producer side
    fn encode(&self, event: &Event) -> Result<Bytes>;

    /// Identifier written into segment headers ("cbor" → 0, ...)
    fn encoding_id(&self) -> u32;
}

/// Deserializes stored entries back into events
pub trait EntryDecoder: Send + Sync {
    /// Decode one stored payload
    fn decode(&self, bytes: &[u8]) -> Result<Event>;
}

/// CBOR codec, the default for disk frames
#[derive(Debug, Clone, Copy, Default)]
pub struct CborEncoder;

/// Encoding id recorded in segment headers for CBOR payloads
pub const ENCODING_CBOR: u32 = 0;

impl EntryEncoder for CborEncoder {
    fn encode(&self, event: &Event) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(256);
        ciborium::into_writer(event, &mut buf)
            .map_err(|e| QueueError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    fn encoding_id(&self) -> u32 {
        ENCODING_CBOR
    }
}

impl EntryDecoder for CborEncoder {
    fn decode(&self, bytes: &[u8]) -> Result<Event> {
        ciborium::from_reader(bytes).map_err(|e| QueueError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cbor_roundtrip() {
        let mut event = Event::new();
        event.fields_mut().put("message", json!("roundtrip"));
        event.fields_mut().put("count", json!(3));
        event.meta_mut().put("index", json!("custom"));

        let codec = CborEncoder;
        let bytes = codec.encode(&event).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.fields(), event.fields());
        assert_eq!(decoded.meta(), event.meta());
        assert_eq!(decoded.timestamp(), event.timestamp());
    }

    #[test]
    fn test_cbor_encoding_is_stable() {
        let mut event = Event::new();
        event.fields_mut().put("k", json!("v"));

        let codec = CborEncoder;
        let first = codec.encode(&event).unwrap();
        let second = codec.encode(&event).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let codec = CborEncoder;
        assert!(codec.decode(&[0xff, 0x00, 0x13]).is_err());
    }
}
