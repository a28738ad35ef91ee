//! Event - one published record
//!
//! Events pair a timestamp with two field maps: `fields` carries the data
//! itself, `meta` carries routing and index hints that never merge into
//! `fields` on the wire. The `ack_tag` identifies the producing client so
//! acknowledgements can find their way back after delivery.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EventError, Result};
use crate::fields::Fields;
use crate::{METADATA_KEY, TIMESTAMP_KEY};

/// Opaque acknowledgement routing tag
///
/// Stamped by the pipeline client after the processor chain has run, and
/// preserved end-to-end so a delivered event can be attributed to the
/// producer that published it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckTag {
    /// Event is not tracked for acknowledgement
    #[default]
    None,
    /// Event originated from a tracked producer
    Producer {
        /// Pipeline-assigned client id
        id: u64,
        /// Position of this event within the producer's stream (1-based)
        seq: u64,
    },
}

/// One published record: timestamp + fields + metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Moment the event describes (nanosecond resolution)
    #[serde(rename = "@timestamp")]
    timestamp: DateTime<Utc>,

    /// Event data
    fields: Fields,

    /// Routing/index hints; kept separate from `fields` on the wire
    #[serde(default, skip_serializing_if = "Fields::is_empty")]
    meta: Fields,

    /// Acknowledgement routing tag, never exposed to processors
    #[serde(default, skip_serializing_if = "ack_tag_is_none")]
    ack_tag: AckTag,
}

fn ack_tag_is_none(tag: &AckTag) -> bool {
    matches!(tag, AckTag::None)
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Create an empty event stamped with the current time
    pub fn new() -> Self {
        Self::with_timestamp(Utc::now())
    }

    /// Create an empty event with an explicit timestamp
    pub fn with_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            fields: Fields::new(),
            meta: Fields::new(),
            ack_tag: AckTag::None,
        }
    }

    /// Create an event from an existing field map
    pub fn from_fields(fields: Fields) -> Self {
        Self {
            fields,
            ..Self::new()
        }
    }

    /// Event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Replace the event timestamp
    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
    }

    /// Event data fields
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Mutable access to the event data fields
    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    /// Metadata fields (routing/index hints)
    pub fn meta(&self) -> &Fields {
        &self.meta
    }

    /// Mutable access to the metadata fields
    pub fn meta_mut(&mut self) -> &mut Fields {
        &mut self.meta
    }

    /// The acknowledgement routing tag
    pub fn ack_tag(&self) -> AckTag {
        self.ack_tag
    }

    /// Stamp the acknowledgement routing tag
    ///
    /// Called by the pipeline client after the processor chain has run.
    pub fn set_ack_tag(&mut self, tag: AckTag) {
        self.ack_tag = tag;
    }

    /// Look up a value by dotted path
    ///
    /// `@timestamp` resolves to the RFC 3339 rendering of the timestamp,
    /// `@metadata.*` paths resolve against the metadata map, and all other
    /// keys resolve against the data fields.
    pub fn get_value(&self, key: &str) -> Result<Value> {
        if key == TIMESTAMP_KEY {
            return Ok(Value::String(
                self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ));
        }
        if let Some(meta_key) = metadata_subkey(key) {
            return self
                .meta
                .get(meta_key)
                .cloned()
                .ok_or_else(|| EventError::KeyNotFound(key.to_string()));
        }
        self.fields
            .get(key)
            .cloned()
            .ok_or_else(|| EventError::KeyNotFound(key.to_string()))
    }

    /// Write a value at a dotted path
    ///
    /// Routes `@timestamp` and `@metadata.*` the same way as
    /// [`Event::get_value`]. Returns the previous value, if any.
    pub fn put_value(&mut self, key: &str, value: Value) -> Result<Option<Value>> {
        if key == TIMESTAMP_KEY {
            let raw = value
                .as_str()
                .ok_or_else(|| EventError::InvalidTimestamp(value.to_string()))?;
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| EventError::InvalidTimestamp(e.to_string()))?;
            let old = self.timestamp;
            self.timestamp = parsed.with_timezone(&Utc);
            return Ok(Some(Value::String(
                old.to_rfc3339_opts(SecondsFormat::Nanos, true),
            )));
        }
        if let Some(meta_key) = metadata_subkey(key) {
            return Ok(self.meta.put(meta_key, value));
        }
        Ok(self.fields.put(key, value))
    }

    /// Remove a value by dotted path
    ///
    /// `@timestamp` cannot be deleted; `@metadata.*` paths delete from the
    /// metadata map.
    pub fn delete(&mut self, key: &str) -> Result<Value> {
        if key == TIMESTAMP_KEY {
            return Err(EventError::KeyNotFound(key.to_string()));
        }
        if let Some(meta_key) = metadata_subkey(key) {
            return self
                .meta
                .delete(meta_key)
                .ok_or_else(|| EventError::KeyNotFound(key.to_string()));
        }
        self.fields
            .delete(key)
            .ok_or_else(|| EventError::KeyNotFound(key.to_string()))
    }
}

/// Strip the `@metadata.` prefix from a key, if present
fn metadata_subkey(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(METADATA_KEY)?;
    rest.strip_prefix('.')
}
