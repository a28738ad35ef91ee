//! Entry - an event as stored in the queue

use bytes::Bytes;
use skiff_event::Event;

/// Identifier assigned to an entry when the queue accepts it
///
/// Monotonically increasing within one queue instance. The zero id is
/// returned together with `accepted == false` when a publish is refused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

/// An event as held by a queue
///
/// Producers may install an [`EntryEncoder`](crate::EntryEncoder) to
/// serialize events before they enter the queue, trading producer-side
/// CPU for cheaper batch handling on the output path. The disk queue
/// always stores bytes.
#[derive(Debug, Clone)]
pub enum Entry {
    /// A structured event
    Event(Event),
    /// A pre-encoded event
    Bytes(Bytes),
}

impl Entry {
    /// The structured event, if this entry was not pre-encoded
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Entry::Event(event) => Some(event),
            Entry::Bytes(_) => None,
        }
    }

    /// The encoded payload, if this entry was pre-encoded
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Entry::Event(_) => None,
            Entry::Bytes(bytes) => Some(bytes),
        }
    }

    /// Byte size of a pre-encoded entry, zero for structured events
    pub fn encoded_size(&self) -> usize {
        match self {
            Entry::Event(_) => 0,
            Entry::Bytes(bytes) => bytes.len(),
        }
    }
}

impl From<Event> for Entry {
    fn from(event: Event) -> Self {
        Entry::Event(event)
    }
}
