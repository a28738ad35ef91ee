//! Producer/consumer → broker message types

use tokio::sync::oneshot;

use crate::entry::{Entry, EntryId};

pub(super) use crate::ack::{AckState, ProducerAck};

/// Producer → broker: enqueue one entry
pub(super) struct PushRequest {
    pub entry: Entry,

    /// ACK bookkeeping for this entry, absent for untracked producers
    pub producer: Option<ProducerAck>,

    /// Whether the broker may park this request until space frees up
    pub can_block: bool,

    /// Assigned entry id, or `None` when the entry was refused
    pub resp: oneshot::Sender<Option<EntryId>>,
}

/// Consumer → broker: request a batch
pub(super) struct GetRequest {
    /// Requested number of entries (clamped to `max_get_request`)
    pub count: usize,

    pub resp: oneshot::Sender<BatchPayload>,
}

/// Broker → consumer: one batch worth of entries
pub(super) struct BatchPayload {
    pub id: u64,
    pub entries: Vec<Entry>,
}
