use serde::{Deserialize, Serialize};

use eventide_core::{CheckpointTag, EventId};

/// An event produced by a projection's state handler.
///
/// Emitted events are not written immediately: they are buffered and written
/// together with the next checkpoint, so a resumed projection never writes
/// them twice for the same causing position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub event_id: EventId,
    pub stream_id: String,
    pub event_type: String,
    pub data: String,
    /// Tag of the event whose processing produced this one.
    pub caused_by: CheckpointTag,
}

impl EmittedEvent {
    pub fn new(
        stream_id: impl Into<String>,
        event_type: impl Into<String>,
        data: impl Into<String>,
        caused_by: CheckpointTag,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            stream_id: stream_id.into(),
            event_type: event_type.into(),
            data: data.into(),
            caused_by,
        }
    }
}
