use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventide_core::{EventId, LogPosition};

/// An event to be appended to the log (not yet assigned positions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub is_json: bool,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            is_json: false,
            data: data.into(),
            metadata: Vec::new(),
        }
    }

    /// A JSON event (data is a serialized JSON document).
    pub fn json(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            is_json: true,
            ..Self::new(event_type, data.into().into_bytes())
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }
}

/// An event committed to the log.
///
/// Notes:
/// - `sequence_number` is the event number within `stream_id` (0-based).
/// - `position` is the commit/prepare position in the global log; both are
///   strictly increasing in commit order.
/// - `data`/`metadata` are opaque bytes; only the state handler interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEvent {
    event_id: EventId,
    stream_id: String,
    sequence_number: i64,
    position: LogPosition,

    event_type: String,
    is_json: bool,
    data: Vec<u8>,
    metadata: Vec<u8>,

    timestamp: DateTime<Utc>,
}

impl CommittedEvent {
    pub fn new(
        stream_id: impl Into<String>,
        sequence_number: i64,
        position: LogPosition,
        event: NewEvent,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event.event_id,
            stream_id: stream_id.into(),
            sequence_number,
            position,
            event_type: event.event_type,
            is_json: event.is_json,
            data: event.data,
            metadata: event.metadata,
            timestamp,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    pub fn position(&self) -> LogPosition {
        self.position
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn is_json(&self) -> bool {
        self.is_json
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn data_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.data).ok()
    }

    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
