//! Checkpoint records and their persisted shape.
//!
//! A checkpoint write persists, as one batch:
//!
//! ```text
//! $projections-{name}-checkpoint  ProjectionCheckpoint  data=state  metadata={tag, prior_tag}
//! $projections-{name}-state       StateUpdated          data=state  metadata={tag}
//! <target stream>                 <emitted type>        data=...    metadata={caused_by}
//! ```
//!
//! On restart only the last `ProjectionCheckpoint` record is read back.

use serde::{Deserialize, Serialize};

use eventide_core::CheckpointTag;
use eventide_events::{CommittedEvent, EmittedEvent, NewEvent};

use crate::store::CheckpointStoreError;

pub const CHECKPOINT_EVENT_TYPE: &str = "ProjectionCheckpoint";
pub const STATE_UPDATED_EVENT_TYPE: &str = "StateUpdated";

pub fn checkpoint_stream_name(projection: &str) -> String {
    format!("$projections-{projection}-checkpoint")
}

pub fn state_stream_name(projection: &str) -> String {
    format!("$projections-{projection}-state")
}

/// Durable snapshot of projection state at a tag.
///
/// Never mutated after creation; the next checkpoint supersedes it and links
/// back to it through `prior_tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub tag: CheckpointTag,
    pub prior_tag: Option<CheckpointTag>,
    /// `None` when no state was ever produced (nothing processed since a fresh start).
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointMetadata {
    tag: CheckpointTag,
    #[serde(default)]
    prior_tag: Option<CheckpointTag>,
}

#[derive(Debug, Serialize)]
struct StateMetadata<'a> {
    tag: &'a CheckpointTag,
}

#[derive(Debug, Serialize)]
struct EmittedMetadata<'a> {
    caused_by: &'a CheckpointTag,
}

/// One record of a checkpoint batch, addressed to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub stream_id: String,
    pub event: NewEvent,
}

fn codec_error(e: serde_json::Error) -> CheckpointStoreError {
    CheckpointStoreError::Codec(e.to_string())
}

impl Checkpoint {
    /// Records making up one checkpoint write, in write order.
    pub fn to_records(
        &self,
        projection: &str,
        emitted: &[EmittedEvent],
    ) -> Result<Vec<CheckpointRecord>, CheckpointStoreError> {
        let state = self.state.clone().unwrap_or_default();
        let checkpoint_meta = serde_json::to_vec(&CheckpointMetadata {
            tag: self.tag.clone(),
            prior_tag: self.prior_tag.clone(),
        })
        .map_err(codec_error)?;
        let state_meta = serde_json::to_vec(&StateMetadata { tag: &self.tag }).map_err(codec_error)?;

        let mut records = Vec::with_capacity(emitted.len() + 2);
        for e in emitted {
            let meta = serde_json::to_vec(&EmittedMetadata { caused_by: &e.caused_by }).map_err(codec_error)?;
            let mut event = NewEvent::json(e.event_type.clone(), e.data.clone()).with_metadata(meta);
            event.event_id = e.event_id;
            records.push(CheckpointRecord {
                stream_id: e.stream_id.clone(),
                event,
            });
        }
        records.push(CheckpointRecord {
            stream_id: state_stream_name(projection),
            event: NewEvent::json(STATE_UPDATED_EVENT_TYPE, state.clone()).with_metadata(state_meta),
        });
        records.push(CheckpointRecord {
            stream_id: checkpoint_stream_name(projection),
            event: NewEvent::json(CHECKPOINT_EVENT_TYPE, state).with_metadata(checkpoint_meta),
        });
        Ok(records)
    }

    /// Decode a `ProjectionCheckpoint` record read back from the log.
    pub fn from_event(event: &CommittedEvent) -> Result<Self, CheckpointStoreError> {
        if event.event_type() != CHECKPOINT_EVENT_TYPE {
            return Err(CheckpointStoreError::Codec(format!(
                "expected {CHECKPOINT_EVENT_TYPE}, found {}",
                event.event_type()
            )));
        }
        let meta: CheckpointMetadata = serde_json::from_slice(event.metadata()).map_err(codec_error)?;
        let state = event
            .data_str()
            .ok_or_else(|| CheckpointStoreError::Codec("checkpoint state is not UTF-8".into()))?;

        Ok(Self {
            tag: meta.tag,
            prior_tag: meta.prior_tag,
            state: (!state.is_empty()).then(|| state.to_string()),
        })
    }
}
