//! Per-projection configuration.

use serde::{Deserialize, Serialize};

use eventide_core::{CheckpointTag, CoreResult};
use eventide_events::CommittedEvent;

use crate::error::ProjectionError;

/// Which events a projection reads.
///
/// A projection reads either the whole log (tags are log positions) or a
/// single stream (tags are event numbers of that stream), optionally narrowed
/// to a set of event types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// `None` reads all streams.
    #[serde(default)]
    pub stream: Option<String>,
    /// `None` accepts every event type.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

impl SourceDefinition {
    pub fn all_streams() -> Self {
        Self::default()
    }

    pub fn stream(name: impl Into<String>) -> Self {
        Self {
            stream: Some(name.into()),
            event_types: None,
        }
    }

    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Tag preceding every event this source can deliver.
    pub fn zero_tag(&self) -> CoreResult<CheckpointTag> {
        match &self.stream {
            Some(stream) => CheckpointTag::zero_for_stream(stream.as_str()),
            None => Ok(CheckpointTag::zero_position()),
        }
    }

    /// Tag of `event` in this source's positional form.
    pub fn tag_for(&self, event: &CommittedEvent) -> CoreResult<CheckpointTag> {
        let position = event.position();
        match &self.stream {
            Some(_) => CheckpointTag::from_stream_position(
                event.stream_id(),
                event.sequence_number(),
                position.prepare,
            ),
            None => Ok(CheckpointTag::from_position(position.commit, position.prepare)),
        }
    }

    /// Whole-log sources skip `$`-prefixed system streams (checkpoints, state).
    pub fn reads_stream(&self, stream_id: &str) -> bool {
        match &self.stream {
            Some(stream) => stream == stream_id,
            None => !stream_id.starts_with('$'),
        }
    }

    pub fn matches(&self, event: &CommittedEvent) -> bool {
        self.reads_stream(event.stream_id())
            && self
                .event_types
                .as_ref()
                .is_none_or(|types| types.iter().any(|t| t == event.event_type()))
    }
}

fn default_checkpoint_handled_threshold() -> usize {
    4000
}

fn default_pending_events_threshold() -> usize {
    1000
}

fn default_max_checkpoint_write_attempts() -> u32 {
    3
}

/// Configuration of one projection instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    pub name: String,
    #[serde(default)]
    pub source: SourceDefinition,
    /// Write a checkpoint after this many accepted events.
    #[serde(default = "default_checkpoint_handled_threshold")]
    pub checkpoint_handled_threshold: usize,
    /// Events processed while a checkpoint write is outstanding before intake
    /// is paused.
    #[serde(default = "default_pending_events_threshold")]
    pub pending_events_threshold: usize,
    /// Total attempts for one checkpoint write before the projection faults.
    #[serde(default = "default_max_checkpoint_write_attempts")]
    pub max_checkpoint_write_attempts: u32,
}

impl ProjectionConfig {
    pub fn new(name: impl Into<String>, source: SourceDefinition) -> Self {
        Self {
            name: name.into(),
            source,
            checkpoint_handled_threshold: default_checkpoint_handled_threshold(),
            pending_events_threshold: default_pending_events_threshold(),
            max_checkpoint_write_attempts: default_max_checkpoint_write_attempts(),
        }
    }

    pub fn with_checkpoint_handled_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_handled_threshold = threshold;
        self
    }

    pub fn with_pending_events_threshold(mut self, threshold: usize) -> Self {
        self.pending_events_threshold = threshold;
        self
    }

    pub fn with_max_checkpoint_write_attempts(mut self, attempts: u32) -> Self {
        self.max_checkpoint_write_attempts = attempts;
        self
    }

    pub fn validate(&self) -> Result<(), ProjectionError> {
        if self.name.trim().is_empty() {
            return Err(ProjectionError::InvalidConfig("name must not be empty".into()));
        }
        if self.checkpoint_handled_threshold == 0 {
            return Err(ProjectionError::InvalidConfig(
                "checkpoint_handled_threshold must be at least 1".into(),
            ));
        }
        if self.pending_events_threshold == 0 {
            return Err(ProjectionError::InvalidConfig(
                "pending_events_threshold must be at least 1".into(),
            ));
        }
        if self.max_checkpoint_write_attempts == 0 {
            return Err(ProjectionError::InvalidConfig(
                "max_checkpoint_write_attempts must be at least 1".into(),
            ));
        }
        if matches!(self.source.stream.as_deref(), Some("")) {
            return Err(ProjectionError::InvalidConfig("source stream must not be empty".into()));
        }
        Ok(())
    }
}
