//! Closed set of messages a projection instance handles.
//!
//! Each worker routes a message to exactly one projection, which dispatches it
//! through [`CoreProjection::handle_message`](crate::CoreProjection::handle_message).

use eventide_core::CheckpointTag;
use eventide_events::CommittedEvent;

use crate::store::CheckpointWriteCompleted;

/// A committed event together with its tag in the projection's positional form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEventReceived {
    pub tag: CheckpointTag,
    pub event: CommittedEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionMessage {
    /// The subscription is live from `from` (exclusive).
    SubscriptionStarted { from: CheckpointTag },
    CommittedEventReceived(CommittedEventReceived),
    /// The source reached a natural boundary at `tag`.
    CheckpointSuggested { tag: CheckpointTag },
    CheckpointWritten(CheckpointWriteCompleted),
    GetState,
    GetStatistics,
    Stop,
}

impl ProjectionMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ProjectionMessage::SubscriptionStarted { .. } => "subscription_started",
            ProjectionMessage::CommittedEventReceived(_) => "committed_event_received",
            ProjectionMessage::CheckpointSuggested { .. } => "checkpoint_suggested",
            ProjectionMessage::CheckpointWritten(_) => "checkpoint_written",
            ProjectionMessage::GetState => "get_state",
            ProjectionMessage::GetStatistics => "get_statistics",
            ProjectionMessage::Stop => "stop",
        }
    }
}
