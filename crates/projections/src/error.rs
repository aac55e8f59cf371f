//! Error model of the projection core.
//!
//! Two families of failure exist and they are deliberately kept apart:
//!
//! - **Caller errors** ([`CheckpointError`], [`ProjectionError`]) are returned
//!   synchronously: a tag presented out of order, or an operation invoked in
//!   the wrong lifecycle phase. They indicate a bug or a duplicate delivery in
//!   the caller and never change the projection's status.
//! - **Projection faults** (state handler failures, exhausted checkpoint write
//!   attempts) are *not* errors at this API: they move the projection to
//!   `Faulted` and are published as a report.

use thiserror::Error;

use eventide_core::{CheckpointTag, CoreError};
use eventide_events::ProjectionStatus;

/// Precondition violation at the checkpoint manager boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// A tag not strictly greater than the last accepted one.
    #[error("ordering violation: tag {found} is not after {last}")]
    OrderingViolation {
        last: CheckpointTag,
        found: CheckpointTag,
    },

    /// A tag of a different positional form (or stream) than the session's.
    #[error("tag {found} cannot follow {expected}")]
    TagMismatch {
        expected: CheckpointTag,
        found: CheckpointTag,
    },

    #[error("{operation} is not allowed while the checkpoint manager is {phase}")]
    LifecycleMisuse {
        operation: &'static str,
        phase: &'static str,
    },
}

/// Precondition violation at the core projection boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// A delivered event whose tag is not after the last processed one.
    #[error("ordering violation: event at {found} is not after {last}")]
    OrderingViolation {
        last: CheckpointTag,
        found: CheckpointTag,
    },

    #[error("{operation} is not allowed while the projection is {status}")]
    LifecycleMisuse {
        operation: &'static str,
        status: ProjectionStatus,
    },

    #[error("invalid projection configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProjectionError {
    pub fn is_ordering_violation(&self) -> bool {
        matches!(
            self,
            ProjectionError::OrderingViolation { .. }
                | ProjectionError::Checkpoint(CheckpointError::OrderingViolation { .. })
        )
    }
}
