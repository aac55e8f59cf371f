//! Outbound status and statistics reports.
//!
//! Every projection instance publishes reports through a sink handed to it at
//! construction. Reports are facts about one projection; consumers
//! (management, monitoring) aggregate them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventide_core::{CheckpointTag, ProjectionId};

/// Lifecycle phase of a projection instance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionStatus {
    Initial,
    LoadingState,
    Subscribing,
    Processing,
    /// Intake paused until the outstanding checkpoint write completes.
    CheckpointingSuspended,
    Stopping,
    Stopped,
    Faulted,
}

impl ProjectionStatus {
    /// `Stopped` and `Faulted` accept no further work.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProjectionStatus::Stopped | ProjectionStatus::Faulted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectionStatus::Initial => "initial",
            ProjectionStatus::LoadingState => "loading_state",
            ProjectionStatus::Subscribing => "subscribing",
            ProjectionStatus::Processing => "processing",
            ProjectionStatus::CheckpointingSuspended => "checkpointing_suspended",
            ProjectionStatus::Stopping => "stopping",
            ProjectionStatus::Stopped => "stopped",
            ProjectionStatus::Faulted => "faulted",
        }
    }
}

impl core::fmt::Display for ProjectionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time counters of one projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionStatistics {
    pub status: ProjectionStatus,
    pub events_processed: u64,
    /// Events received while intake was suspended and not yet processed.
    pub buffered_events: usize,
    pub last_processed_tag: Option<CheckpointTag>,
    pub last_checkpoint_tag: Option<CheckpointTag>,
    pub checkpoints_written: u64,
    pub checkpoint_write_failures: u64,
    pub write_pending: bool,
}

/// What a report says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportKind {
    Started,
    Stopped,
    Faulted { reason: String },
    CheckpointCompleted { tag: CheckpointTag },
    State {
        tag: Option<CheckpointTag>,
        state: Option<String>,
    },
    Statistics(ProjectionStatistics),
}

/// A report published by one projection instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionReport {
    pub projection_id: ProjectionId,
    pub name: String,
    pub at: DateTime<Utc>,
    pub kind: ReportKind,
}

impl ProjectionReport {
    pub fn new(projection_id: ProjectionId, name: impl Into<String>, kind: ReportKind) -> Self {
        Self {
            projection_id,
            name: name.into(),
            at: Utc::now(),
            kind,
        }
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.kind, ReportKind::Faulted { .. })
    }

    pub fn is_checkpoint_completed(&self) -> bool {
        matches!(self.kind, ReportKind::CheckpointCompleted { .. })
    }
}
