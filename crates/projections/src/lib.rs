//! Per-projection processing core.
//!
//! A [`CoreProjection`] consumes committed events in strictly increasing
//! [`CheckpointTag`](eventide_core::CheckpointTag) order, runs them through a
//! [`StateHandler`], and hands every result to its [`CheckpointManager`],
//! which decides when a checkpoint is due and persists it through a
//! [`CheckpointWriter`].
//!
//! Everything here is single-threaded per projection instance: a projection is
//! driven by exactly one worker, one [`ProjectionMessage`] at a time.
//! Collaborators (event subscription, checkpoint storage, report sink) are
//! injected as trait objects; see `eventide-infra` for implementations.

pub mod checkpoint;
pub mod checkpoint_manager;
pub mod config;
pub mod core_projection;
pub mod error;
pub mod message;
pub mod state_handler;
pub mod store;
pub mod subscription;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use checkpoint::{Checkpoint, CheckpointRecord, checkpoint_stream_name, state_stream_name};
pub use checkpoint_manager::{CheckpointManager, WriteOutcome};
pub use config::{ProjectionConfig, SourceDefinition};
pub use core_projection::{CoreProjection, ProjectionDependencies};
pub use error::{CheckpointError, ProjectionError};
pub use message::{CommittedEventReceived, ProjectionMessage};
pub use state_handler::{FnStateHandler, ProcessOutput, StateHandler};
pub use store::{
    CheckpointStore, CheckpointStoreError, CheckpointWriteCompleted, CheckpointWriteRequest,
    CheckpointWriter, InlineCheckpointWriter,
};
pub use subscription::{SubscriptionError, SubscriptionSource};
