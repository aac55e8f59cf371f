//! Checkpoint persistence seams.
//!
//! - [`CheckpointStore`]: the durable store (read last, append batch). Called
//!   synchronously; implementations may block.
//! - [`CheckpointWriter`]: how the checkpoint manager *starts* a write. A write
//!   never completes inside `begin_write`; its outcome comes back later as a
//!   [`ProjectionMessage::CheckpointWritten`] on the projection's inbox.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use eventide_events::{EmittedEvent, Publisher};

use crate::checkpoint::Checkpoint;
use crate::message::ProjectionMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointStoreError {
    #[error("checkpoint read failed: {0}")]
    Read(String),

    #[error("checkpoint write failed: {0}")]
    Write(String),

    #[error("checkpoint record could not be encoded/decoded: {0}")]
    Codec(String),

    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Durable, per-projection checkpoint storage.
///
/// No two projections share a checkpoint stream, so implementations need no
/// cross-projection coordination.
pub trait CheckpointStore: Send + Sync {
    /// Last persisted checkpoint of `projection`, if any.
    fn read_last(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointStoreError>;

    /// Persist `checkpoint` and the emitted events buffered with it, atomically.
    fn append(
        &self,
        projection: &str,
        checkpoint: &Checkpoint,
        emitted: &[EmittedEvent],
    ) -> Result<(), CheckpointStoreError>;
}

impl<S> CheckpointStore for Arc<S>
where
    S: CheckpointStore + ?Sized,
{
    fn read_last(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        (**self).read_last(projection)
    }

    fn append(
        &self,
        projection: &str,
        checkpoint: &Checkpoint,
        emitted: &[EmittedEvent],
    ) -> Result<(), CheckpointStoreError> {
        (**self).append(projection, checkpoint, emitted)
    }
}

/// One checkpoint write, as issued by the checkpoint manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointWriteRequest {
    /// Unique per manager; echoed back in the completion.
    pub request_id: u64,
    pub projection: String,
    pub checkpoint: Checkpoint,
    pub emitted: Vec<EmittedEvent>,
}

/// Outcome of a [`CheckpointWriteRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointWriteCompleted {
    pub request_id: u64,
    pub result: Result<(), CheckpointStoreError>,
}

impl CheckpointWriteRequest {
    /// Perform the write against `store` and build its completion.
    pub fn execute(&self, store: &dyn CheckpointStore) -> CheckpointWriteCompleted {
        CheckpointWriteCompleted {
            request_id: self.request_id,
            result: store.append(&self.projection, &self.checkpoint, &self.emitted),
        }
    }
}

/// Starts checkpoint writes on behalf of a checkpoint manager.
pub trait CheckpointWriter: Send {
    fn begin_write(&mut self, request: CheckpointWriteRequest);
}

impl<W: CheckpointWriter + ?Sized> CheckpointWriter for Box<W> {
    fn begin_write(&mut self, request: CheckpointWriteRequest) {
        (**self).begin_write(request)
    }
}

/// Writer that appends on the calling thread and posts the completion to the
/// projection's inbox.
///
/// The manager still observes the outcome asynchronously (as the next inbox
/// message), which keeps the single-writer discipline intact.
pub struct InlineCheckpointWriter {
    store: Arc<dyn CheckpointStore>,
    reply: Arc<dyn Publisher<ProjectionMessage>>,
}

impl InlineCheckpointWriter {
    pub fn new(store: Arc<dyn CheckpointStore>, reply: Arc<dyn Publisher<ProjectionMessage>>) -> Self {
        Self { store, reply }
    }
}

impl CheckpointWriter for InlineCheckpointWriter {
    fn begin_write(&mut self, request: CheckpointWriteRequest) {
        let completed = request.execute(self.store.as_ref());
        if let Err(err) = self.reply.publish(ProjectionMessage::CheckpointWritten(completed)) {
            warn!(
                projection = %request.projection,
                request_id = request.request_id,
                error = %err,
                "checkpoint completion could not be delivered"
            );
        }
    }
}
