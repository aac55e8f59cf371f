//! Checkpoint stores backed by the committed-event log.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use eventide_events::EmittedEvent;
use eventide_projections::{Checkpoint, CheckpointStore, CheckpointStoreError, checkpoint_stream_name};

use crate::event_log::{EventLogError, InMemoryEventLog};

#[cfg(feature = "postgres")]
pub use crate::postgres::PostgresCheckpointStore;

/// Checkpoint store writing checkpoint batches into an [`InMemoryEventLog`].
///
/// Checkpoint, state and emitted records are appended as one transaction and
/// are therefore visible to subscriptions of the same log (except to
/// whole-log sources, which skip `$` system streams).
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    log: InMemoryEventLog,
    failing_writes: Arc<AtomicUsize>,
}

impl InMemoryCheckpointStore {
    pub fn new(log: InMemoryEventLog) -> Self {
        Self {
            log,
            failing_writes: Default::default(),
        }
    }

    pub fn log(&self) -> &InMemoryEventLog {
        &self.log
    }

    /// Fail the next `n` appends with a write error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Every checkpoint persisted for `projection`, oldest first.
    pub fn history(&self, projection: &str) -> Result<Vec<Checkpoint>, CheckpointStoreError> {
        self.log
            .read_stream(&checkpoint_stream_name(projection))
            .map_err(read_error)?
            .iter()
            .map(Checkpoint::from_event)
            .collect()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn read_error(err: EventLogError) -> CheckpointStoreError {
    CheckpointStoreError::Read(err.to_string())
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn read_last(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        self.log
            .last_in_stream(&checkpoint_stream_name(projection))
            .map_err(read_error)?
            .map(|event| Checkpoint::from_event(&event))
            .transpose()
    }

    fn append(
        &self,
        projection: &str,
        checkpoint: &Checkpoint,
        emitted: &[EmittedEvent],
    ) -> Result<(), CheckpointStoreError> {
        if self.take_injected_failure() {
            return Err(CheckpointStoreError::Write("injected write failure".into()));
        }

        let records = checkpoint
            .to_records(projection, emitted)?
            .into_iter()
            .map(|r| (r.stream_id, r.event))
            .collect();
        self.log
            .append_transaction(records)
            .map_err(|e| CheckpointStoreError::Write(e.to_string()))?;

        debug!(projection, tag = %checkpoint.tag, emitted = emitted.len(), "checkpoint appended");
        Ok(())
    }
}
