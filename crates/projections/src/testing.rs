//! Test doubles for the collaborators of [`CoreProjection`](crate::CoreProjection).
//!
//! Shared between this crate's unit tests and downstream integration tests.
//! Every double records what it was asked to do behind an `Arc<Mutex<_>>`
//! probe so tests can inspect it after handing the double to a projection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;

use eventide_core::CheckpointTag;
use eventide_events::{EmittedEvent, PublishError, Publisher, ProjectionReport, ReportKind};

use crate::checkpoint::Checkpoint;
use crate::message::CommittedEventReceived;
use crate::state_handler::{ProcessOutput, StateHandler};
use crate::store::{CheckpointStore, CheckpointStoreError, CheckpointWriteRequest, CheckpointWriter};
use crate::subscription::{SubscriptionError, SubscriptionSource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handler whose new state is the event payload verbatim.
#[derive(Debug, Default)]
pub struct FakeStateHandler {
    fail_on_load: bool,
    fail_on_process: bool,
    emit_to: Option<String>,
    loaded: Vec<String>,
    processed: usize,
}

impl FakeStateHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_load() -> Self {
        Self {
            fail_on_load: true,
            ..Self::default()
        }
    }

    pub fn failing_on_process() -> Self {
        Self {
            fail_on_process: true,
            ..Self::default()
        }
    }

    /// Emit one `Processed` event to `stream` per processed event.
    pub fn emitting_to(mut self, stream: impl Into<String>) -> Self {
        self.emit_to = Some(stream.into());
        self
    }

    pub fn loaded_states(&self) -> &[String] {
        &self.loaded
    }

    pub fn processed_count(&self) -> usize {
        self.processed
    }
}

impl StateHandler for FakeStateHandler {
    fn initial_state(&mut self) -> String {
        String::new()
    }

    fn load_state(&mut self, persisted: &str) -> anyhow::Result<String> {
        if self.fail_on_load {
            return Err(anyhow!("state could not be loaded"));
        }
        self.loaded.push(persisted.to_string());
        Ok(persisted.to_string())
    }

    fn process(&mut self, _state: &str, received: &CommittedEventReceived) -> anyhow::Result<ProcessOutput> {
        if self.fail_on_process {
            return Err(anyhow!("failed to process event {}", received.event.event_id()));
        }
        self.processed += 1;

        let data = received.event.data_str().unwrap_or_default().to_string();
        let mut output = ProcessOutput::state(data.clone());
        if let Some(stream) = &self.emit_to {
            output = output.with_emitted(EmittedEvent::new(
                stream.as_str(),
                "Processed",
                data,
                received.tag.clone(),
            ));
        }
        Ok(output)
    }
}

/// Calls observed by a [`RecordingSubscription`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCalls {
    pub subscribed_from: Vec<CheckpointTag>,
    pub pauses: usize,
    pub resumes: usize,
    pub unsubscribes: usize,
}

/// Subscription source that delivers nothing and records every call.
pub struct RecordingSubscription {
    calls: Arc<Mutex<SubscriptionCalls>>,
    fail_subscribe: bool,
}

#[derive(Clone)]
pub struct SubscriptionProbe(Arc<Mutex<SubscriptionCalls>>);

impl RecordingSubscription {
    pub fn new() -> (Self, SubscriptionProbe) {
        let calls = Arc::new(Mutex::new(SubscriptionCalls::default()));
        (
            Self {
                calls: Arc::clone(&calls),
                fail_subscribe: false,
            },
            SubscriptionProbe(calls),
        )
    }

    pub fn failing() -> (Self, SubscriptionProbe) {
        let (mut subscription, probe) = Self::new();
        subscription.fail_subscribe = true;
        (subscription, probe)
    }
}

impl SubscriptionSource for RecordingSubscription {
    fn subscribe_from(&mut self, from: &CheckpointTag) -> Result<(), SubscriptionError> {
        lock(&self.calls).subscribed_from.push(from.clone());
        if self.fail_subscribe {
            return Err(SubscriptionError("source unavailable".into()));
        }
        Ok(())
    }

    fn pause(&mut self) {
        lock(&self.calls).pauses += 1;
    }

    fn resume(&mut self) {
        lock(&self.calls).resumes += 1;
    }

    fn unsubscribe(&mut self) {
        lock(&self.calls).unsubscribes += 1;
    }
}

impl SubscriptionProbe {
    pub fn calls(&self) -> SubscriptionCalls {
        lock(&self.0).clone()
    }

    pub fn subscribe_count(&self) -> usize {
        lock(&self.0).subscribed_from.len()
    }
}

/// Writer that only records requests; completions are delivered by the test.
pub struct RecordingWriter(Arc<Mutex<Vec<CheckpointWriteRequest>>>);

#[derive(Clone)]
pub struct RecordedWrites(Arc<Mutex<Vec<CheckpointWriteRequest>>>);

impl RecordingWriter {
    pub fn new() -> (Self, RecordedWrites) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        (Self(Arc::clone(&requests)), RecordedWrites(requests))
    }
}

impl CheckpointWriter for RecordingWriter {
    fn begin_write(&mut self, request: CheckpointWriteRequest) {
        lock(&self.0).push(request);
    }
}

impl RecordedWrites {
    /// Remove and return every request recorded so far.
    pub fn take(&self) -> Vec<CheckpointWriteRequest> {
        std::mem::take(&mut *lock(&self.0))
    }

    pub fn all(&self) -> Vec<CheckpointWriteRequest> {
        lock(&self.0).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Report sink that keeps every report.
#[derive(Default)]
pub struct RecordingReports(Mutex<Vec<ProjectionReport>>);

impl RecordingReports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ProjectionReport> {
        lock(&self.0).clone()
    }

    pub fn count(&self, predicate: impl Fn(&ReportKind) -> bool) -> usize {
        lock(&self.0).iter().filter(|r| predicate(&r.kind)).count()
    }

    pub fn started_count(&self) -> usize {
        self.count(|k| matches!(k, ReportKind::Started))
    }

    pub fn stopped_count(&self) -> usize {
        self.count(|k| matches!(k, ReportKind::Stopped))
    }

    pub fn faulted_reasons(&self) -> Vec<String> {
        lock(&self.0)
            .iter()
            .filter_map(|r| match &r.kind {
                ReportKind::Faulted { reason } => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn completed_checkpoints(&self) -> Vec<CheckpointTag> {
        lock(&self.0)
            .iter()
            .filter_map(|r| match &r.kind {
                ReportKind::CheckpointCompleted { tag } => Some(tag.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last(&self) -> Option<ProjectionReport> {
        lock(&self.0).last().cloned()
    }
}

impl Publisher<ProjectionReport> for RecordingReports {
    fn publish(&self, report: ProjectionReport) -> Result<(), PublishError> {
        lock(&self.0).push(report);
        Ok(())
    }
}

/// Checkpoint store keeping every appended batch, with injectable failures.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    batches: Mutex<HashMap<String, Vec<(Checkpoint, Vec<EmittedEvent>)>>>,
    failing_writes: AtomicUsize,
    failing_reads: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(self, projection: &str, checkpoint: Checkpoint) -> Self {
        lock(&self.batches)
            .entry(projection.to_string())
            .or_default()
            .push((checkpoint, Vec::new()));
        self
    }

    /// Fail the next `n` appends.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.failing_reads.store(true, Ordering::SeqCst);
    }

    pub fn checkpoints(&self, projection: &str) -> Vec<Checkpoint> {
        lock(&self.batches)
            .get(projection)
            .map(|b| b.iter().map(|(c, _)| c.clone()).collect())
            .unwrap_or_default()
    }

    pub fn emitted(&self, projection: &str) -> Vec<EmittedEvent> {
        lock(&self.batches)
            .get(projection)
            .map(|b| b.iter().flat_map(|(_, e)| e.iter().cloned()).collect())
            .unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read_last(&self, projection: &str) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(CheckpointStoreError::Read("injected read failure".into()));
        }
        Ok(lock(&self.batches)
            .get(projection)
            .and_then(|b| b.last())
            .map(|(c, _)| c.clone()))
    }

    fn append(
        &self,
        projection: &str,
        checkpoint: &Checkpoint,
        emitted: &[EmittedEvent],
    ) -> Result<(), CheckpointStoreError> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CheckpointStoreError::Write("injected write failure".into()));
        }
        lock(&self.batches)
            .entry(projection.to_string())
            .or_default()
            .push((checkpoint.clone(), emitted.to_vec()));
        Ok(())
    }
}
