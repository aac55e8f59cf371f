//! Checkpoint scheduling and persistence for one projection.
//!
//! The manager accumulates processed-event notifications and writes a
//! checkpoint after every `threshold` accepted events, or immediately when a
//! checkpoint is suggested. It enforces the session ordering invariant: every
//! accepted tag is strictly greater than the start tag and than every tag
//! accepted before it.
//!
//! ## Write protocol
//!
//! At most one write is outstanding at any time. A checkpoint that becomes due
//! while a write is outstanding (or failed and not yet retried) is remembered
//! and issued as soon as the outstanding write succeeds, using the state
//! retained at that moment. A failed write is kept as-is (state, tag and
//! emitted events) until the owner retries it; the manager never retries on
//! its own and never drops a failed write silently.
//!
//! After `stopping()` no new write is started; an outstanding one may still
//! complete.

use tracing::{debug, info, warn};

use eventide_core::CheckpointTag;
use eventide_events::EmittedEvent;

use crate::checkpoint::Checkpoint;
use crate::error::CheckpointError;
use crate::store::{CheckpointStoreError, CheckpointWriteCompleted, CheckpointWriteRequest, CheckpointWriter};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Created,
    Loaded,
    Started,
    Stopping,
    Stopped,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Loaded => "loaded",
            Phase::Started => "started",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    request_id: u64,
    checkpoint: Checkpoint,
    emitted: Vec<EmittedEvent>,
    attempts: u32,
}

/// What a write completion meant to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed {
        tag: CheckpointTag,
    },
    /// The write failed; it is retained until [`CheckpointManager::retry_failed_write`].
    Failed {
        tag: CheckpointTag,
        attempts: u32,
        error: CheckpointStoreError,
    },
    /// Not the outstanding write (stale or duplicate completion).
    Ignored,
}

pub struct CheckpointManager {
    projection: String,
    threshold: usize,
    writer: Box<dyn CheckpointWriter>,
    phase: Phase,

    start_tag: Option<CheckpointTag>,
    last_tag: Option<CheckpointTag>,
    last_checkpoint_tag: Option<CheckpointTag>,
    retained_state: Option<String>,
    pending_emitted: Vec<EmittedEvent>,

    handled_since_checkpoint: usize,
    handled_during_write: usize,
    checkpoint_requested: bool,
    in_flight: Option<PendingWrite>,
    failed: Option<PendingWrite>,
    next_request_id: u64,

    checkpoints_written: u64,
    write_failures: u64,
}

impl CheckpointManager {
    /// `threshold` is clamped to at least 1.
    pub fn new(projection: impl Into<String>, threshold: usize, writer: Box<dyn CheckpointWriter>) -> Self {
        Self {
            projection: projection.into(),
            threshold: threshold.max(1),
            writer,
            phase: Phase::Created,
            start_tag: None,
            last_tag: None,
            last_checkpoint_tag: None,
            retained_state: None,
            pending_emitted: Vec::new(),
            handled_since_checkpoint: 0,
            handled_during_write: 0,
            checkpoint_requested: false,
            in_flight: None,
            failed: None,
            next_request_id: 0,
            checkpoints_written: 0,
            write_failures: 0,
        }
    }

    /// Record the checkpoint the projection was loaded from (if any).
    ///
    /// Its state is retained so a checkpoint suggested before any event is
    /// processed does not lose it, and its tag becomes the prior tag of the
    /// next checkpoint.
    pub fn state_loaded(&mut self, checkpoint: Option<&Checkpoint>) -> Result<(), CheckpointError> {
        self.require(&[Phase::Created], "state_loaded")?;
        if let Some(c) = checkpoint {
            self.last_checkpoint_tag = Some(c.tag.clone());
            self.retained_state = c.state.clone();
        }
        self.phase = Phase::Loaded;
        Ok(())
    }

    /// Begin a session at `tag`.
    pub fn start(&mut self, tag: CheckpointTag) -> Result<(), CheckpointError> {
        self.require(&[Phase::Created, Phase::Loaded], "start")?;
        if let Some(persisted) = &self.last_checkpoint_tag {
            if !persisted.is_comparable_with(&tag) {
                return Err(CheckpointError::TagMismatch {
                    expected: persisted.clone(),
                    found: tag,
                });
            }
            if tag < *persisted {
                return Err(CheckpointError::OrderingViolation {
                    last: persisted.clone(),
                    found: tag,
                });
            }
        }

        info!(projection = %self.projection, tag = %tag, threshold = self.threshold, "checkpoint manager started");
        self.start_tag = Some(tag.clone());
        self.last_tag = Some(tag);
        self.handled_since_checkpoint = 0;
        self.phase = Phase::Started;
        Ok(())
    }

    /// Check that `tag` may be accepted next, without accepting it.
    pub fn check_next(&self, operation: &'static str, tag: &CheckpointTag) -> Result<(), CheckpointError> {
        self.require(&[Phase::Started], operation)?;
        let Some(last) = self.last_tag.as_ref() else {
            return Err(self.misuse(operation));
        };
        if !last.is_comparable_with(tag) {
            return Err(CheckpointError::TagMismatch {
                expected: last.clone(),
                found: tag.clone(),
            });
        }
        if tag <= last {
            return Err(CheckpointError::OrderingViolation {
                last: last.clone(),
                found: tag.clone(),
            });
        }
        Ok(())
    }

    /// Accept the result of processing the event at `tag`.
    pub fn event_processed(
        &mut self,
        state: String,
        emitted: Vec<EmittedEvent>,
        tag: CheckpointTag,
    ) -> Result<(), CheckpointError> {
        self.check_next("event_processed", &tag)?;

        self.last_tag = Some(tag);
        self.retained_state = Some(state);
        self.pending_emitted.extend(emitted);
        self.handled_since_checkpoint += 1;
        if self.is_write_pending() {
            self.handled_during_write += 1;
        }

        if self.handled_since_checkpoint >= self.threshold {
            self.request_checkpoint();
        }
        Ok(())
    }

    /// Write a checkpoint at `tag` now, with the currently retained state.
    pub fn checkpoint_suggested(&mut self, tag: CheckpointTag) -> Result<(), CheckpointError> {
        self.check_next("checkpoint_suggested", &tag)?;

        debug!(projection = %self.projection, tag = %tag, "checkpoint suggested");
        self.last_tag = Some(tag);
        self.request_checkpoint();
        Ok(())
    }

    /// Apply the outcome of a write issued by this manager.
    pub fn handle_write_completed(&mut self, completed: CheckpointWriteCompleted) -> WriteOutcome {
        let write = match self.in_flight.take() {
            Some(w) if w.request_id == completed.request_id => w,
            other => {
                self.in_flight = other;
                debug!(
                    projection = %self.projection,
                    request_id = completed.request_id,
                    "ignoring completion of a write that is not outstanding"
                );
                return WriteOutcome::Ignored;
            }
        };
        let tag = write.checkpoint.tag.clone();

        match completed.result {
            Ok(()) => {
                info!(projection = %self.projection, tag = %tag, "checkpoint written");
                self.last_checkpoint_tag = Some(tag.clone());
                self.checkpoints_written += 1;
                if self.checkpoint_requested && self.phase == Phase::Started {
                    self.checkpoint_requested = false;
                    self.begin_write();
                }
                WriteOutcome::Completed { tag }
            }
            Err(error) => {
                warn!(
                    projection = %self.projection,
                    tag = %tag,
                    attempts = write.attempts,
                    error = %error,
                    "checkpoint write failed"
                );
                self.write_failures += 1;
                let attempts = write.attempts;
                self.failed = Some(write);
                WriteOutcome::Failed { tag, attempts, error }
            }
        }
    }

    /// Re-issue the last failed write unchanged. Returns `false` if there is none.
    pub fn retry_failed_write(&mut self) -> Result<bool, CheckpointError> {
        self.require(&[Phase::Started], "retry_failed_write")?;
        let Some(mut write) = self.failed.take() else {
            return Ok(false);
        };

        write.attempts += 1;
        write.request_id = self.next_request_id();
        debug!(
            projection = %self.projection,
            tag = %write.checkpoint.tag,
            attempt = write.attempts,
            "retrying checkpoint write"
        );
        self.issue(write);
        Ok(true)
    }

    /// No new writes from now on. Never fails.
    pub fn stopping(&mut self) {
        if self.phase != Phase::Stopped {
            self.phase = Phase::Stopping;
        }
        self.checkpoint_requested = false;
    }

    /// Final transition. Never fails.
    pub fn stopped(&mut self) {
        self.phase = Phase::Stopped;
        self.checkpoint_requested = false;
        if let Some(write) = self.failed.take() {
            warn!(
                projection = %self.projection,
                tag = %write.checkpoint.tag,
                "abandoning failed checkpoint write on stop"
            );
        }
    }

    pub fn start_tag(&self) -> Option<&CheckpointTag> {
        self.start_tag.as_ref()
    }

    /// Most recently accepted tag (the start tag before any event).
    pub fn last_tag(&self) -> Option<&CheckpointTag> {
        self.last_tag.as_ref()
    }

    /// Tag of the last checkpoint known to be persisted.
    pub fn last_checkpoint_tag(&self) -> Option<&CheckpointTag> {
        self.last_checkpoint_tag.as_ref()
    }

    pub fn handled_since_checkpoint(&self) -> usize {
        self.handled_since_checkpoint
    }

    /// Events accepted since the outstanding (or failed) write was started.
    pub fn handled_during_write(&self) -> usize {
        self.handled_during_write
    }

    pub fn is_write_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// A write is outstanding or failed and awaiting a retry decision.
    pub fn is_write_pending(&self) -> bool {
        self.in_flight.is_some() || self.failed.is_some()
    }

    pub fn has_failed_write(&self) -> bool {
        self.failed.is_some()
    }

    pub fn checkpoints_written(&self) -> u64 {
        self.checkpoints_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    pub fn is_started(&self) -> bool {
        self.phase == Phase::Started
    }

    fn request_checkpoint(&mut self) {
        self.handled_since_checkpoint = 0;
        if self.is_write_pending() {
            debug!(projection = %self.projection, "checkpoint due while a write is pending; deferring");
            self.checkpoint_requested = true;
        } else {
            self.begin_write();
        }
    }

    fn begin_write(&mut self) {
        let Some(tag) = self.last_tag.clone() else {
            return;
        };
        let write = PendingWrite {
            request_id: self.next_request_id(),
            checkpoint: Checkpoint {
                tag,
                prior_tag: self.last_checkpoint_tag.clone(),
                state: self.retained_state.clone(),
            },
            emitted: std::mem::take(&mut self.pending_emitted),
            attempts: 1,
        };
        self.handled_during_write = 0;
        self.issue(write);
    }

    fn issue(&mut self, write: PendingWrite) {
        debug!(
            projection = %self.projection,
            tag = %write.checkpoint.tag,
            request_id = write.request_id,
            emitted = write.emitted.len(),
            "beginning checkpoint write"
        );
        self.writer.begin_write(CheckpointWriteRequest {
            request_id: write.request_id,
            projection: self.projection.clone(),
            checkpoint: write.checkpoint.clone(),
            emitted: write.emitted.clone(),
        });
        self.in_flight = Some(write);
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }

    fn require(&self, allowed: &[Phase], operation: &'static str) -> Result<(), CheckpointError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(self.misuse(operation))
        }
    }

    fn misuse(&self, operation: &'static str) -> CheckpointError {
        CheckpointError::LifecycleMisuse {
            operation,
            phase: self.phase.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordedWrites, RecordingWriter};
    use proptest::prelude::*;

    fn tag(seq: i64, prepare: i64) -> CheckpointTag {
        CheckpointTag::from_stream_position("stream", seq, prepare).unwrap()
    }

    /// Manager wired to a recording writer; completions are delivered by the test.
    struct Fixture {
        manager: CheckpointManager,
        writes: RecordedWrites,
        completed: Vec<CheckpointTag>,
        written: Vec<Checkpoint>,
    }

    impl Fixture {
        fn new(threshold: usize) -> Self {
            let (writer, writes) = RecordingWriter::new();
            Self {
                manager: CheckpointManager::new("projection", threshold, Box::new(writer)),
                writes,
                completed: Vec::new(),
                written: Vec::new(),
            }
        }

        /// Acknowledge every issued write (including ones issued by acknowledgements).
        fn all_writes_succeed(&mut self) {
            loop {
                let pending = self.writes.take();
                if pending.is_empty() {
                    break;
                }
                for request in pending {
                    self.written.push(request.checkpoint.clone());
                    let outcome = self.manager.handle_write_completed(CheckpointWriteCompleted {
                        request_id: request.request_id,
                        result: Ok(()),
                    });
                    if let WriteOutcome::Completed { tag } = outcome {
                        self.completed.push(tag);
                    }
                }
            }
        }

        fn fail_pending_writes(&mut self) -> Vec<WriteOutcome> {
            self.writes
                .take()
                .into_iter()
                .map(|request| {
                    self.manager.handle_write_completed(CheckpointWriteCompleted {
                        request_id: request.request_id,
                        result: Err(CheckpointStoreError::Write("disk full".into())),
                    })
                })
                .collect()
        }

        /// Start at (stream, 10, 1000) and process 11 and 12 with threshold 2.
        fn two_events_processed() -> Self {
            let mut f = Fixture::new(2);
            f.manager.state_loaded(None).unwrap();
            f.manager.start(tag(10, 1000)).unwrap();
            f.manager
                .event_processed(r#"{"state":"state1"}"#.into(), vec![], tag(11, 1100))
                .unwrap();
            f.all_writes_succeed();
            f.manager
                .event_processed(r#"{"state":"state2"}"#.into(), vec![], tag(12, 1200))
                .unwrap();
            f.all_writes_succeed();
            f
        }
    }

    #[test]
    fn completes_one_checkpoint_after_threshold_events() {
        let f = Fixture::two_events_processed();

        assert_eq!(f.completed, vec![tag(12, 1200)]);
        assert_eq!(f.written.len(), 1);
        assert_eq!(f.written[0].state.as_deref(), Some(r#"{"state":"state2"}"#));
        assert_eq!(f.written[0].prior_tag, None);
        assert_eq!(f.manager.last_checkpoint_tag(), Some(&tag(12, 1200)));
        assert_eq!(f.manager.handled_since_checkpoint(), 0);
    }

    #[test]
    fn accepts_event_processed_without_retriggering_checkpoint() {
        let mut f = Fixture::two_events_processed();

        f.manager
            .event_processed(r#"{"state":"state"}"#.into(), vec![], tag(13, 1300))
            .unwrap();
        f.all_writes_succeed();

        assert_eq!(f.completed.len(), 1);
        assert_eq!(f.manager.handled_since_checkpoint(), 1);
    }

    #[test]
    fn next_threshold_boundary_writes_chained_checkpoint() {
        let mut f = Fixture::two_events_processed();

        f.manager.event_processed("s3".into(), vec![], tag(13, 1300)).unwrap();
        f.manager.event_processed("s4".into(), vec![], tag(14, 1400)).unwrap();
        f.all_writes_succeed();

        assert_eq!(f.completed, vec![tag(12, 1200), tag(14, 1400)]);
        assert_eq!(f.written[1].prior_tag, Some(tag(12, 1200)));
        assert_eq!(f.written[1].state.as_deref(), Some("s4"));
    }

    #[test]
    fn event_processed_at_the_start_position_is_an_ordering_violation() {
        let mut f = Fixture::two_events_processed();

        let err = f
            .manager
            .event_processed(r#"{"state":"state"}"#.into(), vec![], tag(10, 1000))
            .unwrap_err();

        assert!(matches!(err, CheckpointError::OrderingViolation { .. }));
    }

    #[test]
    fn event_processed_at_start_tag_is_rejected_before_any_event() {
        let mut f = Fixture::new(2);
        f.manager.start(tag(10, 1000)).unwrap();

        let err = f.manager.event_processed("s".into(), vec![], tag(10, 1000)).unwrap_err();

        assert_eq!(
            err,
            CheckpointError::OrderingViolation {
                last: tag(10, 1000),
                found: tag(10, 1000),
            }
        );
    }

    #[test]
    fn accepts_checkpoint_suggested() {
        let mut f = Fixture::two_events_processed();

        f.manager.checkpoint_suggested(tag(13, 1300)).unwrap();
        f.all_writes_succeed();

        assert_eq!(f.completed, vec![tag(12, 1200), tag(13, 1300)]);
        assert_eq!(f.written[1].state.as_deref(), Some(r#"{"state":"state2"}"#));
    }

    #[test]
    fn checkpoint_suggested_at_the_start_position_is_an_ordering_violation() {
        let mut f = Fixture::two_events_processed();

        let err = f.manager.checkpoint_suggested(tag(10, 1000)).unwrap_err();

        assert!(matches!(err, CheckpointError::OrderingViolation { .. }));
    }

    #[test]
    fn accepts_stopping_and_stopped_in_any_phase() {
        let mut f = Fixture::two_events_processed();
        f.manager.stopping();
        f.manager.stopping();
        f.manager.stopped();
        f.manager.stopped();

        let mut fresh = Fixture::new(2);
        fresh.manager.stopped();
        fresh.manager.stopping();
    }

    #[test]
    fn operations_before_start_are_lifecycle_misuse() {
        let mut f = Fixture::new(2);

        assert!(matches!(
            f.manager.event_processed("s".into(), vec![], tag(1, 1)),
            Err(CheckpointError::LifecycleMisuse { operation: "event_processed", .. })
        ));
        assert!(matches!(
            f.manager.checkpoint_suggested(tag(1, 1)),
            Err(CheckpointError::LifecycleMisuse { .. })
        ));
    }

    #[test]
    fn start_twice_is_lifecycle_misuse() {
        let mut f = Fixture::new(2);
        f.manager.start(tag(10, 1000)).unwrap();

        assert!(matches!(
            f.manager.start(tag(11, 1100)),
            Err(CheckpointError::LifecycleMisuse { operation: "start", .. })
        ));
    }

    #[test]
    fn start_behind_persisted_checkpoint_is_rejected() {
        let mut f = Fixture::new(2);
        let persisted = Checkpoint {
            tag: tag(20, 2000),
            prior_tag: None,
            state: Some("s".into()),
        };
        f.manager.state_loaded(Some(&persisted)).unwrap();

        assert!(matches!(
            f.manager.start(tag(19, 1900)),
            Err(CheckpointError::OrderingViolation { .. })
        ));
        assert!(matches!(
            f.manager.start(CheckpointTag::from_position(3000, 2000)),
            Err(CheckpointError::TagMismatch { .. })
        ));
    }

    #[test]
    fn tags_of_another_stream_are_rejected() {
        let mut f = Fixture::new(2);
        f.manager.start(tag(10, 1000)).unwrap();
        let other = CheckpointTag::from_stream_position("other", 11, 1100).unwrap();

        assert!(matches!(
            f.manager.event_processed("s".into(), vec![], other),
            Err(CheckpointError::TagMismatch { .. })
        ));
    }

    #[test]
    fn suggestion_before_any_event_keeps_loaded_state() {
        let mut f = Fixture::new(10);
        let persisted = Checkpoint {
            tag: tag(20, 2000),
            prior_tag: Some(tag(10, 1000)),
            state: Some("loaded".into()),
        };
        f.manager.state_loaded(Some(&persisted)).unwrap();
        f.manager.start(tag(20, 2000)).unwrap();

        f.manager.checkpoint_suggested(tag(25, 2500)).unwrap();
        f.all_writes_succeed();

        assert_eq!(f.written[0].state.as_deref(), Some("loaded"));
        assert_eq!(f.written[0].prior_tag, Some(tag(20, 2000)));
    }

    #[test]
    fn only_one_write_is_outstanding_and_due_checkpoint_follows_completion() {
        let mut f = Fixture::new(1);
        f.manager.start(tag(0, 0)).unwrap();

        f.manager.event_processed("s1".into(), vec![], tag(1, 100)).unwrap();
        f.manager.event_processed("s2".into(), vec![], tag(2, 200)).unwrap();
        f.manager.event_processed("s3".into(), vec![], tag(3, 300)).unwrap();

        let first = f.writes.take();
        assert_eq!(first.len(), 1);
        assert_eq!(f.manager.handled_during_write(), 2);

        f.manager.handle_write_completed(CheckpointWriteCompleted {
            request_id: first[0].request_id,
            result: Ok(()),
        });

        let second = f.writes.take();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].checkpoint.tag, tag(3, 300));
        assert_eq!(second[0].checkpoint.state.as_deref(), Some("s3"));
        assert_eq!(second[0].checkpoint.prior_tag, Some(tag(1, 100)));
    }

    #[test]
    fn failed_write_is_retained_until_retried() {
        let mut f = Fixture::new(1);
        f.manager.start(tag(0, 0)).unwrap();
        let emitted = EmittedEvent::new("out", "Counted", "{}", tag(1, 100));
        f.manager
            .event_processed("s1".into(), vec![emitted.clone()], tag(1, 100))
            .unwrap();

        let outcomes = f.fail_pending_writes();
        assert_eq!(
            outcomes,
            vec![WriteOutcome::Failed {
                tag: tag(1, 100),
                attempts: 1,
                error: CheckpointStoreError::Write("disk full".into()),
            }]
        );
        assert!(f.manager.has_failed_write());
        assert_eq!(f.manager.last_checkpoint_tag(), None);

        // A checkpoint due meanwhile waits for the failed one.
        f.manager.event_processed("s2".into(), vec![], tag(2, 200)).unwrap();
        assert!(f.writes.take().is_empty());

        assert!(f.manager.retry_failed_write().unwrap());
        let retried = f.writes.all();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].checkpoint.tag, tag(1, 100));
        assert_eq!(retried[0].emitted, vec![emitted]);

        f.all_writes_succeed();
        assert_eq!(f.completed, vec![tag(1, 100), tag(2, 200)]);
        assert_eq!(f.manager.write_failures(), 1);
        assert_eq!(f.manager.checkpoints_written(), 2);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut f = Fixture::new(1);
        f.manager.start(tag(0, 0)).unwrap();
        f.manager.event_processed("s1".into(), vec![], tag(1, 100)).unwrap();

        let outcome = f.manager.handle_write_completed(CheckpointWriteCompleted {
            request_id: 999,
            result: Ok(()),
        });

        assert_eq!(outcome, WriteOutcome::Ignored);
        assert!(f.manager.is_write_in_flight());
    }

    #[test]
    fn no_new_write_after_stopping_but_in_flight_write_drains() {
        let mut f = Fixture::new(1);
        f.manager.start(tag(0, 0)).unwrap();
        f.manager.event_processed("s1".into(), vec![], tag(1, 100)).unwrap();
        f.manager.event_processed("s2".into(), vec![], tag(2, 200)).unwrap();

        f.manager.stopping();
        f.all_writes_succeed();

        assert_eq!(f.completed, vec![tag(1, 100)]);
        assert!(!f.manager.is_write_pending());
        assert!(matches!(
            f.manager.event_processed("s3".into(), vec![], tag(3, 300)),
            Err(CheckpointError::LifecycleMisuse { .. })
        ));
    }

    #[test]
    fn emitted_events_travel_with_the_next_checkpoint() {
        let mut f = Fixture::new(2);
        f.manager.start(tag(0, 0)).unwrap();
        let e1 = EmittedEvent::new("out", "A", "{}", tag(1, 100));
        let e2 = EmittedEvent::new("out", "B", "{}", tag(2, 200));

        f.manager.event_processed("s1".into(), vec![e1.clone()], tag(1, 100)).unwrap();
        f.manager.event_processed("s2".into(), vec![e2.clone()], tag(2, 200)).unwrap();

        let writes = f.writes.take();
        assert_eq!(writes[0].emitted, vec![e1, e2]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: with writes acknowledged immediately, exactly `events / threshold`
        /// checkpoints complete, each at a threshold boundary.
        #[test]
        fn checkpoints_every_threshold_events(threshold in 1usize..8, events in 0usize..40) {
            let mut f = Fixture::new(threshold);
            f.manager.start(tag(0, 0)).unwrap();

            for i in 1..=events as i64 {
                f.manager.event_processed(format!("s{i}"), vec![], tag(i, i * 100)).unwrap();
                f.all_writes_succeed();
            }

            prop_assert_eq!(f.completed.len(), events / threshold);
            for (n, completed) in f.completed.iter().enumerate() {
                let boundary = ((n + 1) * threshold) as i64;
                prop_assert_eq!(completed, &tag(boundary, boundary * 100));
            }
        }
    }
}
