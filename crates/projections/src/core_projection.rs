//! The per-projection processing state machine.
//!
//! ```text
//! Initial -> LoadingState -> Subscribing -> Processing <-> CheckpointingSuspended
//!                                               |                  |
//!                                               +----> Stopping -> Stopped
//!
//! Faulted is reachable from every non-terminal status.
//! ```
//!
//! A projection never propagates a failure of its state handler or of its
//! checkpoint writes: both are converted into the `Faulted` status and a
//! single `Faulted` report. Errors returned by the methods here are caller
//! errors only (out-of-order tags, operations in the wrong status).

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use eventide_core::{CheckpointTag, ProjectionId};
use eventide_events::{ProjectionReport, ProjectionStatistics, ProjectionStatus, Publisher, ReportKind};

use crate::checkpoint_manager::{CheckpointManager, WriteOutcome};
use crate::config::ProjectionConfig;
use crate::error::{CheckpointError, ProjectionError};
use crate::message::{CommittedEventReceived, ProjectionMessage};
use crate::state_handler::StateHandler;
use crate::store::{CheckpointStore, CheckpointWriteCompleted, CheckpointWriter};
use crate::subscription::SubscriptionSource;

/// Collaborators injected into a projection at construction.
pub struct ProjectionDependencies {
    pub store: Arc<dyn CheckpointStore>,
    pub writer: Box<dyn CheckpointWriter>,
    pub subscription: Box<dyn SubscriptionSource>,
    pub reports: Arc<dyn Publisher<ProjectionReport>>,
}

/// Work received while intake is suspended.
#[derive(Debug)]
enum Backlogged {
    Event(CommittedEventReceived),
    Suggestion(CheckpointTag),
}

impl Backlogged {
    fn tag(&self) -> &CheckpointTag {
        match self {
            Backlogged::Event(e) => &e.tag,
            Backlogged::Suggestion(tag) => tag,
        }
    }
}

pub struct CoreProjection<H> {
    id: ProjectionId,
    config: ProjectionConfig,
    handler: H,
    store: Arc<dyn CheckpointStore>,
    subscription: Box<dyn SubscriptionSource>,
    reports: Arc<dyn Publisher<ProjectionReport>>,
    checkpoints: CheckpointManager,

    status: ProjectionStatus,
    zero_tag: CheckpointTag,
    loaded_from: Option<CheckpointTag>,
    state: Option<String>,
    last_processed_tag: Option<CheckpointTag>,
    backlog: VecDeque<Backlogged>,
    events_processed: u64,
    fault_reason: Option<String>,
}

impl<H: StateHandler> CoreProjection<H> {
    pub fn new(
        id: ProjectionId,
        config: ProjectionConfig,
        handler: H,
        deps: ProjectionDependencies,
    ) -> Result<Self, ProjectionError> {
        config.validate()?;
        let zero_tag = config.source.zero_tag()?;
        let checkpoints = CheckpointManager::new(
            config.name.clone(),
            config.checkpoint_handled_threshold,
            deps.writer,
        );

        Ok(Self {
            id,
            config,
            handler,
            store: deps.store,
            subscription: deps.subscription,
            reports: deps.reports,
            checkpoints,
            status: ProjectionStatus::Initial,
            zero_tag,
            loaded_from: None,
            state: None,
            last_processed_tag: None,
            backlog: VecDeque::new(),
            events_processed: 0,
            fault_reason: None,
        })
    }

    pub fn id(&self) -> ProjectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn status(&self) -> ProjectionStatus {
        self.status
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn fault_reason(&self) -> Option<&str> {
        self.fault_reason.as_deref()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Most recently accepted tag, or the tag the projection was loaded from.
    pub fn position(&self) -> Option<&CheckpointTag> {
        self.checkpoints.last_tag().or(self.loaded_from.as_ref())
    }

    pub fn statistics(&self) -> ProjectionStatistics {
        ProjectionStatistics {
            status: self.status,
            events_processed: self.events_processed,
            buffered_events: self.backlog.len(),
            last_processed_tag: self.last_processed_tag.clone(),
            last_checkpoint_tag: self.checkpoints.last_checkpoint_tag().cloned(),
            checkpoints_written: self.checkpoints.checkpoints_written(),
            checkpoint_write_failures: self.checkpoints.write_failures(),
            write_pending: self.checkpoints.is_write_pending(),
        }
    }

    /// Dispatch one inbox message.
    pub fn handle_message(&mut self, message: ProjectionMessage) -> Result<(), ProjectionError> {
        debug!(projection = %self.config.name, message = message.name(), status = %self.status, "handling message");
        match message {
            ProjectionMessage::SubscriptionStarted { from } => self.start(from),
            ProjectionMessage::CommittedEventReceived(received) => self.handle(received),
            ProjectionMessage::CheckpointSuggested { tag } => self.checkpoint_suggested(tag),
            ProjectionMessage::CheckpointWritten(completed) => self.handle_checkpoint_written(completed),
            ProjectionMessage::GetState => {
                self.publish(ReportKind::State {
                    tag: self.position().cloned(),
                    state: self.state.clone(),
                });
                Ok(())
            }
            ProjectionMessage::GetStatistics => {
                self.publish(ReportKind::Statistics(self.statistics()));
                Ok(())
            }
            ProjectionMessage::Stop => {
                self.stopping();
                Ok(())
            }
        }
    }

    /// Load the last checkpoint, rehydrate state and subscribe after its tag.
    ///
    /// Store and handler failures fault the projection; it then never subscribes.
    pub fn begin_load_state(&mut self) -> Result<(), ProjectionError> {
        if self.status != ProjectionStatus::Initial {
            return Err(self.misuse("begin_load_state"));
        }
        self.set_status(ProjectionStatus::LoadingState);

        let checkpoint = match self.store.read_last(&self.config.name) {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                self.fault(format!("failed to read last checkpoint: {err}"));
                return Ok(());
            }
        };

        let state = match checkpoint.as_ref().and_then(|c| c.state.as_deref()) {
            Some(persisted) => match self.handler.load_state(persisted) {
                Ok(state) => state,
                Err(err) => {
                    self.fault(format!("failed to load state: {err:#}"));
                    return Ok(());
                }
            },
            None => self.handler.initial_state(),
        };

        let from = match &checkpoint {
            Some(c) => c.tag.clone(),
            None => self.zero_tag.clone(),
        };
        if !from.is_comparable_with(&self.zero_tag) {
            self.fault(format!(
                "persisted checkpoint tag {from} does not match the projection source"
            ));
            return Ok(());
        }

        self.checkpoints.state_loaded(checkpoint.as_ref())?;
        info!(projection = %self.config.name, from = %from, restored = checkpoint.is_some(), "state loaded");
        self.state = Some(state);
        self.loaded_from = Some(from.clone());

        self.set_status(ProjectionStatus::Subscribing);
        if let Err(err) = self.subscription.subscribe_from(&from) {
            self.fault(err.to_string());
        }
        Ok(())
    }

    /// The subscription is live from `tag`; begin processing.
    pub fn start(&mut self, tag: CheckpointTag) -> Result<(), ProjectionError> {
        match self.status {
            ProjectionStatus::Subscribing => {}
            ProjectionStatus::Stopping | ProjectionStatus::Stopped | ProjectionStatus::Faulted => {
                debug!(projection = %self.config.name, status = %self.status, "ignoring start");
                return Ok(());
            }
            _ => return Err(self.misuse("start")),
        }

        self.checkpoints.start(tag.clone())?;
        self.set_status(ProjectionStatus::Processing);
        info!(projection = %self.config.name, tag = %tag, "projection started");
        self.publish(ReportKind::Started);
        Ok(())
    }

    /// Process one delivered event.
    pub fn handle(&mut self, received: CommittedEventReceived) -> Result<(), ProjectionError> {
        match self.status {
            ProjectionStatus::Processing => self.process(received),
            ProjectionStatus::CheckpointingSuspended => {
                self.check_backlog_order(&received.tag)?;
                self.backlog.push_back(Backlogged::Event(received));
                Ok(())
            }
            ProjectionStatus::Stopping | ProjectionStatus::Stopped | ProjectionStatus::Faulted => {
                debug!(projection = %self.config.name, tag = %received.tag, status = %self.status, "dropping event");
                Ok(())
            }
            _ => Err(self.misuse("handle")),
        }
    }

    /// Write a checkpoint at `tag` now.
    pub fn checkpoint_suggested(&mut self, tag: CheckpointTag) -> Result<(), ProjectionError> {
        match self.status {
            ProjectionStatus::Processing => self.suggest(tag),
            ProjectionStatus::CheckpointingSuspended => {
                self.check_backlog_order(&tag)?;
                self.backlog.push_back(Backlogged::Suggestion(tag));
                Ok(())
            }
            ProjectionStatus::Stopping | ProjectionStatus::Stopped | ProjectionStatus::Faulted => Ok(()),
            _ => Err(self.misuse("checkpoint_suggested")),
        }
    }

    /// Outcome of a checkpoint write started by this projection's manager.
    pub fn handle_checkpoint_written(&mut self, completed: CheckpointWriteCompleted) -> Result<(), ProjectionError> {
        match self.checkpoints.handle_write_completed(completed) {
            WriteOutcome::Completed { tag } => {
                self.publish(ReportKind::CheckpointCompleted { tag });
            }
            WriteOutcome::Failed { tag, attempts, error } => {
                if self.status == ProjectionStatus::Stopping {
                    warn!(projection = %self.config.name, tag = %tag, "abandoning failed checkpoint write while stopping");
                } else if self.status.is_terminal() {
                    debug!(projection = %self.config.name, tag = %tag, "ignoring failed checkpoint write");
                } else if attempts < self.config.max_checkpoint_write_attempts {
                    self.checkpoints.retry_failed_write()?;
                } else {
                    self.fault(format!(
                        "checkpoint write at {tag} failed after {attempts} attempts: {error}"
                    ));
                }
            }
            WriteOutcome::Ignored => {}
        }

        if self.status == ProjectionStatus::CheckpointingSuspended && !self.backpressure_needed() {
            self.resume_intake();
        }
        if self.status == ProjectionStatus::Stopping && !self.checkpoints.is_write_in_flight() {
            self.finish_stopping();
        }
        Ok(())
    }

    /// Graceful stop. Never fails; repeated calls are no-ops.
    ///
    /// An in-flight checkpoint write is allowed to complete before `Stopped`.
    pub fn stopping(&mut self) {
        match self.status {
            ProjectionStatus::Stopping | ProjectionStatus::Stopped | ProjectionStatus::Faulted => {
                debug!(projection = %self.config.name, status = %self.status, "stop already requested");
                return;
            }
            ProjectionStatus::Initial | ProjectionStatus::LoadingState => {
                self.checkpoints.stopping();
                self.finish_stopping();
                return;
            }
            ProjectionStatus::Subscribing
            | ProjectionStatus::Processing
            | ProjectionStatus::CheckpointingSuspended => {}
        }

        info!(projection = %self.config.name, "projection stopping");
        self.subscription.unsubscribe();
        self.backlog.clear();
        self.checkpoints.stopping();
        self.set_status(ProjectionStatus::Stopping);

        if !self.checkpoints.is_write_in_flight() {
            self.finish_stopping();
        }
    }

    /// Immediate stop, abandoning any outstanding write. Never fails.
    pub fn stopped(&mut self) {
        match self.status {
            ProjectionStatus::Stopped | ProjectionStatus::Faulted => {}
            ProjectionStatus::Initial | ProjectionStatus::LoadingState | ProjectionStatus::Stopping => {
                self.finish_stopping()
            }
            ProjectionStatus::Subscribing
            | ProjectionStatus::Processing
            | ProjectionStatus::CheckpointingSuspended => {
                self.subscription.unsubscribe();
                self.backlog.clear();
                self.finish_stopping();
            }
        }
    }

    fn process(&mut self, received: CommittedEventReceived) -> Result<(), ProjectionError> {
        self.checkpoints
            .check_next("handle", &received.tag)
            .map_err(ordering_error)?;

        let current = self.state.as_deref().unwrap_or_default();
        let output = match self.handler.process(current, &received) {
            Ok(output) => output,
            Err(err) => {
                self.fault(format!("failed to process event at {}: {err:#}", received.tag));
                return Ok(());
            }
        };

        if let Some(new_state) = output.new_state {
            self.state = Some(new_state);
        }
        let state = self.state.clone().unwrap_or_default();
        self.checkpoints
            .event_processed(state, output.emitted_events, received.tag.clone())?;
        self.last_processed_tag = Some(received.tag);
        self.events_processed += 1;

        if self.status == ProjectionStatus::Processing && self.backpressure_needed() {
            info!(
                projection = %self.config.name,
                pending = self.checkpoints.handled_during_write(),
                "checkpoint write outstanding; suspending intake"
            );
            self.subscription.pause();
            self.set_status(ProjectionStatus::CheckpointingSuspended);
        }
        Ok(())
    }

    fn suggest(&mut self, tag: CheckpointTag) -> Result<(), ProjectionError> {
        self.checkpoints.checkpoint_suggested(tag).map_err(ordering_error)
    }

    fn backpressure_needed(&self) -> bool {
        self.checkpoints.is_write_pending()
            && self.checkpoints.handled_during_write() >= self.config.pending_events_threshold
    }

    fn check_backlog_order(&self, tag: &CheckpointTag) -> Result<(), ProjectionError> {
        match self.backlog.back() {
            Some(last) if !last.tag().is_comparable_with(tag) => {
                Err(ProjectionError::Checkpoint(CheckpointError::TagMismatch {
                    expected: last.tag().clone(),
                    found: tag.clone(),
                }))
            }
            Some(last) if tag <= last.tag() => Err(ProjectionError::OrderingViolation {
                last: last.tag().clone(),
                found: tag.clone(),
            }),
            Some(_) => Ok(()),
            None => self
                .checkpoints
                .check_next("handle", tag)
                .map_err(ordering_error),
        }
    }

    fn resume_intake(&mut self) {
        info!(projection = %self.config.name, buffered = self.backlog.len(), "resuming intake");
        self.set_status(ProjectionStatus::Processing);

        while self.status == ProjectionStatus::Processing {
            let Some(item) = self.backlog.pop_front() else {
                break;
            };
            let result = match item {
                Backlogged::Event(received) => self.process(received),
                Backlogged::Suggestion(tag) => self.suggest(tag),
            };
            if let Err(err) = result {
                warn!(projection = %self.config.name, error = %err, "dropping buffered message");
            }
        }

        if self.status == ProjectionStatus::Processing {
            self.subscription.resume();
        }
    }

    fn finish_stopping(&mut self) {
        self.checkpoints.stopped();
        self.backlog.clear();
        self.set_status(ProjectionStatus::Stopped);
        info!(projection = %self.config.name, "projection stopped");
        self.publish(ReportKind::Stopped);
    }

    fn fault(&mut self, reason: String) {
        if self.status.is_terminal() {
            return;
        }
        error!(projection = %self.config.name, status = %self.status, reason = %reason, "projection faulted");

        if matches!(
            self.status,
            ProjectionStatus::Subscribing
                | ProjectionStatus::Processing
                | ProjectionStatus::CheckpointingSuspended
        ) {
            self.subscription.unsubscribe();
        }
        self.backlog.clear();
        self.checkpoints.stopping();
        self.fault_reason = Some(reason.clone());
        self.set_status(ProjectionStatus::Faulted);
        self.publish(ReportKind::Faulted { reason });
    }

    fn set_status(&mut self, status: ProjectionStatus) {
        debug!(projection = %self.config.name, from = %self.status, to = %status, "status changed");
        self.status = status;
    }

    fn publish(&self, kind: ReportKind) {
        let report = ProjectionReport::new(self.id, self.config.name.as_str(), kind);
        if let Err(err) = self.reports.publish(report) {
            warn!(projection = %self.config.name, error = %err, "failed to publish projection report");
        }
    }

    fn misuse(&self, operation: &'static str) -> ProjectionError {
        ProjectionError::LifecycleMisuse {
            operation,
            status: self.status,
        }
    }
}

fn ordering_error(err: CheckpointError) -> ProjectionError {
    match err {
        CheckpointError::OrderingViolation { last, found } => ProjectionError::OrderingViolation { last, found },
        other => ProjectionError::Checkpoint(other),
    }
}
