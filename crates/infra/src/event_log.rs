//! In-memory committed-event log with live subscription feeds.
//!
//! Every append is one transaction: its records share a commit position and
//! get consecutive prepare positions, so `(commit, prepare)` strictly
//! increases across the whole log. Streams number their events from 0.
//!
//! Intended for tests/dev. Not optimized for performance.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use eventide_core::{CheckpointTag, LogPosition};
use eventide_events::{CommittedEvent, NewEvent, PublishError, Publisher};
use eventide_projections::{
    CommittedEventReceived, ProjectionMessage, SourceDefinition, SubscriptionError, SubscriptionSource,
};

use crate::workers::SubscriptionProvider;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventLogError {
    #[error("stream name must not be empty")]
    EmptyStreamName,

    #[error("event log lock poisoned")]
    Poisoned,
}

/// One subscriber's delivery cursor.
struct Feed {
    source: SourceDefinition,
    inbox: Arc<dyn Publisher<ProjectionMessage>>,
    last_delivered: CheckpointTag,
    paused: bool,
}

impl Feed {
    /// Forward one live event if it is for this feed.
    fn offer(&mut self, event: &CommittedEvent) -> Result<(), PublishError> {
        if !self.source.matches(event) {
            return Ok(());
        }
        let tag = match self.source.tag_for(event) {
            Ok(tag) => tag,
            Err(err) => {
                warn!(stream = event.stream_id(), error = %err, "skipping event without a tag");
                return Ok(());
            }
        };
        if tag <= self.last_delivered {
            return Ok(());
        }
        self.deliver(tag, event)
    }

    /// Deliver everything after the cursor, then suggest a checkpoint if the
    /// read ended on events this feed filtered out.
    fn catch_up(&mut self, records: &[CommittedEvent]) -> Result<(), PublishError> {
        let mut last_seen: Option<CheckpointTag> = None;
        for event in records {
            if !self.source.reads_stream(event.stream_id()) {
                continue;
            }
            let Ok(tag) = self.source.tag_for(event) else {
                continue;
            };
            if tag <= self.last_delivered {
                continue;
            }
            last_seen = Some(tag.clone());
            if self.source.matches(event) {
                self.deliver(tag, event)?;
            }
        }

        match last_seen {
            Some(seen) if seen > self.last_delivered => {
                self.inbox
                    .publish(ProjectionMessage::CheckpointSuggested { tag: seen.clone() })?;
                self.last_delivered = seen;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn deliver(&mut self, tag: CheckpointTag, event: &CommittedEvent) -> Result<(), PublishError> {
        self.inbox
            .publish(ProjectionMessage::CommittedEventReceived(CommittedEventReceived {
                tag: tag.clone(),
                event: event.clone(),
            }))?;
        self.last_delivered = tag;
        Ok(())
    }
}

#[derive(Default)]
struct LogInner {
    records: Vec<CommittedEvent>,
    stream_heads: HashMap<String, i64>,
    last_position: i64,
    feeds: HashMap<u64, Feed>,
    next_feed: u64,
}

impl LogInner {
    fn forward(&mut self, committed: &[CommittedEvent]) {
        let mut disconnected = Vec::new();
        for (id, feed) in self.feeds.iter_mut() {
            if feed.paused {
                continue;
            }
            if committed.iter().try_for_each(|e| feed.offer(e)).is_err() {
                disconnected.push(*id);
            }
        }
        for id in disconnected {
            debug!(feed = id, "dropping disconnected feed");
            self.feeds.remove(&id);
        }
    }
}

/// Append-only log of committed events. Clones share the same log.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    inner: Arc<RwLock<LogInner>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, stream_id: &str, events: Vec<NewEvent>) -> Result<Vec<CommittedEvent>, EventLogError> {
        self.append_transaction(events.into_iter().map(|e| (stream_id.to_string(), e)).collect())
    }

    /// Append records to any number of streams atomically.
    pub fn append_transaction(
        &self,
        records: Vec<(String, NewEvent)>,
    ) -> Result<Vec<CommittedEvent>, EventLogError> {
        if records.is_empty() {
            return Ok(vec![]);
        }
        if records.iter().any(|(stream, _)| stream.is_empty()) {
            return Err(EventLogError::EmptyStreamName);
        }

        let mut inner = self.write()?;
        let first_prepare = inner.last_position + 1;
        let commit = first_prepare + records.len() as i64;
        let now = Utc::now();

        let mut committed = Vec::with_capacity(records.len());
        for (offset, (stream, event)) in records.into_iter().enumerate() {
            let sequence = inner.stream_heads.get(&stream).map_or(0, |head| head + 1);
            inner.stream_heads.insert(stream.clone(), sequence);
            let position = LogPosition::new(commit, first_prepare + offset as i64);
            committed.push(CommittedEvent::new(stream, sequence, position, event, now));
        }
        inner.records.extend(committed.iter().cloned());
        inner.last_position = commit;
        inner.forward(&committed);

        Ok(committed)
    }

    pub fn read_stream(&self, stream_id: &str) -> Result<Vec<CommittedEvent>, EventLogError> {
        let inner = self.inner.read().map_err(|_| EventLogError::Poisoned)?;
        Ok(inner
            .records
            .iter()
            .filter(|e| e.stream_id() == stream_id)
            .cloned()
            .collect())
    }

    pub fn last_in_stream(&self, stream_id: &str) -> Result<Option<CommittedEvent>, EventLogError> {
        let inner = self.inner.read().map_err(|_| EventLogError::Poisoned)?;
        Ok(inner.records.iter().rev().find(|e| e.stream_id() == stream_id).cloned())
    }

    pub fn read_all(&self) -> Result<Vec<CommittedEvent>, EventLogError> {
        let inner = self.inner.read().map_err(|_| EventLogError::Poisoned)?;
        Ok(inner.records.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A subscription source over this log, delivering into `inbox`.
    pub fn subscription(
        &self,
        source: SourceDefinition,
        inbox: Arc<dyn Publisher<ProjectionMessage>>,
    ) -> LogSubscription {
        LogSubscription {
            log: self.clone(),
            source,
            inbox,
            feed: None,
        }
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LogInner>, EventLogError> {
        self.inner.write().map_err(|_| EventLogError::Poisoned)
    }
}

impl SubscriptionProvider for InMemoryEventLog {
    fn open_subscription(
        &self,
        source: &SourceDefinition,
        inbox: Arc<dyn Publisher<ProjectionMessage>>,
    ) -> Box<dyn SubscriptionSource> {
        Box::new(self.subscription(source.clone(), inbox))
    }
}

/// [`SubscriptionSource`] reading an [`InMemoryEventLog`].
///
/// `subscribe_from` confirms with `SubscriptionStarted`, replays matching
/// events after the tag, and then forwards live appends until paused or
/// unsubscribed.
pub struct LogSubscription {
    log: InMemoryEventLog,
    source: SourceDefinition,
    inbox: Arc<dyn Publisher<ProjectionMessage>>,
    feed: Option<u64>,
}

impl LogSubscription {
    fn with_feed(&mut self, operation: &str, f: impl FnOnce(&mut LogInner, u64)) {
        let Some(id) = self.feed else {
            debug!(operation, "no active feed");
            return;
        };
        match self.log.write() {
            Ok(mut inner) => f(&mut inner, id),
            Err(err) => warn!(operation, error = %err, "subscription feed unavailable"),
        }
    }
}

impl SubscriptionSource for LogSubscription {
    fn subscribe_from(&mut self, from: &CheckpointTag) -> Result<(), SubscriptionError> {
        self.unsubscribe();

        let zero = self
            .source
            .zero_tag()
            .map_err(|e| SubscriptionError(e.to_string()))?;
        if !from.is_comparable_with(&zero) {
            return Err(SubscriptionError(format!("cannot read this source from {from}")));
        }

        let mut inner = self.log.write().map_err(|e| SubscriptionError(e.to_string()))?;
        let disconnected = |_| SubscriptionError("projection inbox disconnected".into());
        self.inbox
            .publish(ProjectionMessage::SubscriptionStarted { from: from.clone() })
            .map_err(disconnected)?;

        let mut feed = Feed {
            source: self.source.clone(),
            inbox: Arc::clone(&self.inbox),
            last_delivered: from.clone(),
            paused: false,
        };
        feed.catch_up(&inner.records).map_err(disconnected)?;

        let id = inner.next_feed;
        inner.next_feed += 1;
        debug!(feed = id, from = %from, caught_up_to = %feed.last_delivered, "subscription live");
        inner.feeds.insert(id, feed);
        self.feed = Some(id);
        Ok(())
    }

    fn pause(&mut self) {
        self.with_feed("pause", |inner, id| {
            if let Some(feed) = inner.feeds.get_mut(&id) {
                feed.paused = true;
            }
        });
    }

    fn resume(&mut self) {
        self.with_feed("resume", |inner, id| {
            let LogInner { records, feeds, .. } = inner;
            let Some(feed) = feeds.get_mut(&id) else {
                return;
            };
            feed.paused = false;
            if feed.catch_up(records).is_err() {
                feeds.remove(&id);
            }
        });
    }

    fn unsubscribe(&mut self) {
        self.with_feed("unsubscribe", |inner, id| {
            inner.feeds.remove(&id);
        });
        self.feed = None;
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if self.feed.is_some() {
            self.unsubscribe();
        }
    }
}
