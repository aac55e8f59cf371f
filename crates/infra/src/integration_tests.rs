//! Integration tests for the full projection pipeline.
//!
//! Tests: EventLog → Subscription → Worker → CoreProjection → CheckpointStore → Reports
//!
//! Verifies:
//! - Events are processed in order and checkpointed at the configured threshold
//! - A restarted projection resumes from its last checkpoint without replays
//! - A faulting projection does not disturb its siblings on the same worker
//! - Stopping is graceful and idempotent

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use eventide_events::{
        EmittedEvent, NewEvent, ProjectionReport, ProjectionStatus, ReportKind, Subscription,
    };
    use eventide_projections::{
        CheckpointStore, CommittedEventReceived, FnStateHandler, ProcessOutput, ProjectionConfig,
        ProjectionMessage, SourceDefinition, StateHandler,
    };

    use crate::aggregator::ReportAggregator;
    use crate::checkpoint_store::InMemoryCheckpointStore;
    use crate::config::ProjectionsConfig;
    use crate::event_log::InMemoryEventLog;
    use crate::workers::ProjectionWorkerPool;

    struct Host {
        pool: ProjectionWorkerPool,
        aggregator: ReportAggregator,
        reports: Subscription<ProjectionReport>,
    }

    impl Host {
        fn start(log: &InMemoryEventLog, store: &InMemoryCheckpointStore, workers: usize) -> Self {
            eventide_observability::init_for_tests();
            let aggregator = ReportAggregator::spawn();
            let reports = aggregator.subscribe();
            let pool = ProjectionWorkerPool::spawn(
                workers,
                Arc::new(store.clone()),
                Arc::new(log.clone()),
                aggregator.reporter(),
            );
            Self {
                pool,
                aggregator,
                reports,
            }
        }

        /// Block until a report matching `pred` arrives.
        fn wait_for(&self, mut pred: impl FnMut(&ProjectionReport) -> bool) -> ProjectionReport {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.reports.recv_timeout(remaining) {
                    Ok(report) if pred(&report) => return report,
                    Ok(_) => continue,
                    Err(err) => panic!("no matching report in time: {err}"),
                }
            }
        }

        /// Shut everything down and return the reports not yet consumed.
        fn finish(self) -> Vec<ProjectionReport> {
            self.pool.shutdown();
            self.aggregator.shutdown();
            self.reports.drain()
        }
    }

    fn config(name: &str, threshold: usize) -> ProjectionConfig {
        ProjectionsConfig::default()
            .with_checkpoint_handled_threshold(threshold)
            .projection(name, SourceDefinition::stream("orders"))
    }

    fn counter() -> Box<dyn StateHandler> {
        Box::new(FnStateHandler::new("0", |state: &str, _: &CommittedEventReceived| {
            let n: u64 = state.parse()?;
            Ok(ProcessOutput::state((n + 1).to_string()))
        }))
    }

    fn place_orders(log: &InMemoryEventLog, n: usize) {
        for i in 0..n {
            log.append("orders", vec![NewEvent::json("OrderPlaced", format!(r#"{{"n":{i}}}"#))])
                .unwrap();
        }
    }

    fn checkpoint_at(seq: i64) -> impl FnMut(&ProjectionReport) -> bool {
        move |r| matches!(&r.kind, ReportKind::CheckpointCompleted { tag } if tag.sequence() == Some(seq))
    }

    #[test]
    fn events_flow_from_log_to_checkpoint_store() {
        let log = InMemoryEventLog::new();
        let store = InMemoryCheckpointStore::new(log.clone());
        let host = Host::start(&log, &store, 2);

        let id = host.pool.create(config("counter", 2), counter()).unwrap();
        place_orders(&log, 4);

        host.wait_for(checkpoint_at(3));
        let last = store.read_last("counter").unwrap().unwrap();
        assert_eq!(last.tag.sequence(), Some(3));
        assert_eq!(last.state.as_deref(), Some("4"));

        let history = store.history("counter").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].prior_tag, Some(history[0].tag.clone()));

        let view = host.aggregator.view(id).unwrap();
        assert_eq!(view.status, ProjectionStatus::Processing);
        assert_eq!(view.last_checkpoint_tag, Some(last.tag));

        host.finish();
    }

    #[test]
    fn restart_resumes_after_the_last_checkpoint() {
        let log = InMemoryEventLog::new();
        let store = InMemoryCheckpointStore::new(log.clone());

        let first = Host::start(&log, &store, 1);
        first.pool.create(config("counter", 2), counter()).unwrap();
        place_orders(&log, 4);
        first.wait_for(checkpoint_at(3));
        first.finish();

        let second = Host::start(&log, &store, 1);
        let id = second.pool.create(config("counter", 2), counter()).unwrap();
        second.wait_for(|r| r.projection_id == id && r.kind == ReportKind::Started);

        place_orders(&log, 1);
        second.pool.request_state(id).unwrap();

        // Restored "4" plus exactly one new event; nothing before seq 3 is replayed.
        let report = second.wait_for(|r| matches!(r.kind, ReportKind::State { .. }));
        let ReportKind::State { tag, state } = report.kind else {
            unreachable!();
        };
        assert_eq!(state.as_deref(), Some("5"));
        assert_eq!(tag.and_then(|t| t.sequence()), Some(4));

        second.finish();
    }

    #[test]
    fn every_restart_from_the_same_checkpoint_sees_the_same_events() {
        let log = InMemoryEventLog::new();
        let store = InMemoryCheckpointStore::new(log.clone());

        let first = Host::start(&log, &store, 1);
        first.pool.create(config("counter", 4), counter()).unwrap();
        place_orders(&log, 6);
        first.wait_for(checkpoint_at(3));
        first.finish();

        // Below the threshold on replay, so no restart moves the checkpoint.
        let mut runs = Vec::new();
        for _ in 0..2 {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let recorder = Arc::clone(&seen);
            let handler = FnStateHandler::new("0", move |state: &str, received: &CommittedEventReceived| {
                recorder.lock().unwrap().push(received.tag.clone());
                let n: u64 = state.parse()?;
                Ok(ProcessOutput::state((n + 1).to_string()))
            });

            let host = Host::start(&log, &store, 1);
            let id = host.pool.create(config("counter", 4), Box::new(handler)).unwrap();
            host.wait_for(|r| r.projection_id == id && r.kind == ReportKind::Started);
            host.pool.request_state(id).unwrap();
            host.wait_for(|r| matches!(r.kind, ReportKind::State { .. }));
            host.finish();

            assert_eq!(store.read_last("counter").unwrap().unwrap().tag.sequence(), Some(3));
            runs.push(seen.lock().unwrap().clone());
        }

        let sequences: Vec<_> = runs[0].iter().map(|t| t.sequence()).collect();
        assert_eq!(sequences, vec![Some(4), Some(5)]);
        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn a_faulting_projection_leaves_its_siblings_running() {
        let log = InMemoryEventLog::new();
        let store = InMemoryCheckpointStore::new(log.clone());
        // One worker: both projections share a thread.
        let host = Host::start(&log, &store, 1);

        let strict = FnStateHandler::new("", |_: &str, received: &CommittedEventReceived| {
            if received.event.event_type() == "OrderRejected" {
                anyhow::bail!("cannot handle rejected orders");
            }
            Ok(ProcessOutput::unchanged())
        });
        let strict = host.pool.create(config("strict", 1), Box::new(strict)).unwrap();
        let tolerant = host.pool.create(config("tolerant", 1), counter()).unwrap();

        log.append("orders", vec![NewEvent::json("OrderPlaced", "{}")]).unwrap();
        log.append("orders", vec![NewEvent::json("OrderRejected", "{}")]).unwrap();
        log.append("orders", vec![NewEvent::json("OrderPlaced", "{}")]).unwrap();

        let faulted = host.wait_for(|r| r.is_faulted());
        assert_eq!(faulted.projection_id, strict);
        host.wait_for(|r| r.projection_id == tolerant && checkpoint_at(2)(r));

        let strict_view = host.aggregator.view(strict).unwrap();
        assert_eq!(strict_view.status, ProjectionStatus::Faulted);
        assert!(strict_view.fault_reason.unwrap().contains("cannot handle rejected orders"));
        assert_eq!(host.aggregator.view(tolerant).unwrap().status, ProjectionStatus::Processing);
        assert_eq!(store.read_last("tolerant").unwrap().unwrap().state.as_deref(), Some("3"));

        let remaining = host.finish();
        assert!(!remaining.iter().any(|r| r.projection_id == strict && r.is_faulted()));
    }

    #[test]
    fn emitted_events_are_written_with_the_checkpoint() {
        let log = InMemoryEventLog::new();
        let store = InMemoryCheckpointStore::new(log.clone());
        let host = Host::start(&log, &store, 1);

        let totals = FnStateHandler::new("0", |state: &str, received: &CommittedEventReceived| {
            let n: u64 = state.parse()?;
            let total = (n + 1).to_string();
            Ok(ProcessOutput::state(total.clone()).with_emitted(EmittedEvent::new(
                "order-totals",
                "TotalChanged",
                total,
                received.tag.clone(),
            )))
        });
        host.pool.create(config("totals", 2), Box::new(totals)).unwrap();
        place_orders(&log, 2);
        host.wait_for(checkpoint_at(1));

        let emitted: Vec<_> = log
            .read_stream("order-totals")
            .unwrap()
            .iter()
            .map(|e| e.data_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(emitted, vec!["1", "2"]);

        host.finish();
    }

    #[test]
    fn stopping_twice_reports_one_stop() {
        let log = InMemoryEventLog::new();
        let store = InMemoryCheckpointStore::new(log.clone());
        let host = Host::start(&log, &store, 1);

        let id = host.pool.create(config("counter", 10), counter()).unwrap();
        host.wait_for(|r| r.kind == ReportKind::Started);
        place_orders(&log, 1);

        host.pool.stop(id).unwrap();
        host.pool.send(id, ProjectionMessage::Stop).unwrap();
        host.pool.request_statistics(id).unwrap();

        let report = host.wait_for(|r| matches!(r.kind, ReportKind::Statistics(_)));
        let ReportKind::Statistics(stats) = report.kind else {
            unreachable!();
        };
        assert_eq!(stats.status, ProjectionStatus::Stopped);
        assert_eq!(stats.events_processed, 1);

        // Below the threshold: the final stop writes no checkpoint.
        assert_eq!(store.read_last("counter").unwrap(), None);

        let aggregator_view = host.aggregator.view(id).unwrap();
        assert_eq!(aggregator_view.status, ProjectionStatus::Stopped);

        let remaining = host.finish();
        assert!(!remaining.iter().any(|r| r.kind == ReportKind::Stopped));
    }
}
