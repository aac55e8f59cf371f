//! Folds projection reports into per-projection status views.
//!
//! Workers publish reports into the aggregator's channel; a background thread
//! applies each one to the matching [`ProjectionStatusView`] and then
//! rebroadcasts it on an [`InMemoryBus`]. A subscriber that has seen a report
//! can therefore rely on the view already reflecting it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, mpsc};
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use eventide_core::{CheckpointTag, ProjectionId};
use eventide_events::{
    InMemoryBus, ProjectionReport, ProjectionStatistics, ProjectionStatus, Publisher, ReportKind, Subscription,
};

/// Latest known status of one projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionStatusView {
    pub projection_id: ProjectionId,
    pub name: String,
    pub status: ProjectionStatus,
    pub fault_reason: Option<String>,
    pub last_checkpoint_tag: Option<CheckpointTag>,
    /// Set by `State` reports only.
    pub state: Option<String>,
    pub statistics: Option<ProjectionStatistics>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectionStatusView {
    fn new(report: &ProjectionReport) -> Self {
        Self {
            projection_id: report.projection_id,
            name: report.name.clone(),
            status: ProjectionStatus::Initial,
            fault_reason: None,
            last_checkpoint_tag: None,
            state: None,
            statistics: None,
            updated_at: report.at,
        }
    }

    fn apply(&mut self, report: &ProjectionReport) {
        self.updated_at = report.at;
        match &report.kind {
            ReportKind::Started => self.status = ProjectionStatus::Processing,
            ReportKind::Stopped => self.status = ProjectionStatus::Stopped,
            ReportKind::Faulted { reason } => {
                self.status = ProjectionStatus::Faulted;
                self.fault_reason = Some(reason.clone());
            }
            ReportKind::CheckpointCompleted { tag } => self.last_checkpoint_tag = Some(tag.clone()),
            ReportKind::State { state, .. } => self.state = state.clone(),
            ReportKind::Statistics(stats) => {
                self.status = stats.status;
                if stats.last_checkpoint_tag.is_some() {
                    self.last_checkpoint_tag = stats.last_checkpoint_tag.clone();
                }
                self.statistics = Some(stats.clone());
            }
        }
    }
}

type Views = Arc<RwLock<HashMap<ProjectionId, ProjectionStatusView>>>;

pub struct ReportAggregator {
    reports: mpsc::Sender<ProjectionReport>,
    views: Views,
    bus: Arc<InMemoryBus<ProjectionReport>>,
    join: thread::JoinHandle<()>,
}

impl ReportAggregator {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<ProjectionReport>();
        let views: Views = Arc::default();
        let bus = Arc::new(InMemoryBus::new());

        let join = {
            let views = Arc::clone(&views);
            let bus = Arc::clone(&bus);
            thread::Builder::new()
                .name("projection-reports".to_string())
                .spawn(move || aggregate_loop(rx, &views, bus.as_ref()))
                .expect("failed to spawn report aggregator thread")
        };

        Self {
            reports: tx,
            views,
            bus,
            join,
        }
    }

    /// Report sink to hand to projections.
    pub fn reporter(&self) -> Arc<dyn Publisher<ProjectionReport>> {
        Arc::new(self.reports.clone())
    }

    /// Receive every report applied from now on.
    pub fn subscribe(&self) -> Subscription<ProjectionReport> {
        self.bus.subscribe()
    }

    pub fn view(&self, id: ProjectionId) -> Option<ProjectionStatusView> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        views.get(&id).cloned()
    }

    /// All views, ordered by projection name.
    pub fn views(&self) -> Vec<ProjectionStatusView> {
        let views = self.views.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = views.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Join the aggregator thread once every reporter has been dropped.
    pub fn shutdown(self) {
        let Self { reports, join, .. } = self;
        drop(reports);
        let _ = join.join();
    }
}

fn aggregate_loop(reports: mpsc::Receiver<ProjectionReport>, views: &RwLock<HashMap<ProjectionId, ProjectionStatusView>>, bus: &InMemoryBus<ProjectionReport>) {
    info!("report aggregator started");

    while let Ok(report) = reports.recv() {
        {
            let mut views = views.write().unwrap_or_else(PoisonError::into_inner);
            views
                .entry(report.projection_id)
                .or_insert_with(|| ProjectionStatusView::new(&report))
                .apply(&report);
        }

        if let Err(err) = bus.publish(report) {
            warn!(error = %err, "failed to rebroadcast projection report");
        }
    }

    info!("report aggregator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tag(seq: i64) -> CheckpointTag {
        CheckpointTag::from_stream_position("orders", seq, seq * 10).unwrap()
    }

    fn next(sub: &Subscription<ProjectionReport>) -> ProjectionReport {
        sub.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn folds_reports_into_views() {
        let aggregator = ReportAggregator::spawn();
        let sub = aggregator.subscribe();
        let reporter = aggregator.reporter();
        let id = ProjectionId::new();

        reporter.publish(ProjectionReport::new(id, "orders", ReportKind::Started)).unwrap();
        reporter
            .publish(ProjectionReport::new(
                id,
                "orders",
                ReportKind::CheckpointCompleted { tag: tag(3) },
            ))
            .unwrap();
        next(&sub);
        next(&sub);

        let view = aggregator.view(id).unwrap();
        assert_eq!(view.name, "orders");
        assert_eq!(view.status, ProjectionStatus::Processing);
        assert_eq!(view.last_checkpoint_tag, Some(tag(3)));

        reporter
            .publish(ProjectionReport::new(
                id,
                "orders",
                ReportKind::Faulted {
                    reason: "boom".into(),
                },
            ))
            .unwrap();
        assert!(next(&sub).is_faulted());

        let view = aggregator.view(id).unwrap();
        assert_eq!(view.status, ProjectionStatus::Faulted);
        assert_eq!(view.fault_reason.as_deref(), Some("boom"));

        drop(reporter);
        aggregator.shutdown();
    }

    #[test]
    fn keeps_one_view_per_projection() {
        let aggregator = ReportAggregator::spawn();
        let sub = aggregator.subscribe();
        let reporter = aggregator.reporter();
        let (a, b) = (ProjectionId::new(), ProjectionId::new());

        reporter.publish(ProjectionReport::new(b, "beta", ReportKind::Started)).unwrap();
        reporter.publish(ProjectionReport::new(a, "alpha", ReportKind::Started)).unwrap();
        reporter.publish(ProjectionReport::new(a, "alpha", ReportKind::Stopped)).unwrap();
        for _ in 0..3 {
            next(&sub);
        }

        let names: Vec<_> = aggregator.views().into_iter().map(|v| (v.name, v.status)).collect();
        assert_eq!(
            names,
            vec![
                ("alpha".to_string(), ProjectionStatus::Stopped),
                ("beta".to_string(), ProjectionStatus::Processing),
            ]
        );

        drop(reporter);
        aggregator.shutdown();
    }
}
