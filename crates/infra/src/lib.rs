//! Runtime collaborators of the projection core.
//!
//! - [`event_log`]: in-memory committed-event log with live subscriptions.
//! - [`checkpoint_store`]: checkpoint stores (log-backed; Postgres behind the
//!   `postgres` feature).
//! - [`writer`]: background checkpoint writer threads.
//! - [`workers`]: the projection worker pool.
//! - [`aggregator`]: folds projection reports into status views.
//! - [`config`]: environment configuration.

pub mod aggregator;
pub mod checkpoint_store;
pub mod config;
pub mod event_log;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod workers;
pub mod writer;

pub use aggregator::{ProjectionStatusView, ReportAggregator};
pub use checkpoint_store::InMemoryCheckpointStore;
pub use config::{ConfigError, ProjectionsConfig};
pub use event_log::{EventLogError, InMemoryEventLog, LogSubscription};
pub use workers::{ProjectionWorkerPool, SubscriptionProvider, WorkerError};
pub use writer::{CheckpointWriterThread, ThreadedCheckpointWriter};

#[cfg(test)]
mod integration_tests;
