//! Event and report vocabulary shared by the projection core and its collaborators.
//!
//! - [`CommittedEvent`]: an event read back from the log, with its positions.
//! - [`EmittedEvent`]: an event a projection asks to write as a side effect.
//! - [`ProjectionReport`]: outbound status/statistics reports.
//! - [`Publisher`] / [`InMemoryBus`]: message delivery mechanics.

pub mod bus;
pub mod emitted;
pub mod event;
pub mod in_memory_bus;
pub mod report;

pub use bus::{PublishError, Publisher, Subscription};
pub use emitted::EmittedEvent;
pub use event::{CommittedEvent, NewEvent};
pub use in_memory_bus::InMemoryBus;
pub use report::{ProjectionReport, ProjectionStatistics, ProjectionStatus, ReportKind};
