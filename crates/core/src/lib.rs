//! `eventide-core`: position and identity primitives.
//!
//! This crate contains **pure value types** (no IO, no clocks, no threads).

pub mod error;
pub mod id;
pub mod tag;

pub use error::{CoreError, CoreResult};
pub use id::{EventId, ProjectionId};
pub use tag::{CheckpointTag, LogPosition};
