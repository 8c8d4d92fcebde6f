//! Core data model shared by every part of the backfill.
//!
//! - [`range`]: closed batch intervals and the deterministic batch planner
//! - [`event`]: the metric event output unit and the emitter packages write into
//! - [`value`]: store-agnostic rows returned by the source drivers

pub mod event;
pub mod range;
pub mod value;

pub use event::{EntityMetricEvent, MetricEmitter};
pub use range::{plan_batches, BatchRange};
pub use value::{SqlRow, SqlValue};
