//! # metric-backfill
//!
//! One-time historical replay of relational and columnar source rows into
//! aggregated metric events.
//!
//! This library provides:
//!
//! - **Migration packages**: per-entity range, query and processor bundles
//! - **Deterministic batching** of id or timestamp ranges
//! - **Bounded concurrency** for batches within a package
//! - **Resume capability** via a JSON progress file
//! - **Retries** with linear backoff around every store round trip
//!
//! ## Example
//!
//! ```rust,no_run
//! use metric_backfill::{Config, MigrationParams, Orchestrator, PackageRegistry};
//!
//! #[tokio::main]
//! async fn main() -> metric_backfill::Result<()> {
//!     let config = Config::load("backfill.yaml")?;
//!     let orchestrator = Orchestrator::connect(&config, PackageRegistry::builtin()).await?;
//!     let params = MigrationParams {
//!         concurrency: 10,
//!         auto_resume: true,
//!         ..MigrationParams::default()
//!     };
//!     let result = orchestrator.run(&params).await?;
//!     println!("Emitted {} metrics", result.metrics_emitted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod package;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod sink;
pub mod source;

// Re-exports for convenient access
pub use crate::core::{plan_batches, BatchRange, EntityMetricEvent, MetricEmitter, SqlRow, SqlValue};
pub use config::{BackfillConfig, ClickHouseConfig, Config, SinkConfig, SourceConfig};
pub use error::{BackfillError, Result};
pub use orchestrator::{BackfillResult, MigrationParams, Orchestrator, PackageReport, PackageStatus};
pub use package::{BackfillPackage, MigrationPackage, PackageContext, PackageRegistry};
pub use progress::{ProgressMap, ProgressStore};
pub use retry::{retryable, RetryPolicy};
pub use sink::{MetricSink, SinkWriter};
pub use source::{ColumnarSource, RelationalSource};
