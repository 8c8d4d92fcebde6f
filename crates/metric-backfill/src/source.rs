//! Source store interfaces.
//!
//! The backfill reads from two kinds of store:
//!
//! - a relational database queried with bind parameters ([`RelationalSource`])
//! - a columnar / time-series store queried with inline SQL ([`ColumnarSource`])
//!
//! Both are read-only from the backfill's point of view and are shared by all
//! concurrently running batches.

use async_trait::async_trait;

use crate::core::{SqlRow, SqlValue};
use crate::error::Result;

/// Parameterized, read-only SQL access to the relational source.
#[async_trait]
pub trait RelationalSource: Send + Sync {
    /// Run a query with positional parameters (`$1`, `$2`, ...).
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Short name for logging.
    fn db_type(&self) -> &str;
}

/// Inline-SQL access to the columnar source. There are no bind parameters;
/// callers interpolate validated identifiers and numeric bounds only.
#[async_trait]
pub trait ColumnarSource: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<SqlRow>>;

    /// Short name for logging.
    fn db_type(&self) -> &str;
}
