//! Range resolvers: turn "all rows before the cutoff" into a [`BatchRange`].
//!
//! Both resolvers return [`BatchRange::EMPTY`] when nothing matches, which
//! the orchestrator treats as "skip this package".

use tracing::debug;

use crate::core::{BatchRange, SqlValue};
use crate::drivers::validate_identifier;
use crate::error::Result;
use crate::source::{ColumnarSource, RelationalSource};

/// Primary-key bounds of `table` rows matching `predicate`.
///
/// `predicate` may reference `$1..$n`, bound from `params`.
pub async fn id_range(
    source: &dyn RelationalSource,
    table: &str,
    predicate: &str,
    params: &[SqlValue],
) -> Result<BatchRange> {
    validate_identifier(table)?;

    let sql = format!(
        "SELECT MIN(id)::int8 AS min_id, MAX(id)::int8 AS max_id FROM {} WHERE {}",
        table,
        where_clause(predicate)
    );
    let rows = source.query(&sql, params).await?;

    let range = match rows.first() {
        Some(row) => BatchRange::from_bounds(row.opt_i64("min_id"), row.opt_i64("max_id")),
        None => BatchRange::EMPTY,
    };
    debug!("id range of {} ({}): {}", table, source.db_type(), range);
    Ok(range)
}

/// Unix-second bounds of `time_column` over `table` rows matching `predicate`.
///
/// The columnar store returns 0 for `toUnixTimestamp(min(..))` over an empty
/// set, so a zero bound maps to the sentinel.
pub async fn timestamp_range(
    columnar: &dyn ColumnarSource,
    table: &str,
    time_column: &str,
    predicate: &str,
) -> Result<BatchRange> {
    validate_identifier(table)?;
    validate_identifier(time_column)?;

    let sql = format!(
        "SELECT toUnixTimestamp(min({col})) AS min_ts, toUnixTimestamp(max({col})) AS max_ts \
         FROM {table} WHERE {pred}",
        col = time_column,
        table = table,
        pred = where_clause(predicate)
    );
    let rows = columnar.query(&sql).await?;

    let bounds = rows
        .first()
        .map(|row| (row.opt_i64("min_ts"), row.opt_i64("max_ts")));
    let range = match bounds {
        Some((Some(min), Some(max))) if min > 0 && max > 0 => BatchRange::from_bounds(Some(min), Some(max)),
        _ => BatchRange::EMPTY,
    };
    debug!("timestamp range of {}.{} ({}): {}", table, time_column, columnar.db_type(), range);
    Ok(range)
}

/// Largest `id` in `table` matching `predicate`, used to bound joins in
/// composed range strategies.
pub async fn max_id(
    source: &dyn RelationalSource,
    table: &str,
    predicate: &str,
    params: &[SqlValue],
) -> Result<Option<i64>> {
    validate_identifier(table)?;

    let sql = format!(
        "SELECT MAX(id)::int8 AS max_id FROM {} WHERE {}",
        table,
        where_clause(predicate)
    );
    let rows = source.query(&sql, params).await?;
    Ok(rows.first().and_then(|row| row.opt_i64("max_id")))
}

fn where_clause(predicate: &str) -> &str {
    let predicate = predicate.trim();
    if predicate.is_empty() {
        "TRUE"
    } else {
        predicate
    }
}
