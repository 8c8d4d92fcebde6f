//! Store driver implementations.
//!
//! - [`postgres`]: relational source over a deadpool-managed PostgreSQL pool
//! - [`clickhouse`]: columnar source and metric sink over the ClickHouse HTTP interface
//! - [`tls`]: rustls setup for PostgreSQL connections
//!
//! Also hosts identifier validation shared by the range resolvers and the sink.
//! Identifiers cannot be bound as parameters, and the columnar store has no
//! bind parameters at all, so every table or column name that is interpolated
//! into SQL goes through [`validate_identifier`] first.

pub mod clickhouse;
pub mod postgres;
pub mod tls;

pub use clickhouse::{ClickHouseClient, ClickHouseSink};
pub use postgres::PgSource;
pub use tls::{SslMode, TlsBuilder};

use crate::error::{BackfillError, Result};

/// PostgreSQL's identifier limit; ClickHouse allows more.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Whether `name` is a plain (optionally schema-qualified) identifier:
/// `[A-Za-z_][A-Za-z0-9_]*`, segments joined by `.`.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && segment.len() <= MAX_IDENTIFIER_LENGTH
        })
}

/// Reject anything but a plain identifier before it is interpolated into SQL.
pub fn validate_identifier(name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(BackfillError::Config(format!(
            "SECURITY: '{}' is not a plain identifier and cannot be interpolated into SQL",
            name.escape_debug()
        )))
    }
}
