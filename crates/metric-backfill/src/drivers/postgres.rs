//! PostgreSQL relational source.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::Row;
use tracing::{debug, info, warn};

use super::tls::TlsBuilder;
use crate::config::SourceConfig;
use crate::core::{SqlRow, SqlValue};
use crate::error::{BackfillError, Result};
use crate::source::RelationalSource;

/// Pooled, read-only PostgreSQL source shared by every running batch.
pub struct PgSource {
    pool: Pool,
}

impl PgSource {
    /// Build the pool and check that a connection can be opened.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let pg_config = config.pg_config();
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = match TlsBuilder::parse(&config.ssl_mode)?.build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| BackfillError::pool(e, "creating PostgreSQL source pool"))?;

        let source = Self::from_pool(pool);
        source.ping().await?;

        info!(
            "Connected to PostgreSQL source: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, config.max_connections
        );

        Ok(source)
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    async fn ping(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| BackfillError::pool(e, "testing PostgreSQL source connection"))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

#[async_trait]
impl RelationalSource for PgSource {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| BackfillError::pool(e, "getting source connection for query"))?;

        let bind: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let stmt = client.prepare_cached(sql).await?;
        let rows = client.query(&stmt, &bind).await?;
        debug!("source query returned {} rows", rows.len());

        convert_rows(&rows)
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

fn convert_rows(rows: &[Row]) -> Result<Vec<SqlRow>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into();

    rows.iter()
        .map(|row| {
            let values = (0..row.len())
                .map(|idx| convert_value(row, idx))
                .collect::<Result<Vec<_>>>()?;
            Ok(SqlRow::new(columns.clone(), values))
        })
        .collect()
}

/// Decode one column. Numeric columns must be cast in SQL (`::float8` or
/// `::int8`) by the package that selects them.
fn convert_value(row: &Row, idx: usize) -> Result<SqlValue> {
    let ty = row.columns()[idx].type_();

    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?.map(|v| SqlValue::I64(v as i64))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?.map(|v| SqlValue::I64(v as i64))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::I64)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?.map(|v| SqlValue::F64(v as f64))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::F64)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
        row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?.map(SqlValue::Timestamp)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|ts| SqlValue::Timestamp(ts.and_utc()))
    } else if *ty == Type::INT8_ARRAY {
        row.try_get::<_, Option<Vec<i64>>>(idx)?.map(SqlValue::I64List)
    } else {
        return Err(BackfillError::Row(format!(
            "column '{}' has unsupported type {}",
            row.columns()[idx].name(),
            ty
        )));
    };

    Ok(value.unwrap_or(SqlValue::Null))
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::I64(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::F64(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => {
                if *ty == Type::TIMESTAMP {
                    v.naive_utc().to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::I64List(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
