//! ClickHouse HTTP client: columnar source and metric sink.
//!
//! Queries are sent as the POST body with `FORMAT JSONEachRow`; inserts put
//! the statement in the URL and stream newline-delimited JSON rows in the
//! body. Inserts use `async_insert=1, wait_for_async_insert=0`: the server
//! acknowledges once rows are accepted into its ingestion buffer, not once
//! they are flushed to disk.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use super::validate_identifier;
use crate::config::ClickHouseConfig;
use crate::core::{EntityMetricEvent, SqlRow, SqlValue};
use crate::error::{BackfillError, Result};
use crate::sink::MetricSink;
use crate::source::ColumnarSource;

/// Shared HTTP client for one ClickHouse endpoint.
#[derive(Clone)]
pub struct ClickHouseClient {
    http: Client,
    config: Arc<ClickHouseConfig>,
}

impl ClickHouseClient {
    pub fn new(config: ClickHouseConfig, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    fn request(&self) -> RequestBuilder {
        let mut request = self
            .http
            .post(&self.config.url)
            .query(&[("database", self.config.database.as_str())])
            .header("X-ClickHouse-User", &self.config.user);
        if !self.config.password.is_empty() {
            request = request.header("X-ClickHouse-Key", &self.config.password);
        }
        request
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackfillError::HttpStatus {
            endpoint: self.config.url.clone(),
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    /// Run a read query and decode `JSONEachRow` output.
    pub async fn select(&self, sql: &str) -> Result<Vec<SqlRow>> {
        let sql = sql.trim().trim_end_matches(';');
        let body = format!("{} FORMAT JSONEachRow", sql);

        let response = self
            .request()
            .query(&[("output_format_json_quote_64bit_integers", "0")])
            .body(body)
            .send()
            .await?;
        let text = self.check(response).await?.text().await?;

        parse_json_each_row(&text)
    }

    /// Insert serializable rows into `table` with async-insert semantics.
    pub async fn insert_json_rows<T: serde::Serialize>(&self, table: &str, rows: &[T]) -> Result<()> {
        validate_identifier(table)?;

        let mut body = Vec::with_capacity(rows.len() * 128);
        for row in rows {
            serde_json::to_writer(&mut body, row)?;
            body.push(b'\n');
        }

        let statement = format!("INSERT INTO {} FORMAT JSONEachRow", table);
        let response = self
            .request()
            .query(&[
                ("query", statement.as_str()),
                ("async_insert", "1"),
                ("wait_for_async_insert", "0"),
            ])
            .body(body)
            .send()
            .await?;
        self.check(response).await?;

        debug!("inserted {} rows into {}", rows.len(), table);
        Ok(())
    }
}

#[async_trait]
impl ColumnarSource for ClickHouseClient {
    async fn query(&self, sql: &str) -> Result<Vec<SqlRow>> {
        self.select(sql).await
    }

    fn db_type(&self) -> &str {
        "clickhouse"
    }
}

/// Metric sink writing into one ClickHouse table.
pub struct ClickHouseSink {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseSink {
    pub fn new(client: ClickHouseClient, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self { client, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl MetricSink for ClickHouseSink {
    async fn insert(&self, events: &[EntityMetricEvent]) -> Result<()> {
        self.client.insert_json_rows(&self.table, events).await
    }

    fn name(&self) -> &str {
        "clickhouse"
    }
}

fn parse_json_each_row(text: &str) -> Result<Vec<SqlRow>> {
    let mut columns: Option<Arc<[String]>> = None;
    let mut rows = Vec::new();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let object = match serde_json::from_str::<Value>(line)? {
            Value::Object(map) => map,
            other => {
                return Err(BackfillError::Row(format!(
                    "expected a JSON object per row, got {}",
                    other
                )))
            }
        };

        let columns = columns
            .get_or_insert_with(|| object.keys().cloned().collect::<Vec<_>>().into())
            .clone();
        let values = columns
            .iter()
            .map(|name| object.get(name).map(json_to_value).unwrap_or(SqlValue::Null))
            .collect();
        rows.push(SqlRow::new(columns, values));
    }

    Ok(rows)
}

fn json_to_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::I64(i),
            None => SqlValue::F64(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(items) => {
            let ints: Option<Vec<i64>> = items.iter().map(Value::as_i64).collect();
            match ints {
                Some(ints) => SqlValue::I64List(ints),
                None => SqlValue::Text(value.to_string()),
            }
        }
        Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}
