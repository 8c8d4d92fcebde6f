//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::{RetryPolicy, DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relational source (PostgreSQL).
    pub source: SourceConfig,

    /// Columnar / time-series source.
    pub columnar: ClickHouseConfig,

    /// Analytical sink the metric events are written to.
    pub sink: SinkConfig,

    /// Backfill behavior.
    pub backfill: BackfillConfig,
}

/// Relational source (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Maximum pooled connections shared by all concurrent batches (default: 16).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Connection settings for a ClickHouse-compatible HTTP endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// Base URL, e.g. `http://localhost:8123`.
    pub url: String,

    /// Database (default: "default").
    #[serde(default = "default_database")]
    pub database: String,

    /// Username (default: "default").
    #[serde(default = "default_database")]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for ClickHouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickHouseConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Analytical sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(flatten)]
    pub connection: ClickHouseConfig,

    /// Target table (default: "entity_metric_events").
    #[serde(default = "default_sink_table")]
    pub table: String,
}

/// Backfill behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Only rows created strictly before this instant are replayed.
    pub cutoff: DateTime<Utc>,

    /// Resume file (default: ".backfill-progress.json").
    #[serde(default = "default_progress_file")]
    pub progress_file: PathBuf,

    /// Attempts per range/query/insert call (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff base in milliseconds (default: 1000).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// HTTP request timeout for the columnar source and sink (default: 300).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl BackfillConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    16
}

fn default_database() -> String {
    "default".to_string()
}

fn default_sink_table() -> String {
    "entity_metric_events".to_string()
}

fn default_progress_file() -> PathBuf {
    PathBuf::from(".backfill-progress.json")
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

fn default_request_timeout_secs() -> u64 {
    300
}
