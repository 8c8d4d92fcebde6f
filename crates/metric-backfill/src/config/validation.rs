//! Configuration validation.

use super::{ClickHouseConfig, Config};
use crate::drivers::is_valid_identifier;
use crate::drivers::tls::SslMode;
use crate::error::{BackfillError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(BackfillError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(BackfillError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(BackfillError::Config("source.user is required".into()));
    }
    SslMode::parse(&config.source.ssl_mode)?;
    if config.source.max_connections == 0 {
        return Err(BackfillError::Config(
            "source.max_connections must be at least 1".into(),
        ));
    }

    validate_http("columnar", &config.columnar)?;
    validate_http("sink", &config.sink.connection)?;

    if !is_valid_identifier(&config.sink.table) {
        return Err(BackfillError::Config(format!(
            "sink.table '{}' is not a valid table name",
            config.sink.table
        )));
    }

    if config.backfill.max_retries == 0 {
        return Err(BackfillError::Config(
            "backfill.max_retries must be at least 1".into(),
        ));
    }
    if config.backfill.progress_file.as_os_str().is_empty() {
        return Err(BackfillError::Config(
            "backfill.progress_file must not be empty".into(),
        ));
    }

    Ok(())
}

fn validate_http(section: &str, config: &ClickHouseConfig) -> Result<()> {
    if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
        return Err(BackfillError::Config(format!(
            "{}.url must start with http:// or https://, got '{}'",
            section, config.url
        )));
    }
    if config.database.is_empty() {
        return Err(BackfillError::Config(format!(
            "{}.database is required",
            section
        )));
    }
    Ok(())
}
