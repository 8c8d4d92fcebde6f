//! Error types for the backfill library.

use thiserror::Error;

/// Main error type for backfill operations.
#[derive(Error, Debug)]
pub enum BackfillError {
    /// Configuration error (invalid YAML, missing fields, bad run parameters, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relational source connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// HTTP transport error talking to the columnar source or the sink
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The columnar source or the sink answered with a non-success status
    #[error("{endpoint} returned HTTP {status}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A row could not be decoded into the shape a package expects
    #[error("Row decoding error: {0}")]
    Row(String),

    /// Sink insert failed
    #[error("Sink error: {0}")]
    Sink(String),

    /// A package failed to resolve, query, or process a batch
    #[error("Package {package} failed: {message}")]
    Package { package: String, message: String },

    /// The package filter named a package that is not registered
    #[error("Unknown package '{0}'")]
    UnknownPackage(String),

    /// Progress file error
    #[error("Progress file error: {0}")]
    Progress(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackfillError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        BackfillError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Package error
    pub fn package(package: impl Into<String>, message: impl Into<String>) -> Self {
        BackfillError::Package {
            package: package.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Configuration problems exit with 2 so wrappers can tell a bad
    /// invocation apart from a failed backfill.
    pub fn exit_code(&self) -> u8 {
        match self {
            BackfillError::Config(_) | BackfillError::UnknownPackage(_) | BackfillError::Yaml(_) => 2,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for backfill operations.
pub type Result<T> = std::result::Result<T, BackfillError>;
