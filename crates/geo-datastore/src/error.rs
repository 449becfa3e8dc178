//! Error types for the datastore library.

use thiserror::Error;

/// Main error type for datastore operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Configuration error (invalid YAML, missing fields, empty table name, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A column name could not be resolved against the table metadata,
    /// even case-insensitively.
    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// An update was requested with no effective changes after excluding
    /// identifier columns. Updating nothing is a caller error.
    #[error("No changes to apply for table '{table}'")]
    NoChanges { table: String },

    /// SQL execution failed. Carries the dialect's native error text;
    /// this layer never retries.
    #[error("Query failed ({dialect}): {message}")]
    QueryFailed { dialect: String, message: String },

    /// Functionality that is intentionally not implemented.
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// Connection pool error with context about where it occurred.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server driver error.
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

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

impl StoreError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        StoreError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a QueryFailed error carrying a dialect's native error text.
    pub fn query_failed(dialect: impl Into<String>, message: impl ToString) -> Self {
        StoreError::QueryFailed {
            dialect: dialect.into(),
            message: message.to_string(),
        }
    }

    /// Format error with full details including error chain.
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

/// Result type alias for datastore operations.
pub type Result<T> = std::result::Result<T, StoreError>;
