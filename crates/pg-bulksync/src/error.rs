//! Error types for bulk operations.

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Main error type for bulk transfer operations.
#[derive(Error, Debug)]
pub enum BulkError {
    /// Invalid descriptor, key override, or identifier. Raised before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection could not be opened or acquired.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// A mid-copy protocol or server error on the COPY stream.
    #[error("Copy stream error for table {table}: {message}")]
    Stream { table: String, message: String },

    /// Cancellation was observed at a suspension point.
    #[error("Operation cancelled")]
    Cancelled,

    /// The server enforced the configured command timeout.
    #[error("Command timeout exceeded: {0}")]
    Timeout(String),

    /// A writer method was called in a state that does not allow it.
    #[error("Invalid writer state: {0}")]
    InvalidState(&'static str),

    /// Database error outside the classified copy/timeout sites.
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

impl BulkError {
    /// Create a Connection error with context about where it occurred.
    pub fn connection(message: impl Into<String>, context: impl Into<String>) -> Self {
        BulkError::Connection {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Stream error for a copy bound to `table`.
    pub fn stream(table: impl Into<String>, message: impl Into<String>) -> Self {
        BulkError::Stream {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Classify a driver error raised on the COPY stream.
    ///
    /// A `statement_timeout` cutoff surfaces as SQLSTATE 57014 and is reported
    /// as `Timeout`; everything else on the stream is a `Stream` fault.
    pub(crate) fn from_copy(table: &str, err: tokio_postgres::Error) -> Self {
        if is_timeout(&err) {
            BulkError::Timeout(err.to_string())
        } else {
            BulkError::stream(table, err.to_string())
        }
    }

    /// Classify a driver error raised by an executed statement.
    pub(crate) fn from_statement(err: tokio_postgres::Error) -> Self {
        if is_timeout(&err) {
            BulkError::Timeout(err.to_string())
        } else {
            BulkError::Postgres(err)
        }
    }
}

/// SQLSTATE 57014 (query_canceled) is what `statement_timeout` raises.
fn is_timeout(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::QUERY_CANCELED)
}

/// Result type alias for bulk operations.
pub type Result<T> = std::result::Result<T, BulkError>;
