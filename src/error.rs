//! Error types for the history subsystem
//!
//! This module provides the error taxonomy shared by every history backend,
//! the page reader and the admin service, together with a coarse
//! machine-readable classification used at API boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Error types for history storage and retrieval
#[derive(Error, Debug)]
pub enum HistoryError {
    /// A record id or cursor could not be parsed
    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    /// The intra-millisecond serial space is exhausted
    #[error("Too many records created in millisecond {millis}")]
    TooManyRecords { millis: i64 },

    /// The store clock moved backwards between two appends
    #[error("Time moved backwards: last append at {last}, now {now}")]
    NonMonotonicTime {
        last: chrono::DateTime<chrono::Utc>,
        now: chrono::DateTime<chrono::Utc>,
    },

    /// Invalid input errors (missing source, bad page token, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration loading errors
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Embedded key/value store errors
    #[error("Embedded store error: {0}")]
    Embedded(#[from] redb::Error),

    /// JSON encoding errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding errors
    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task failures
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A single payload could not be decoded
    #[error("Payload decode error: {0}")]
    Decode(String),

    /// Some records of a page could not be decoded
    #[error("{failed} of {attempted} records failed to decode: {}", .messages.join("; "))]
    PageDecode {
        failed: usize,
        attempted: usize,
        messages: Vec<String>,
    },
}

/// Coarse error classification, aligned with RPC status codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    ResourceExhausted,
    FailedPrecondition,
    Unavailable,
    Internal,
}

impl ErrorCode {
    /// Get numeric error code
    pub fn as_number(&self) -> u32 {
        match self {
            ErrorCode::InvalidArgument => 1402,
            ErrorCode::ResourceExhausted => 1501,
            ErrorCode::FailedPrecondition => 1903,
            ErrorCode::Unavailable => 1601,
            ErrorCode::Internal => 1901,
        }
    }
}

impl HistoryError {
    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a payload decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an invalid record id error
    pub fn invalid_record_id<S: Into<String>>(id: S) -> Self {
        Self::InvalidRecordId(id.into())
    }

    /// Classify the error
    pub fn code(&self) -> ErrorCode {
        match self {
            HistoryError::InvalidRecordId(_)
            | HistoryError::InvalidInput(_)
            | HistoryError::Base64(_) => ErrorCode::InvalidArgument,
            HistoryError::TooManyRecords { .. } => ErrorCode::ResourceExhausted,
            HistoryError::NonMonotonicTime { .. }
            | HistoryError::Config(_)
            | HistoryError::ConfigLoad(_)
            | HistoryError::Migration(_) => ErrorCode::FailedPrecondition,
            HistoryError::Database(e) if is_transient_sqlx(e) => ErrorCode::Unavailable,
            HistoryError::Io(_) => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        }
    }

    /// Check if the caller may retry the operation.
    ///
    /// The history core never retries on its own; this only tells callers
    /// whether a retry could succeed without changing the request.
    pub fn is_retryable(&self) -> bool {
        self.code() == ErrorCode::Unavailable
    }

    /// Check if the error was caused by the request itself
    pub fn is_invalid_argument(&self) -> bool {
        self.code() == ErrorCode::InvalidArgument
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        // SQLITE_BUSY and SQLITE_LOCKED
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}

impl From<redb::DatabaseError> for HistoryError {
    fn from(err: redb::DatabaseError) -> Self {
        HistoryError::Embedded(err.into())
    }
}

impl From<redb::TransactionError> for HistoryError {
    fn from(err: redb::TransactionError) -> Self {
        HistoryError::Embedded(err.into())
    }
}

impl From<redb::TableError> for HistoryError {
    fn from(err: redb::TableError) -> Self {
        HistoryError::Embedded(err.into())
    }
}

impl From<redb::StorageError> for HistoryError {
    fn from(err: redb::StorageError) -> Self {
        HistoryError::Embedded(err.into())
    }
}

impl From<redb::CommitError> for HistoryError {
    fn from(err: redb::CommitError) -> Self {
        HistoryError::Embedded(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            HistoryError::invalid_record_id("zz").code(),
            ErrorCode::InvalidArgument
        );
        assert!(HistoryError::invalid_input("missing source").is_invalid_argument());
        assert_eq!(
            HistoryError::TooManyRecords { millis: 10 }.code(),
            ErrorCode::ResourceExhausted
        );
        assert!(!HistoryError::TooManyRecords { millis: 10 }.is_retryable());
        assert!(HistoryError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!HistoryError::config("bad").is_retryable());
    }

    #[test]
    fn test_page_decode_message_joins_failures() {
        let err = HistoryError::PageDecode {
            failed: 2,
            attempted: 5,
            messages: vec!["a: bad".to_string(), "b: worse".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "2 of 5 records failed to decode: a: bad; b: worse"
        );
    }

    #[test]
    fn test_error_code_numbers_are_distinct() {
        let codes = [
            ErrorCode::InvalidArgument,
            ErrorCode::ResourceExhausted,
            ErrorCode::FailedPrecondition,
            ErrorCode::Unavailable,
            ErrorCode::Internal,
        ];
        let numbers: std::collections::HashSet<_> = codes.iter().map(|c| c.as_number()).collect();
        assert_eq!(numbers.len(), codes.len());
    }
}
