//! Domain error types for pytest-chronicle.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

use sea_orm::sqlx::sqlite::SqliteError;
use sea_orm::{DbErr, RuntimeErr, SqlErr};

use crate::config::ConfigError;

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Input artifact could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input parsed but produced no usable test cases
    #[error("No usable test cases in {0}")]
    EmptyInput(String),

    /// Connection or transaction failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Revision marker inconsistent with the requested schema transition
    #[error("Migration conflict: {0}")]
    MigrationConflict(String),

    /// A run with this fingerprint already exists. Never surfaced to users;
    /// the ingestion engine turns it into an idempotent success.
    #[error("Duplicate fingerprint: {0}")]
    DuplicateFingerprint(String),

    /// SQLite reported the database busy or locked by another connection.
    /// Retried by the ingestion engine; surfaced as `StorageUnavailable` when it persists.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local filesystem operation failed
    #[error("File system error: {0}")]
    FileSystem(String),

    /// External test runner could not be launched
    #[error("Runner error: {0}")]
    Runner(String),
}

impl AppError {
    /// Process exit code for a command that failed with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::InvalidInput(_) => 2,
            _ => 1,
        }
    }

    /// Classify a database error raised while writing a run.
    ///
    /// A unique-constraint violation means a concurrent writer committed the same
    /// fingerprint first.
    pub fn from_write_error(err: DbErr, fingerprint: &str) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                AppError::DuplicateFingerprint(fingerprint.to_string())
            }
            _ if is_busy(&err) => AppError::Busy(err.to_string()),
            _ => AppError::StorageUnavailable(err.to_string()),
        }
    }
}

/// True when SQLite failed with `SQLITE_BUSY` or `SQLITE_LOCKED` (any extended code).
pub fn is_busy(err: &DbErr) -> bool {
    let (DbErr::Conn(RuntimeErr::SqlxError(source))
    | DbErr::Exec(RuntimeErr::SqlxError(source))
    | DbErr::Query(RuntimeErr::SqlxError(source))) = err
    else {
        return false;
    };

    source
        .as_database_error()
        .filter(|db| db.try_downcast_ref::<SqliteError>().is_some())
        .and_then(|db| db.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

// Conversion implementations for common error types

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(format!("JSON parsing error: {}", err))
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::StorageUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileSystem(err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}
