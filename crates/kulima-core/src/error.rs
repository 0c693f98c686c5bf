//! Error types for kulima-core

use thiserror::Error;

use crate::validation::ValidationErrors;

/// Result type alias using kulima-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result codes we care about.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// Errors that can occur in kulima-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Field-level validation failure
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// QR payload signing or verification error
    #[error("QR error: {0}")]
    Qr(String),
}

impl Error {
    /// Whether the failure is worth retrying (database busy or locked).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LibSql(libsql::Error::SqliteFailure(code, _)) => {
                matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)
            }
            _ => false,
        }
    }

    /// Whether the failure is a UNIQUE constraint violation on `column`.
    pub fn is_unique_violation(&self, column: &str) -> bool {
        match self {
            Self::LibSql(libsql::Error::SqliteFailure(code, message)) => {
                code & 0xff == SQLITE_CONSTRAINT
                    && message.contains("UNIQUE")
                    && message.contains(column)
            }
            _ => false,
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}
