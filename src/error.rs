//! Error types for silo.

use serde::Serialize;
use thiserror::Error;

/// Common error type for silo.
#[derive(Error, Debug)]
pub enum SiloError {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage error: path resolution, physical I/O or insufficient quota.
    #[error("storage error: {0}")]
    Storage(String),

    /// Resource not found (or not visible to the caller).
    #[error("{0} not found")]
    NotFound(String),

    /// Business-rule violation on files or directories.
    #[error("file management error: {0}")]
    FileManagement(String),

    /// Malformed internal path or name construction.
    #[error("processing error: {0}")]
    Processing(String),
}

// Conversion from sqlx errors
impl From<sqlx::Error> for SiloError {
    fn from(e: sqlx::Error) -> Self {
        SiloError::Database(e.to_string())
    }
}

/// Result type alias for silo operations.
pub type Result<T> = std::result::Result<T, SiloError>;

/// Failure classes reported to external callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Storage,
    FileManagement,
    Processing,
}

impl SiloError {
    /// Classify this error for the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SiloError::Config(_) => ErrorKind::Configuration,
            SiloError::Database(_) | SiloError::Io(_) | SiloError::Storage(_) => {
                ErrorKind::Storage
            }
            SiloError::NotFound(_) | SiloError::FileManagement(_) => ErrorKind::FileManagement,
            SiloError::Processing(_) => ErrorKind::Processing,
        }
    }
}

/// Structured failure result handed back at the operation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<SiloError> for Failure {
    fn from(e: SiloError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
