//! Error types for Stock Insight

use thiserror::Error;

/// Every failure the library can surface to a caller
#[derive(Debug, Error)]
pub enum InsightError {
    /// Malformed or missing input at creation
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Prediction not found: {0}")]
    NotFound(String),

    /// A lifecycle transition was violated
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Prediction {0} already exists")]
    Conflict(String),

    /// Import failed and was rolled back
    #[error("Restore failed: {0}")]
    Restore(String),

    /// The AI analysis service failed or returned something unusable
    #[error("AI collaborator error: {0}")]
    Collaborator(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for InsightError {
    fn from(err: reqwest::Error) -> Self {
        InsightError::Collaborator(err.to_string())
    }
}

impl InsightError {
    /// True when SQLite rejected a row because its key already exists
    pub(crate) fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            InsightError::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;
