//! Error types for the mapping core.

use thiserror::Error;

use crate::oracle::OracleError;

/// Mapping result type
pub type Result<T> = std::result::Result<T, MapperError>;

/// Errors surfaced by the mapping core.
///
/// Per-point problems (malformed names, low-confidence candidates, a failed
/// oracle sub-call) never show up here: they are counted in the batch stats.
/// What remains are the conditions a caller has to act on.
#[derive(Error, Debug)]
pub enum MapperError {
    /// Invalid configuration (rejected before any sub-batch is scheduled)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Oracle failure that could not be isolated to a sub-batch
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Batch exceeded its wall-clock ceiling
    #[error("Batch timed out after {0}s")]
    Timeout(u64),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unknown task, device or record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Background task ended abnormally
    #[error("Task error: {0}")]
    Task(String),
}

impl MapperError {
    /// Whether the whole batch must transition to `failed`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MapperError::Config(_)
                | MapperError::Storage(_)
                | MapperError::Timeout(_)
                | MapperError::Task(_)
        )
    }
}

impl From<serde_json::Error> for MapperError {
    fn from(e: serde_json::Error) -> Self {
        MapperError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for MapperError {
    fn from(e: toml::de::Error) -> Self {
        MapperError::Config(e.to_string())
    }
}

impl From<std::io::Error> for MapperError {
    fn from(e: std::io::Error) -> Self {
        MapperError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for MapperError {
    fn from(e: tokio::task::JoinError) -> Self {
        MapperError::Task(e.to_string())
    }
}
