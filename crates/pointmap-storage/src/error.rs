//! Error types for the storage crate.

use thiserror::Error;

pub use pointmap_core::MapperError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Index points at a missing row.
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl From<Error> for MapperError {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => MapperError::Storage(e.to_string()),
            Error::Serialization(s) => MapperError::Serialization(s),
            Error::Storage(s) => MapperError::Storage(s),
            Error::NotFound(s) => MapperError::NotFound(s),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(format!("Redb error: {}", e))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(format!("Redb database error: {}", e))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(format!("Redb transaction error: {}", e))
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(format!("Redb table error: {}", e))
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(format!("Redb storage error: {}", e))
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(format!("Redb commit error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_onto_core_error() {
        let err: MapperError = Error::Storage("disk full".into()).into();
        assert!(matches!(err, MapperError::Storage(ref s) if s == "disk full"));
        assert!(err.is_fatal());

        let err: MapperError = Error::NotFound("AHU-1".into()).into();
        assert!(matches!(err, MapperError::NotFound(_)));
    }
}
