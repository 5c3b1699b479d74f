//! Error types for salience-store

use thiserror::Error;

/// Errors that can occur in the key-value persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend connection could not be established or was lost
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its time budget
    #[error("store operation `{op}` timed out after {limit_ms}ms")]
    Timeout { op: &'static str, limit_ms: u64 },

    /// Backend query error
    #[error("store backend error: {0}")]
    Backend(String),

    /// Value could not be encoded or decoded at the store boundary
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// An atomic batch was rejected; none of its operations were applied
    #[error("atomic batch aborted: {0}")]
    TransactionAborted(String),

    /// Key holds a different structure than the operation expects
    #[error("key `{key}` holds a {actual}, expected a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Schema setup error
    #[error("schema setup failed: {0}")]
    SchemaSetup(String),
}

impl StorageError {
    /// True for failures caused by connectivity or time budget rather than
    /// by the data itself.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::Timeout { .. }
        )
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        use surrealdb::error::Api;

        match &err {
            surrealdb::Error::Api(
                Api::Http(_) | Api::Ws(_) | Api::ConnectionUninitialised,
            ) => StorageError::Unavailable(err.to_string()),
            _ => StorageError::Backend(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
