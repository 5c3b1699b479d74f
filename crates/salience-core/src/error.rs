//! Error taxonomy for the salience cache.
//!
//! Rejected input (score below threshold, empty ids, head index out of
//! range) is not an error: those operations return `Ok(false)` / `Ok(None)`.
//! Malformed cached payloads are decoded tolerantly and never surface here.

use salience_store::StorageError;

use crate::orchestrator::CyclePhase;

/// Salience cache errors.
#[derive(Debug, thiserror::Error)]
pub enum SalienceError {
    /// Connectivity or time budget failure.
    #[error(transparent)]
    StoreUnavailable(StorageError),

    /// The store answered but rejected the operation.
    #[error(transparent)]
    Store(StorageError),

    #[error("consolidation not applied: {0}")]
    ConsolidationPartial(String),

    #[error("{stage} collaborator failed: {reason}")]
    Collaborator { stage: CyclePhase, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl SalienceError {
    /// True when the same call may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SalienceError::StoreUnavailable(_)
                | SalienceError::ConsolidationPartial(_)
                | SalienceError::Store(StorageError::TransactionAborted(_))
        )
    }

    pub(crate) fn collaborator(stage: CyclePhase, err: anyhow::Error) -> Self {
        SalienceError::Collaborator {
            stage,
            reason: format!("{err:#}"),
        }
    }
}

impl From<StorageError> for SalienceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(msg) => SalienceError::Serialization(msg),
            other if other.is_unavailable() => SalienceError::StoreUnavailable(other),
            other => SalienceError::Store(other),
        }
    }
}

impl From<serde_json::Error> for SalienceError {
    fn from(err: serde_json::Error) -> Self {
        SalienceError::Serialization(err.to_string())
    }
}

/// Result type for salience cache operations.
pub type Result<T> = std::result::Result<T, SalienceError>;
