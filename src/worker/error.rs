//! Error types for the worker loop.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::retrieval::RetrievalError;
use crate::storage::StorageError;

/// Why a single task attempt failed.
///
/// These never abort the loop; the worker reports them through
/// `mark_failed` and moves on. The display text is what lands in
/// `last_error`, prefixed with the class.
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// Transport or upstream failure that may succeed later.
    #[error("transient retrieval error: {0}")]
    TransientRetrieval(#[source] RetrievalError),

    /// The payload arrived but was unusable.
    #[error("validation error: {0}")]
    Validation(#[source] RetrievalError),

    /// The payload could not be persisted.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<RetrievalError> for TaskFailure {
    fn from(err: RetrievalError) -> Self {
        if err.is_transient() {
            Self::TransientRetrieval(err)
        } else {
            Self::Validation(err)
        }
    }
}

impl TaskFailure {
    /// Short class label for structured logs.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::TransientRetrieval(_) => "transient_retrieval",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
        }
    }
}

/// Errors that stop a worker loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The coordinator rejected an operation or the store failed.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CatalogError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_retrieval_classification() {
        let failure = TaskFailure::from(RetrievalError::Timeout {
            url: "http://localhost:25503".to_string(),
        });
        assert_eq!(failure.class(), "transient_retrieval");
        assert!(failure.to_string().starts_with("transient retrieval error: timeout"));
    }

    #[test]
    fn test_malformed_response_is_validation() {
        let failure = TaskFailure::from(RetrievalError::malformed("http://x", "empty body"));
        assert_eq!(failure.class(), "validation");
        assert!(failure.to_string().contains("empty body"));
    }

    #[test]
    fn test_storage_failure_message_includes_path() {
        let failure = TaskFailure::from(StorageError::io(
            "/data/SPX/2024/06/x.csv",
            std::io::Error::other("disk full"),
        ));
        assert_eq!(failure.class(), "storage");
        let msg = failure.to_string();
        assert!(msg.starts_with("storage error"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_worker_error_wraps_catalog_error() {
        let err = WorkerError::from(CatalogError::EmptyArtifact(3));
        assert!(err.to_string().contains("task 3"));
    }
}
