//! Error handling module for the pet-care backend core.
//!
//! One taxonomy for every cascade: structural errors propagate to the caller untouched,
//! store I/O failures are transient and safe to retry by re-running the whole cascade.
//! A batch refused for size is the one commit failure a retry cannot fix.

use crate::paths::{EntityKind, PathError};
use crate::store::StoreError;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const ARITY_ERROR: &str = "ARITY_ERROR";
    pub const INVALID_ID: &str = "INVALID_ID";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const NAME_IN_USE: &str = "NAME_IN_USE";
    pub const RETRIEVAL_FAILED: &str = "RETRIEVAL_FAILED";
    pub const COMMIT_FAILED: &str = "COMMIT_FAILED";
    pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
}

/// Why a commit did not happen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitFailure {
    /// The store cancelled or failed the batch.
    #[error("{0}")]
    Cancelled(String),
    /// The cascade staged more writes than one batch may hold. Never sent to the store.
    #[error("batch of {writes} writes exceeds the limit of {limit}; retrying cannot succeed")]
    Oversize { writes: usize, limit: usize },
}

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Wrong number of ids for the requested kind
    #[error("{kind} paths take {expected} id(s), got {actual}")]
    Arity {
        kind: EntityKind,
        expected: usize,
        actual: usize,
    },
    /// Empty or malformed id segment
    #[error("invalid {kind} id at index {index}: {reason}")]
    InvalidId {
        kind: EntityKind,
        index: usize,
        reason: String,
    },
    /// Name-index or entity lookup failed
    #[error("{0} does not exist")]
    NotFound(String),
    /// Uniqueness violation on create or rename
    #[error("name {name:?} is already in use for {kind}")]
    NameInUse { kind: EntityKind, name: String },
    /// Store read interrupted or failed
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),
    /// Batch commit cancelled or failed
    #[error("commit failed: {0}")]
    CommitFailed(CommitFailure),
    /// Invalid startup configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Arity { .. } => codes::ARITY_ERROR,
            AppError::InvalidId { .. } => codes::INVALID_ID,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::NameInUse { .. } => codes::NAME_IN_USE,
            AppError::RetrievalFailed(_) => codes::RETRIEVAL_FAILED,
            AppError::CommitFailed(_) => codes::COMMIT_FAILED,
            AppError::Config(_) => codes::CONFIG_ERROR,
        }
    }

    /// Whether re-running the whole cascade may succeed.
    ///
    /// False for an oversize refusal: the same cascade stages the same number of writes
    /// every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::RetrievalFailed(_) | AppError::CommitFailed(CommitFailure::Cancelled(_))
        )
    }

    /// Whether a batch was refused for exceeding the write limit.
    pub fn is_oversize(&self) -> bool {
        matches!(self, AppError::CommitFailed(CommitFailure::Oversize { .. }))
    }
}

impl From<PathError> for AppError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Arity {
                kind,
                expected,
                actual,
            } => AppError::Arity {
                kind,
                expected,
                actual,
            },
            PathError::InvalidId {
                kind,
                index,
                reason,
            } => AppError::InvalidId {
                kind,
                index,
                reason: reason.to_string(),
            },
            PathError::Hierarchy { kind } => {
                AppError::Config(format!("hierarchy table is broken for {kind}"))
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RetrievalFailed(msg) => AppError::RetrievalFailed(msg),
            StoreError::CommitFailed(msg) => AppError::CommitFailed(CommitFailure::Cancelled(msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_errors_keep_their_kind() {
        let err: AppError = PathError::Arity {
            kind: EntityKind::Forum,
            expected: 2,
            actual: 1,
        }
        .into();
        assert_eq!(err.error_code(), codes::ARITY_ERROR);
        assert!(!err.is_transient());

        let err: AppError = PathError::InvalidId {
            kind: EntityKind::Group,
            index: 0,
            reason: "empty",
        }
        .into();
        assert_eq!(err.error_code(), codes::INVALID_ID);
    }

    #[test]
    fn test_store_errors_are_transient() {
        let err: AppError = StoreError::CommitFailed("disk full".into()).into();
        assert_eq!(err.error_code(), codes::COMMIT_FAILED);
        assert!(err.is_transient());

        let err: AppError = StoreError::RetrievalFailed("timeout".into()).into();
        assert!(err.is_transient());
        assert!(!AppError::NotFound("group Dogs".into()).is_transient());
    }

    #[test]
    fn test_oversize_refusal_is_not_transient() {
        let err = AppError::CommitFailed(CommitFailure::Oversize {
            writes: 501,
            limit: 500,
        });
        assert_eq!(err.error_code(), codes::COMMIT_FAILED);
        assert!(err.is_oversize());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("retrying cannot succeed"));

        let err: AppError = StoreError::CommitFailed("busy".into()).into();
        assert!(!err.is_oversize());
    }
}
