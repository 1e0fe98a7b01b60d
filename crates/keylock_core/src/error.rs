//! Error types for the coordinator.

use keylock_store::{Key, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the coordinator.
///
/// Only [`CoreError::LockContention`] and [`CoreError::CommitConflict`] are
/// retry-eligible; see [`CoreError::is_retryable`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// Another in-flight transaction holds an overlapping lock token.
    #[error("lock contention on {requested} token(s)")]
    LockContention {
        /// Number of distinct tokens that were requested.
        requested: usize,
    },

    /// The store reported a write-write conflict at commit time.
    #[error("commit conflict on {key}")]
    CommitConflict {
        /// A key involved in the conflict.
        key: Key,
    },

    /// No entity matched a lookup.
    #[error("entity not found: {what}")]
    NotFound {
        /// Description of the lookup.
        what: String,
    },

    /// Caller-supplied validation rejected a payload.
    #[error("validation rejected: {reason}")]
    ValidationRejected {
        /// Reason given by the validator or mutation.
        reason: String,
    },

    /// Caller logic violated the transaction contract.
    #[error("invalid operation: {message}")]
    Invalid {
        /// Description of the violation.
        message: String,
    },

    /// A configured retry cap was reached.
    #[error("retry exhausted after {attempts} attempt(s) in {elapsed:?}: {last}")]
    RetryExhausted {
        /// Attempts made.
        attempts: u32,
        /// Wall-clock time spent.
        elapsed: Duration,
        /// The error of the final attempt.
        #[source]
        last: Box<CoreError>,
    },

    /// The external store failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl CoreError {
    /// Creates a validation rejection.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::ValidationRejected {
            reason: reason.into(),
        }
    }

    /// Creates a contract violation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns true if a fresh attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::LockContention { .. } | CoreError::CommitConflict { .. }
        )
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { key } => CoreError::CommitConflict { key },
            StoreError::Unavailable(message) => CoreError::StoreUnavailable(message),
            StoreError::InvalidQuery(message) | StoreError::InvalidKey(message) => {
                CoreError::Invalid { message }
            }
            StoreError::TransactionClosed => CoreError::invalid("store transaction is closed"),
        }
    }
}
