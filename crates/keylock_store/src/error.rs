//! Error types for document store operations.

use crate::key::Key;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency check failed at commit time.
    #[error("commit conflict on {key}")]
    Conflict {
        /// A key whose committed version changed after it was read.
        key: Key,
    },

    /// The store could not be reached or refused the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The query cannot be evaluated.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The key is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::Conflict {
            key: Key::name("Persons", "alice"),
        };
        assert_eq!(err.to_string(), "commit conflict on Persons:alice");

        let err = StoreError::unavailable("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }
}
