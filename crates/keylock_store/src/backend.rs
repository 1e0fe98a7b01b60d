//! Document store trait definitions.

use crate::document::Document;
use crate::error::StoreResult;
use crate::key::Key;
use crate::query::{Query, QueryPage};

/// An eventually-consistent document store with single-transaction ACID
/// semantics.
///
/// The coordinator layers cross-document locking on top of this trait; the
/// store itself only has to provide optimistic transactions and a query
/// primitive.
///
/// # Invariants
///
/// - A transaction's staged writes become visible atomically on `commit`
/// - `commit` fails with [`crate::StoreError::Conflict`] when a document it
///   read was changed by another commit in the meantime
/// - Stores must be `Send + Sync` so one instance can serve every caller
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - reference store for tests and embedding
pub trait DocumentStore: Send + Sync {
    /// Starts a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Unavailable`] if the store cannot be
    /// reached.
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Deletes a document outside of any transaction.
    ///
    /// Deleting an absent document succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed or the store is unavailable.
    fn delete(&self, key: &Key) -> StoreResult<()>;

    /// Runs a query against committed state.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is malformed or the store is unavailable.
    fn run_query(&self, query: &Query) -> StoreResult<QueryPage>;
}

/// One live store transaction.
///
/// Writes are staged until `commit`. After `commit` or `rollback` the
/// transaction is closed; `rollback` on a closed transaction is a no-op so
/// that cleanup paths may call it unconditionally.
pub trait StoreTransaction: Send {
    /// Reads a document, returning `None` if it does not exist.
    ///
    /// Reads observe this transaction's own staged writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or the store is
    /// unavailable.
    fn get(&mut self, key: &Key) -> StoreResult<Option<Document>>;

    /// Stages a write.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed or the transaction is closed.
    fn put(&mut self, key: &Key, document: Document) -> StoreResult<()>;

    /// Commits every staged write as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Conflict`] on an optimistic-concurrency
    /// failure, or another error if the store is unavailable.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discards staged writes and closes the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be told to abandon the
    /// transaction.
    fn rollback(&mut self) -> StoreResult<()>;
}
