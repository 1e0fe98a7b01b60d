//! The coordinator: one explicitly constructed entry point.

use crate::allocator::{IdSource, IdentityAllocator};
use crate::config::CoordinatorConfig;
use crate::digest::query_fingerprint;
use crate::entity::EntityHandle;
use crate::error::CoreResult;
use crate::keyset::{EntitySnapshot, KeySet};
use crate::lock::{LocalLockTable, LockCoordinator};
use crate::retry::{self, RetryPolicy};
use crate::snapshot::{self, Snapshot};
use crate::stats::{CoordinatorStats, StatsSnapshot};
use crate::transaction::{ActiveTransaction, MutationOutcome, TransactionExecutor, TxnOutcome};
use keylock_store::{Cursor, Document, DocumentStore, Key, Query};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Results of [`Coordinator::run_query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Matching documents, in result order.
    pub entities: Vec<Document>,
    /// Keys of `entities`, index for index.
    pub keys: Vec<Key>,
    /// Token for the next page; `None` when there are no more results.
    pub end_cursor: Option<Cursor>,
    /// Hex SHA-256 fingerprint of the query.
    pub fingerprint: String,
}

/// Multi-key transaction coordinator over a document store.
///
/// Create one per process and share it by clone; clones share the lock
/// table, statistics and configuration. Processes that must exclude each
/// other need a common [`LockCoordinator`] passed to
/// [`Coordinator::with_locks`].
///
/// # Example
///
/// ```rust
/// use keylock_core::{Coordinator, CoordinatorConfig, CoreError, KeySet, MutationOutcome};
/// use keylock_store::{InMemoryStore, Key};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryStore::new());
/// store.put_committed(Key::name("Persons", "ana"), json!({"balance": 100}).as_object().unwrap().clone());
/// store.put_committed(Key::name("Persons", "bob"), json!({"balance": 0}).as_object().unwrap().clone());
///
/// let coordinator = Coordinator::new(store.clone(), CoordinatorConfig::default());
/// let keys = KeySet::new()
///     .with("sender", Key::name("Persons", "ana"))
///     .with("receiver", Key::name("Persons", "bob"));
///
/// coordinator
///     .run_with_retry(&keys, |mut s| {
///         let from = s.get("sender").and_then(|d| d["balance"].as_i64()).unwrap_or(0);
///         if from < 40 {
///             return Err(CoreError::rejected("insufficient balance"));
///         }
///         let to = s.get("receiver").and_then(|d| d["balance"].as_i64()).unwrap_or(0);
///         s.get_or_create("sender").insert("balance".into(), json!(from - 40));
///         s.get_or_create("receiver").insert("balance".into(), json!(to + 40));
///         Ok(MutationOutcome::Commit(s))
///     })
///     .unwrap();
///
/// assert_eq!(store.get_committed(&Key::name("Persons", "bob")).unwrap()["balance"], 40);
/// ```
#[derive(Clone)]
pub struct Coordinator {
    executor: TransactionExecutor,
    allocator: IdentityAllocator,
    config: Arc<CoordinatorConfig>,
}

impl Coordinator {
    /// Creates a coordinator with its own in-process lock table.
    pub fn new(store: Arc<dyn DocumentStore>, config: CoordinatorConfig) -> Self {
        Self::with_locks(store, Arc::new(LocalLockTable::new()), config)
    }

    /// Creates a coordinator over a shared lock coordinator.
    pub fn with_locks(
        store: Arc<dyn DocumentStore>,
        locks: Arc<dyn LockCoordinator>,
        config: CoordinatorConfig,
    ) -> Self {
        let executor = TransactionExecutor::new(store, locks, Arc::new(CoordinatorStats::new()));
        let allocator = IdentityAllocator::new(executor.clone(), config.max_allocation_attempts);
        Self {
            executor,
            allocator,
            config: Arc::new(config),
        }
    }

    /// Replaces the allocator's candidate source.
    #[must_use]
    pub fn with_id_source(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.allocator = IdentityAllocator::with_source(
            self.executor.clone(),
            ids,
            self.config.max_allocation_attempts,
        );
        self
    }

    /// Returns the transaction executor.
    #[must_use]
    pub fn executor(&self) -> &TransactionExecutor {
        &self.executor
    }

    /// Returns the lock coordinator.
    #[must_use]
    pub fn locks(&self) -> &Arc<dyn LockCoordinator> {
        self.executor.locks()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns a copy of the statistics counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.executor.stats().snapshot()
    }

    /// Locks `keys` and starts a transaction for step-by-step use.
    ///
    /// # Errors
    ///
    /// See [`TransactionExecutor::begin`].
    pub fn transaction(&self, keys: &KeySet) -> CoreResult<ActiveTransaction> {
        self.executor.begin(keys)
    }

    /// Runs one attempt without retry.
    ///
    /// # Errors
    ///
    /// See [`TransactionExecutor::execute`].
    pub fn execute<F>(&self, keys: &KeySet, mutation: F) -> CoreResult<TxnOutcome>
    where
        F: FnOnce(EntitySnapshot) -> CoreResult<MutationOutcome>,
    {
        self.executor.execute(keys, mutation)
    }

    /// Runs `mutation` with the configured retry policy.
    ///
    /// # Errors
    ///
    /// See [`retry::run_with_retry`].
    pub fn run_with_retry<F>(&self, keys: &KeySet, mutation: F) -> CoreResult<TxnOutcome>
    where
        F: FnMut(EntitySnapshot) -> CoreResult<MutationOutcome>,
    {
        retry::run_with_retry(&self.executor, keys, mutation, &self.config.retry)
    }

    /// Runs `mutation` with an explicit retry policy.
    ///
    /// # Errors
    ///
    /// See [`retry::run_with_retry`].
    pub fn run_with_policy<F>(
        &self,
        keys: &KeySet,
        mutation: F,
        policy: &RetryPolicy,
    ) -> CoreResult<TxnOutcome>
    where
        F: FnMut(EntitySnapshot) -> CoreResult<MutationOutcome>,
    {
        retry::run_with_retry(&self.executor, keys, mutation, policy)
    }

    /// Captures a snapshot with the configured idle timeout.
    ///
    /// # Errors
    ///
    /// See [`snapshot::capture`].
    pub fn capture_snapshot(&self, keys: &KeySet) -> CoreResult<Snapshot> {
        snapshot::capture(&self.executor, keys, self.config.snapshot_idle_timeout)
    }

    /// Captures a snapshot with an explicit idle timeout.
    ///
    /// # Errors
    ///
    /// See [`snapshot::capture`].
    pub fn capture_snapshot_for(&self, keys: &KeySet, idle_timeout: Duration) -> CoreResult<Snapshot> {
        snapshot::capture(&self.executor, keys, idle_timeout)
    }

    /// Claims a fresh identity of `kind`.
    ///
    /// # Errors
    ///
    /// See [`IdentityAllocator::allocate_in`].
    pub fn allocate(&self, kind: &str) -> CoreResult<Key> {
        self.allocator.allocate(kind)
    }

    /// Claims a fresh identity of `kind` in `namespace`.
    ///
    /// # Errors
    ///
    /// See [`IdentityAllocator::allocate_in`].
    pub fn allocate_in(&self, namespace: Option<&str>, kind: &str) -> CoreResult<Key> {
        self.allocator.allocate_in(namespace, kind)
    }

    /// Returns an unbound handle on an entity of `kind`.
    #[must_use]
    pub fn entity(&self, kind: &str) -> EntityHandle {
        EntityHandle::new(self.clone(), kind)
    }

    /// Runs a query against committed state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`](crate::CoreError::Invalid) for a
    /// malformed query, or a store error.
    pub fn run_query(&self, query: &Query) -> CoreResult<QueryResult> {
        let fingerprint = query_fingerprint(query)?;
        let page = self.executor.store().run_query(query)?;
        trace!(kind = query.kind(), %fingerprint, results = page.entities.len(), "query ran");

        let (keys, entities) = page.entities.into_iter().unzip();
        Ok(QueryResult {
            entities,
            keys,
            end_cursor: page.end_cursor,
            fingerprint,
        })
    }

    /// Deletes a document outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn delete(&self, key: &Key) -> CoreResult<()> {
        self.executor.store().delete(key)?;
        trace!(%key, "entity deleted");
        Ok(())
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("held_tokens", &self.locks().held_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use keylock_store::{FilterOp, InMemoryStore};
    use serde_json::json;

    fn setup() -> (Arc<InMemoryStore>, Coordinator) {
        let store = Arc::new(InMemoryStore::new());
        for (name, balance) in [("ana", 100), ("bob", 0), ("cid", 40)] {
            store.put_committed(
                Key::name("Persons", name),
                json!({"balance": balance}).as_object().unwrap().clone(),
            );
        }
        (store.clone(), Coordinator::new(store, CoordinatorConfig::default()))
    }

    #[test]
    fn clones_share_locks_and_stats() {
        let (_store, coordinator) = setup();
        let other = coordinator.clone();
        let _txn = coordinator
            .transaction(&KeySet::single("a", Key::name("Persons", "ana")))
            .unwrap();

        assert_eq!(other.locks().held_count(), 1);
        assert_eq!(other.stats().transactions_started, 1);
    }

    #[test]
    fn shared_lock_table_excludes_across_coordinators() {
        let store = Arc::new(InMemoryStore::new());
        let locks: Arc<dyn LockCoordinator> = Arc::new(LocalLockTable::new());
        let a = Coordinator::with_locks(store.clone(), locks.clone(), CoordinatorConfig::default());
        let b = Coordinator::with_locks(store, locks, CoordinatorConfig::default());
        let keys = KeySet::single("x", Key::name("Persons", "ana"));

        let _held = a.transaction(&keys).unwrap();
        assert!(matches!(
            b.transaction(&keys),
            Err(CoreError::LockContention { .. })
        ));
    }

    #[test]
    fn run_query_returns_keys_and_fingerprint() {
        let (_store, coordinator) = setup();
        let query = Query::new("Persons")
            .filter("balance", FilterOp::Gt, 0)
            .descend("balance")
            .limit(1);

        let result = coordinator.run_query(&query).unwrap();
        assert_eq!(result.keys, vec![Key::name("Persons", "ana")]);
        assert_eq!(result.entities[0]["balance"], json!(100));
        assert!(result.end_cursor.is_some());
        assert_eq!(result.fingerprint.len(), 64);

        let next = coordinator
            .run_query(&query.clone().start(result.end_cursor.clone().unwrap()))
            .unwrap();
        assert_eq!(next.keys, vec![Key::name("Persons", "cid")]);
        assert!(next.end_cursor.is_none());
        assert_ne!(next.fingerprint, result.fingerprint);
    }

    #[test]
    fn delete_removes_document() {
        let (store, coordinator) = setup();
        coordinator.delete(&Key::name("Persons", "bob")).unwrap();
        assert!(store.get_committed(&Key::name("Persons", "bob")).is_none());
    }

    #[test]
    fn snapshot_uses_configured_timeout() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Coordinator::new(
            store,
            CoordinatorConfig::new().snapshot_idle_timeout(Duration::from_secs(60)),
        );
        let snap = coordinator
            .capture_snapshot(&KeySet::single("d", Key::name("Drafts", "d1")))
            .unwrap();
        assert!(snap.deadline() > std::time::Instant::now() + Duration::from_secs(50));
        snap.release().unwrap();
        assert_eq!(coordinator.locks().held_count(), 0);
    }
}
