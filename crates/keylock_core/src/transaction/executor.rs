//! Transaction executor.

use crate::error::{CoreError, CoreResult};
use crate::keyset::{EntitySnapshot, KeySet};
use crate::lock::{LockCoordinator, LockGuard};
use crate::stats::CoordinatorStats;
use crate::transaction::state::{AbortReason, MutationOutcome, TxnOutcome, TxnPhase};
use keylock_store::{DocumentStore, StoreTransaction};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Binds a key set into one atomic read-modify-write unit.
///
/// The executor provides:
/// - All-or-nothing locking of every participant via the lock coordinator
/// - A store transaction that reads each participant once
/// - Commit of every participant as one unit, or rollback
/// - Lock release on every exit path
///
/// ## Caller responsibility
///
/// There is no intrinsic timeout. A mutation that never returns holds its
/// locks for as long as it runs.
///
/// # Example
///
/// ```rust
/// use keylock_core::{KeySet, MutationOutcome, TransactionExecutor};
/// use keylock_store::{InMemoryStore, Key};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let executor = TransactionExecutor::in_memory(Arc::new(InMemoryStore::new()));
/// let keys = KeySet::single("counter", Key::name("Counters", "hits"));
///
/// let outcome = executor
///     .execute(&keys, |mut snapshot| {
///         let doc = snapshot.get_or_create("counter");
///         doc.insert("n".into(), json!(1));
///         Ok(MutationOutcome::Commit(snapshot))
///     })
///     .unwrap();
/// assert!(outcome.is_committed());
/// ```
#[derive(Clone)]
pub struct TransactionExecutor {
    store: Arc<dyn DocumentStore>,
    locks: Arc<dyn LockCoordinator>,
    stats: Arc<CoordinatorStats>,
}

impl TransactionExecutor {
    /// Creates an executor over a store and a shared lock coordinator.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<dyn LockCoordinator>,
        stats: Arc<CoordinatorStats>,
    ) -> Self {
        Self {
            store,
            locks,
            stats,
        }
    }

    /// Creates an executor with a private in-process lock table.
    pub fn in_memory(store: Arc<dyn DocumentStore>) -> Self {
        Self::new(
            store,
            Arc::new(crate::lock::LocalLockTable::new()),
            Arc::new(CoordinatorStats::new()),
        )
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Returns the lock coordinator.
    #[must_use]
    pub fn locks(&self) -> &Arc<dyn LockCoordinator> {
        &self.locks
    }

    /// Returns the statistics counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<CoordinatorStats> {
        &self.stats
    }

    /// Locks every participant and starts a store transaction.
    ///
    /// The store transaction is only started once the locks are held.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Invalid`] if the key set is empty or malformed
    /// - [`CoreError::LockContention`] if any participant is locked elsewhere
    /// - [`CoreError::StoreUnavailable`] if the store transaction cannot start
    pub fn begin(&self, keys: &KeySet) -> CoreResult<ActiveTransaction> {
        keys.validate()?;

        let guard = match LockGuard::acquire(&self.locks, keys.lock_tokens()) {
            Ok(guard) => guard,
            Err(err) => {
                self.stats.record_contention();
                debug!(participants = keys.len(), "transaction blocked on locks");
                return Err(err);
            }
        };

        // The guard releases the tokens if the store refuses to begin.
        let store_txn = self.store.begin()?;
        self.stats.record_start();
        debug!(
            participants = keys.len(),
            tokens = guard.tokens().len(),
            "transaction locked"
        );

        Ok(ActiveTransaction {
            keys: keys.clone(),
            store_txn,
            _guard: guard,
            phase: TxnPhase::Locked,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Runs one transaction attempt: begin, read all, mutate, commit.
    ///
    /// # Errors
    ///
    /// Returns the mutation's own error unchanged after rolling back, or
    /// any error of [`TransactionExecutor::begin`], a read, or the commit
    /// (including [`CoreError::CommitConflict`]).
    pub fn execute<F>(&self, keys: &KeySet, mutation: F) -> CoreResult<TxnOutcome>
    where
        F: FnOnce(EntitySnapshot) -> CoreResult<MutationOutcome>,
    {
        let mut txn = self.begin(keys)?;
        let snapshot = txn.read_all()?;
        txn.execute(snapshot, mutation)
    }
}

impl fmt::Debug for TransactionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("held_tokens", &self.locks.held_count())
            .finish_non_exhaustive()
    }
}

/// One live transaction attempt.
///
/// Holds the store transaction and the lock tokens of its key set. The
/// handle is consumed by `execute`, `commit` or `rollback`. Dropping it
/// before then rolls the store transaction back and releases the tokens.
pub struct ActiveTransaction {
    keys: KeySet,
    store_txn: Box<dyn StoreTransaction>,
    _guard: LockGuard,
    phase: TxnPhase,
    stats: Arc<CoordinatorStats>,
}

impl ActiveTransaction {
    /// Returns the key set.
    #[must_use]
    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> TxnPhase {
        self.phase
    }

    /// Reads the current body of every participant.
    ///
    /// Absent documents produce `None` entries, not errors.
    ///
    /// # Errors
    ///
    /// Returns a store error; the attempt should then be dropped.
    pub fn read_all(&mut self) -> CoreResult<EntitySnapshot> {
        self.phase = TxnPhase::Reading;
        let mut entries = BTreeMap::new();
        for (name, key) in self.keys.iter() {
            let document = self.store_txn.get(key)?;
            entries.insert(name.to_string(), document);
        }
        Ok(EntitySnapshot::from_entries(entries))
    }

    /// Hands `snapshot` to `mutation` and acts on its outcome.
    ///
    /// # Errors
    ///
    /// Returns the mutation's error unchanged after rolling back, or any
    /// commit error.
    pub fn execute<F>(mut self, snapshot: EntitySnapshot, mutation: F) -> CoreResult<TxnOutcome>
    where
        F: FnOnce(EntitySnapshot) -> CoreResult<MutationOutcome>,
    {
        self.phase = TxnPhase::Executing;
        match mutation(snapshot) {
            Ok(MutationOutcome::Commit(snapshot)) => {
                self.commit(&snapshot)?;
                Ok(TxnOutcome::Committed(snapshot))
            }
            Ok(MutationOutcome::Rollback) => {
                self.rollback()?;
                Ok(TxnOutcome::RolledBack)
            }
            Err(err) => {
                debug!(error = %err, "mutation failed, rolling back");
                self.abort(AbortReason::Mutation);
                Err(err)
            }
        }
    }

    /// Saves every participant of `snapshot` and commits.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Invalid`] if a participant has no snapshot entry
    /// - [`CoreError::CommitConflict`] if the store refused the commit
    /// - [`CoreError::StoreUnavailable`] on store failure
    pub fn commit(mut self, snapshot: &EntitySnapshot) -> CoreResult<()> {
        self.phase = TxnPhase::Saving;
        if let Err(err) = self.stage(snapshot) {
            let reason = match err {
                CoreError::Invalid { .. } => AbortReason::Contract,
                _ => AbortReason::Store,
            };
            self.abort(reason);
            return Err(err);
        }

        match self.store_txn.commit() {
            Ok(()) => {
                self.phase = TxnPhase::Committed;
                self.stats.record_commit();
                debug!(participants = self.keys.len(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                let err = CoreError::from(err);
                let reason = if let CoreError::CommitConflict { key } = &err {
                    self.stats.record_conflict();
                    warn!(%key, "commit conflict");
                    AbortReason::CommitConflict
                } else {
                    AbortReason::Store
                };
                self.abort(reason);
                Err(err)
            }
        }
    }

    /// Discards the attempt at the caller's request.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rollback fails; the locks are
    /// released regardless.
    pub fn rollback(mut self) -> CoreResult<()> {
        self.phase = TxnPhase::RolledBack;
        self.stats.record_rollback();
        debug!(participants = self.keys.len(), "transaction rolled back");
        self.store_txn.rollback()?;
        Ok(())
    }

    fn stage(&mut self, snapshot: &EntitySnapshot) -> CoreResult<()> {
        for (key, document) in snapshot.writes_for(&self.keys)? {
            if let Some(document) = document {
                self.store_txn.put(key, document.clone())?;
            }
        }
        Ok(())
    }

    fn abort(&mut self, reason: AbortReason) {
        self.phase = TxnPhase::Aborted(reason);
        self.stats.record_rollback();
        if let Err(err) = self.store_txn.rollback() {
            warn!(error = %err, %reason, "store rollback failed");
        }
    }
}

impl Drop for ActiveTransaction {
    fn drop(&mut self) {
        if !self.phase.is_terminal() {
            debug!(phase = ?self.phase, "transaction dropped before finishing");
            self.abort(AbortReason::Abandoned);
        }
    }
}

impl fmt::Debug for ActiveTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveTransaction")
            .field("keys", &self.keys)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keylock_store::{Document, InMemoryStore, Key};
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn setup() -> (Arc<InMemoryStore>, TransactionExecutor) {
        let store = Arc::new(InMemoryStore::new());
        let executor = TransactionExecutor::in_memory(store.clone());
        (store, executor)
    }

    fn transfer_keys() -> KeySet {
        KeySet::new()
            .with("sender", Key::name("Persons", "ana"))
            .with("receiver", Key::name("Persons", "bob"))
    }

    fn seed(store: &InMemoryStore) {
        store.put_committed(Key::name("Persons", "ana"), doc(json!({"balance": 100})));
        store.put_committed(Key::name("Persons", "bob"), doc(json!({"balance": 0})));
    }

    #[test]
    fn begin_locks_and_drop_releases() {
        let (_store, executor) = setup();
        let txn = executor.begin(&transfer_keys()).unwrap();
        assert_eq!(txn.phase(), TxnPhase::Locked);
        assert_eq!(executor.locks().held_count(), 2);

        drop(txn);
        assert_eq!(executor.locks().held_count(), 0);
        assert_eq!(executor.stats().snapshot().transactions_rolled_back, 1);
    }

    #[test]
    fn begin_reports_contention_without_starting() {
        let (_store, executor) = setup();
        let _held = executor
            .begin(&KeySet::single("x", Key::name("Persons", "bob")))
            .unwrap();

        let err = executor.begin(&transfer_keys()).unwrap_err();
        assert!(matches!(err, CoreError::LockContention { requested: 2 }));
        assert_eq!(executor.locks().held_count(), 1);
        assert_eq!(executor.stats().snapshot().lock_contentions, 1);
        assert_eq!(executor.stats().snapshot().transactions_started, 1);
    }

    #[test]
    fn begin_failure_on_store_releases_locks() {
        let (store, executor) = setup();
        store.set_available(false);
        let err = executor.begin(&transfer_keys()).unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
        assert_eq!(executor.locks().held_count(), 0);
    }

    #[test]
    fn read_all_yields_absent_sentinel() {
        let (store, executor) = setup();
        store.put_committed(Key::name("Persons", "ana"), doc(json!({"balance": 1})));

        let mut txn = executor.begin(&transfer_keys()).unwrap();
        let snapshot = txn.read_all().unwrap();
        assert!(snapshot.exists("sender"));
        assert!(!snapshot.exists("receiver"));
        assert!(snapshot.has_entry("receiver"));
    }

    #[test]
    fn execute_commits_all_participants() {
        let (store, executor) = setup();
        seed(&store);

        let outcome = executor
            .execute(&transfer_keys(), |mut s| {
                s.get_mut("sender").unwrap()["balance"] = json!(60);
                s.get_mut("receiver").unwrap()["balance"] = json!(40);
                Ok(MutationOutcome::Commit(s))
            })
            .unwrap();

        assert!(outcome.is_committed());
        assert_eq!(store.get_committed(&Key::name("Persons", "ana")).unwrap()["balance"], json!(60));
        assert_eq!(store.get_committed(&Key::name("Persons", "bob")).unwrap()["balance"], json!(40));
        assert_eq!(executor.locks().held_count(), 0);
    }

    #[test]
    fn mutation_error_is_returned_unchanged_and_rolls_back() {
        let (store, executor) = setup();
        seed(&store);

        let err = executor
            .execute(&transfer_keys(), |mut s| {
                s.get_mut("sender").unwrap()["balance"] = json!(-100);
                Err(CoreError::rejected("insufficient balance"))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::ValidationRejected { ref reason } if reason == "insufficient balance"));
        assert_eq!(store.get_committed(&Key::name("Persons", "ana")).unwrap()["balance"], json!(100));
        assert_eq!(executor.locks().held_count(), 0);
    }

    #[test]
    fn requested_rollback_writes_nothing() {
        let (store, executor) = setup();
        seed(&store);

        let outcome = executor
            .execute(&transfer_keys(), |_| Ok(MutationOutcome::Rollback))
            .unwrap();
        assert_eq!(outcome, TxnOutcome::RolledBack);
        assert_eq!(store.commit_count(), 0);
        assert_eq!(executor.locks().held_count(), 0);
    }

    #[test]
    fn missing_entry_is_a_contract_violation() {
        let (store, executor) = setup();
        seed(&store);

        let err = executor
            .execute(&transfer_keys(), |mut s| {
                s.remove("receiver");
                s.get_mut("sender").unwrap()["balance"] = json!(0);
                Ok(MutationOutcome::Commit(s))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Invalid { .. }));
        assert_eq!(store.get_committed(&Key::name("Persons", "ana")).unwrap()["balance"], json!(100));
        assert_eq!(executor.locks().held_count(), 0);
    }

    #[test]
    fn absent_entry_left_absent_is_not_written() {
        let (store, executor) = setup();
        executor
            .execute(&transfer_keys(), |mut s| {
                s.insert("sender", doc(json!({"balance": 1})));
                Ok(MutationOutcome::Commit(s))
            })
            .unwrap();
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn commit_conflict_rolls_back_and_releases() {
        let (store, executor) = setup();
        seed(&store);
        store.inject_conflicts(1);

        let err = executor
            .execute(&transfer_keys(), |s| Ok(MutationOutcome::Commit(s)))
            .unwrap_err();

        assert!(matches!(err, CoreError::CommitConflict { .. }));
        assert!(err.is_retryable());
        assert_eq!(executor.locks().held_count(), 0);
        assert_eq!(executor.stats().snapshot().commit_conflicts, 1);
    }

    #[test]
    fn duplicate_identity_does_not_self_deadlock() {
        let (store, executor) = setup();
        let key = Key::name("Persons", "ana");
        let keys = KeySet::new().with("a", key.clone()).with("b", key.clone());

        let outcome = executor
            .execute(&keys, |mut s| {
                s.insert("a", doc(json!({"v": 1})));
                s.insert("b", doc(json!({"v": 1})));
                Ok(MutationOutcome::Commit(s))
            })
            .unwrap();
        assert!(outcome.is_committed());
        assert_eq!(store.get_committed(&key).unwrap()["v"], json!(1));
    }

    #[test]
    fn panicking_mutation_still_releases_locks() {
        let (_store, executor) = setup();
        let keys = transfer_keys();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = executor.execute(&keys, |_| -> CoreResult<MutationOutcome> {
                panic!("mutation bug")
            });
        }));
        assert!(result.is_err());
        assert_eq!(executor.locks().held_count(), 0);
    }

    #[test]
    fn invalid_keyset_is_rejected_before_locking() {
        let (_store, executor) = setup();
        let err = executor.begin(&KeySet::new()).unwrap_err();
        assert!(matches!(err, CoreError::Invalid { .. }));
        assert_eq!(executor.locks().held_count(), 0);
    }
}
