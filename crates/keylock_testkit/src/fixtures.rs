//! Test fixtures and coordinator helpers.
//!
//! Provides an in-memory coordinator with a fast retry policy and helpers
//! for seeding and inspecting account-style documents.

use keylock_core::{Coordinator, CoordinatorConfig, RetryPolicy};
use keylock_store::{Document, InMemoryStore, Key, Value};
use std::sync::Arc;
use std::time::Duration;

/// Kind used by the account helpers.
pub const ACCOUNT_KIND: &str = "Accounts";

/// Retry policy with a 1-5 ms backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new().with_delay_range(Duration::from_millis(1), Duration::from_millis(5))
}

/// Converts a JSON object literal into a [`Document`].
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A coordinator over a fresh in-memory store.
pub struct TestCoordinator {
    /// The coordinator.
    pub coordinator: Coordinator,
    /// The store, for seeding and inspection outside transactions.
    pub store: Arc<InMemoryStore>,
}

impl TestCoordinator {
    /// Creates a coordinator using [`fast_retry`].
    pub fn new() -> Self {
        Self::with_config(CoordinatorConfig::new().retry(fast_retry()))
    }

    /// Creates a coordinator with an explicit configuration.
    pub fn with_config(config: CoordinatorConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            coordinator: Coordinator::new(store.clone(), config),
            store,
        }
    }

    /// Writes a document directly.
    pub fn seed(&self, key: &Key, value: Value) {
        self.store.put_committed(key.clone(), doc(value));
    }

    /// Creates an account with `balance` and returns its key.
    pub fn seed_account(&self, name: &str, balance: i64) -> Key {
        let key = Key::name(ACCOUNT_KIND, name);
        self.seed(&key, serde_json::json!({ "balance": balance }));
        key
    }

    /// Returns the committed document at `key`.
    pub fn document(&self, key: &Key) -> Option<Document> {
        self.store.get_committed(key)
    }

    /// Returns the committed `balance` at `key`.
    pub fn balance(&self, key: &Key) -> Option<i64> {
        self.document(key)?.get("balance")?.as_i64()
    }
}

impl Default for TestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestCoordinator {
    type Target = Coordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Runs a test with a fresh [`TestCoordinator`].
pub fn with_coordinator<F, R>(f: F) -> R
where
    F: FnOnce(&TestCoordinator) -> R,
{
    f(&TestCoordinator::new())
}

/// Test scenario helpers.
pub mod scenarios {
    use keylock_core::{CoreError, CoreResult, Coordinator, KeySet, MutationOutcome, TxnOutcome};
    use keylock_store::Key;
    use serde_json::json;

    fn balance_of(snapshot: &keylock_core::EntitySnapshot, name: &str) -> i64 {
        snapshot
            .get(name)
            .and_then(|d| d.get("balance"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    /// Moves `amount` from `from` to `to`, rejecting overdrafts.
    pub fn transfer(
        coordinator: &Coordinator,
        from: &Key,
        to: &Key,
        amount: i64,
    ) -> CoreResult<TxnOutcome> {
        let keys = KeySet::new()
            .with("sender", from.clone())
            .with("receiver", to.clone());

        coordinator.run_with_retry(&keys, |mut s| {
            let sender = balance_of(&s, "sender");
            if sender < amount {
                return Err(CoreError::rejected(format!(
                    "insufficient balance: {sender} < {amount}"
                )));
            }
            let receiver = balance_of(&s, "receiver");
            s.get_or_create("sender")
                .insert("balance".into(), json!(sender - amount));
            s.get_or_create("receiver")
                .insert("balance".into(), json!(receiver + amount));
            Ok(MutationOutcome::Commit(s))
        })
    }

    /// Adds `by` to the `balance` of `key`, creating it if absent.
    pub fn increment(coordinator: &Coordinator, key: &Key, by: i64) -> CoreResult<TxnOutcome> {
        let keys = KeySet::single("self", key.clone());
        coordinator.run_with_retry(&keys, |mut s| {
            let current = balance_of(&s, "self");
            s.get_or_create("self")
                .insert("balance".into(), json!(current + by));
            Ok(MutationOutcome::Commit(s))
        })
    }
}
