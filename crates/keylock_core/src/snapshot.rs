//! Snapshots: transactions held open across a bounded idle window.
//!
//! A snapshot locks and reads its key set like an ordinary transaction but
//! leaves the transaction open so a caller can inspect and edit the
//! entities over an extended interval. It commits exactly once, either on
//! [`Snapshot::release`] or when its idle timer fires, whichever comes
//! first. The timer bounds how long an abandoned snapshot can hold its
//! locks.

use crate::error::{CoreError, CoreResult};
use crate::keyset::{EntitySnapshot, KeySet};
use crate::stats::CoordinatorStats;
use crate::transaction::{ActiveTransaction, TransactionExecutor};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How a snapshot was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotEnd {
    /// Committed by an explicit release.
    Released,
    /// Committed by the idle timer.
    Expired,
    /// The commit failed; nothing was written.
    Failed(String),
}

/// Result of [`Snapshot::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// This call committed the snapshot.
    Committed,
    /// The snapshot was already closed; nothing happened.
    AlreadyClosed(SnapshotEnd),
}

enum SnapshotState {
    Open {
        txn: ActiveTransaction,
        entities: EntitySnapshot,
    },
    Closed(SnapshotEnd),
}

struct Shared {
    state: Mutex<SnapshotState>,
    changed: Condvar,
    stats: Arc<CoordinatorStats>,
}

impl Shared {
    /// Commits if still open. Returns `Ok(false)` if already closed.
    ///
    /// The caller holds the state lock, so exactly one closer wins.
    fn close(&self, state: &mut SnapshotState, end: SnapshotEnd) -> CoreResult<bool> {
        let previous = std::mem::replace(state, SnapshotState::Closed(end));
        let result = match previous {
            SnapshotState::Open { txn, entities } => match txn.commit(&entities) {
                Ok(()) => Ok(true),
                Err(err) => {
                    *state = SnapshotState::Closed(SnapshotEnd::Failed(err.to_string()));
                    Err(err)
                }
            },
            SnapshotState::Closed(prior) => {
                *state = SnapshotState::Closed(prior);
                Ok(false)
            }
        };
        self.changed.notify_all();
        result
    }
}

/// An open transaction with guaranteed auto-commit.
///
/// Obtained from [`capture`] or `Coordinator::capture_snapshot`.
///
/// # Example
///
/// ```rust
/// use keylock_core::{snapshot, KeySet, ReleaseOutcome, TransactionExecutor};
/// use keylock_store::{InMemoryStore, Key};
/// use serde_json::json;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let store = Arc::new(InMemoryStore::new());
/// let executor = TransactionExecutor::in_memory(store.clone());
/// let keys = KeySet::single("draft", Key::name("Drafts", "d1"));
///
/// let snap = snapshot::capture(&executor, &keys, Duration::from_secs(30)).unwrap();
/// snap.with_entities(|e| {
///     e.get_or_create("draft").insert("title".into(), json!("hello"));
/// })
/// .unwrap();
///
/// assert_eq!(snap.release().unwrap(), ReleaseOutcome::Committed);
/// assert!(matches!(snap.release().unwrap(), ReleaseOutcome::AlreadyClosed(_)));
/// assert_eq!(store.get_committed(&Key::name("Drafts", "d1")).unwrap()["title"], "hello");
/// ```
pub struct Snapshot {
    shared: Arc<Shared>,
    keys: KeySet,
    deadline: Instant,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Locks and reads `keys`, then holds the transaction open for at most
/// `idle_timeout`.
///
/// # Errors
///
/// Returns any error of beginning or reading the transaction, or
/// [`CoreError::Invalid`] if `idle_timeout` is too large to form a deadline
/// or the idle timer cannot be started. An oversized timeout is rejected
/// before any lock is taken.
pub fn capture(
    executor: &TransactionExecutor,
    keys: &KeySet,
    idle_timeout: Duration,
) -> CoreResult<Snapshot> {
    let deadline = Instant::now()
        .checked_add(idle_timeout)
        .ok_or_else(|| CoreError::invalid(format!("idle timeout {idle_timeout:?} is out of range")))?;
    let mut txn = executor.begin(keys)?;
    let entities = txn.read_all()?;

    let shared = Arc::new(Shared {
        state: Mutex::new(SnapshotState::Open { txn, entities }),
        changed: Condvar::new(),
        stats: Arc::clone(executor.stats()),
    });

    let timer_shared = Arc::clone(&shared);
    let timer = thread::Builder::new()
        .name("keylock-snapshot".into())
        .spawn(move || run_timer(&timer_shared, deadline))
        .map_err(|e| CoreError::invalid(format!("cannot start snapshot timer: {e}")))?;

    executor.stats().record_snapshot_captured();
    debug!(participants = keys.len(), ?idle_timeout, "snapshot captured");

    Ok(Snapshot {
        shared,
        keys: keys.clone(),
        deadline,
        timer: Mutex::new(Some(timer)),
    })
}

fn run_timer(shared: &Shared, deadline: Instant) {
    let mut state = shared.state.lock();
    while matches!(*state, SnapshotState::Open { .. }) {
        if shared.changed.wait_until(&mut state, deadline).timed_out() {
            match shared.close(&mut state, SnapshotEnd::Expired) {
                Ok(true) => {
                    shared.stats.record_snapshot_expired();
                    debug!("snapshot expired and committed");
                }
                Ok(false) => {}
                Err(err) => warn!(error = %err, "snapshot auto-commit failed"),
            }
            return;
        }
    }
}

impl Snapshot {
    /// Returns the key set.
    #[must_use]
    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    /// Returns when the idle timer fires.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns true until the snapshot commits or fails.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.shared.state.lock(), SnapshotState::Open { .. })
    }

    /// Returns how the snapshot closed, or `None` while open.
    #[must_use]
    pub fn end(&self) -> Option<SnapshotEnd> {
        match &*self.shared.state.lock() {
            SnapshotState::Open { .. } => None,
            SnapshotState::Closed(end) => Some(end.clone()),
        }
    }

    /// Returns a copy of the current entities while open.
    #[must_use]
    pub fn entities(&self) -> Option<EntitySnapshot> {
        match &*self.shared.state.lock() {
            SnapshotState::Open { entities, .. } => Some(entities.clone()),
            SnapshotState::Closed(_) => None,
        }
    }

    /// Runs `f` on the open entities. Edits are committed with the snapshot.
    ///
    /// # Deadlocks
    ///
    /// `f` runs under the snapshot's state lock, which the idle timer also
    /// takes. It must not call any method of the same snapshot, and a long
    /// running `f` delays an expiring commit until it returns.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if the snapshot is already closed.
    pub fn with_entities<R>(&self, f: impl FnOnce(&mut EntitySnapshot) -> R) -> CoreResult<R> {
        match &mut *self.shared.state.lock() {
            SnapshotState::Open { entities, .. } => Ok(f(entities)),
            SnapshotState::Closed(end) => Err(CoreError::invalid(format!(
                "snapshot already closed ({end:?})"
            ))),
        }
    }

    /// Cancels the timer and commits now.
    ///
    /// Safe to call any number of times: once the snapshot is closed,
    /// further calls return [`ReleaseOutcome::AlreadyClosed`].
    ///
    /// # Errors
    ///
    /// Returns the commit error if this call performed a commit that failed.
    pub fn release(&self) -> CoreResult<ReleaseOutcome> {
        let committed = {
            let mut state = self.shared.state.lock();
            self.shared.close(&mut state, SnapshotEnd::Released)
        };
        self.join_timer();

        if committed? {
            debug!(participants = self.keys.len(), "snapshot released");
            Ok(ReleaseOutcome::Committed)
        } else {
            Ok(ReleaseOutcome::AlreadyClosed(
                self.end().unwrap_or(SnapshotEnd::Released),
            ))
        }
    }

    /// Blocks until the snapshot is closed or `timeout` elapses.
    ///
    /// Returns how it closed, or `None` on timeout. A timeout too large to
    /// form a deadline waits without one.
    pub fn wait_closed(&self, timeout: Duration) -> Option<SnapshotEnd> {
        let until = Instant::now().checked_add(timeout);
        let mut state = self.shared.state.lock();
        loop {
            if let SnapshotState::Closed(end) = &*state {
                return Some(end.clone());
            }
            let Some(until) = until else {
                self.shared.changed.wait(&mut state);
                continue;
            };
            if self.shared.changed.wait_until(&mut state, until).timed_out() {
                return match &*state {
                    SnapshotState::Closed(end) => Some(end.clone()),
                    SnapshotState::Open { .. } => None,
                };
            }
        }
    }

    fn join_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            if handle.join().is_err() {
                warn!("snapshot timer thread panicked");
            }
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("keys", &self.keys)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keylock_store::{Document, InMemoryStore, Key};
    use serde_json::json;

    fn setup() -> (Arc<InMemoryStore>, TransactionExecutor, KeySet) {
        let store = Arc::new(InMemoryStore::new());
        let key = Key::name("Persons", "ana");
        store.put_committed(key.clone(), json!({"balance": 10}).as_object().unwrap().clone());
        let executor = TransactionExecutor::in_memory(store.clone());
        (store, executor, KeySet::single("ana", key))
    }

    fn balance(store: &InMemoryStore) -> serde_json::Value {
        store.get_committed(&Key::name("Persons", "ana")).unwrap()["balance"].clone()
    }

    #[test]
    fn holds_locks_until_release() {
        let (store, executor, keys) = setup();
        let snap = capture(&executor, &keys, Duration::from_secs(30)).unwrap();

        assert!(snap.is_open());
        assert_eq!(executor.locks().held_count(), 1);
        assert!(matches!(
            executor.begin(&keys),
            Err(CoreError::LockContention { .. })
        ));

        snap.with_entities(|e| e.get_mut("ana").unwrap()["balance"] = json!(11))
            .unwrap();
        assert_eq!(balance(&store), json!(10));

        assert_eq!(snap.release().unwrap(), ReleaseOutcome::Committed);
        assert_eq!(balance(&store), json!(11));
        assert_eq!(executor.locks().held_count(), 0);
        assert_eq!(snap.end(), Some(SnapshotEnd::Released));
    }

    #[test]
    fn second_release_is_a_noop() {
        let (store, executor, keys) = setup();
        let snap = capture(&executor, &keys, Duration::from_secs(30)).unwrap();

        snap.release().unwrap();
        let commits = store.commit_count();
        assert_eq!(
            snap.release().unwrap(),
            ReleaseOutcome::AlreadyClosed(SnapshotEnd::Released)
        );
        assert_eq!(store.commit_count(), commits);
    }

    #[test]
    fn timer_commits_abandoned_snapshot() {
        let (store, executor, keys) = setup();
        let snap = capture(&executor, &keys, Duration::from_millis(30)).unwrap();
        snap.with_entities(|e| e.get_mut("ana").unwrap()["balance"] = json!(12))
            .unwrap();

        assert_eq!(snap.wait_closed(Duration::from_secs(5)), Some(SnapshotEnd::Expired));
        assert_eq!(balance(&store), json!(12));
        assert_eq!(executor.locks().held_count(), 0);
        assert_eq!(executor.stats().snapshot().snapshots_expired, 1);

        assert_eq!(
            snap.release().unwrap(),
            ReleaseOutcome::AlreadyClosed(SnapshotEnd::Expired)
        );
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn dropped_handle_still_auto_commits() {
        let (store, executor, keys) = setup();
        drop(capture(&executor, &keys, Duration::from_millis(20)).unwrap());

        let until = Instant::now() + Duration::from_secs(5);
        while executor.locks().held_count() > 0 && Instant::now() < until {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executor.locks().held_count(), 0);
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn closed_snapshot_rejects_edits() {
        let (_store, executor, keys) = setup();
        let snap = capture(&executor, &keys, Duration::from_secs(30)).unwrap();
        snap.release().unwrap();

        assert!(snap.entities().is_none());
        assert!(matches!(
            snap.with_entities(|_| ()),
            Err(CoreError::Invalid { .. })
        ));
    }

    #[test]
    fn failed_commit_is_reported_once() {
        let (store, executor, keys) = setup();
        let snap = capture(&executor, &keys, Duration::from_secs(30)).unwrap();
        snap.with_entities(|e| {
            e.insert("ana", Document::new());
        })
        .unwrap();
        store.inject_conflicts(1);

        assert!(matches!(snap.release(), Err(CoreError::CommitConflict { .. })));
        assert!(matches!(
            snap.release().unwrap(),
            ReleaseOutcome::AlreadyClosed(SnapshotEnd::Failed(_))
        ));
        assert_eq!(executor.locks().held_count(), 0);
        assert_eq!(balance(&store), json!(10));
    }

    #[test]
    fn oversized_idle_timeout_is_rejected_before_locking() {
        let (store, executor, keys) = setup();
        let err = capture(&executor, &keys, Duration::MAX).unwrap_err();

        assert!(matches!(err, CoreError::Invalid { .. }));
        assert_eq!(executor.locks().held_count(), 0);
        assert_eq!(executor.stats().snapshot().snapshots_captured, 0);

        let snap = capture(&executor, &keys, Duration::from_secs(30)).unwrap();
        assert_eq!(snap.release().unwrap(), ReleaseOutcome::Committed);
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn unbounded_wait_returns_once_closed() {
        let (_store, executor, keys) = setup();
        let snap = capture(&executor, &keys, Duration::from_secs(30)).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(10));
                snap.release().unwrap();
            });
            assert_eq!(snap.wait_closed(Duration::MAX), Some(SnapshotEnd::Released));
        });
        assert_eq!(snap.wait_closed(Duration::MAX), Some(SnapshotEnd::Released));
    }

    #[test]
    fn entities_edited_in_place_are_visible_after_the_closure() {
        let (_store, executor, keys) = setup();
        let snap = capture(&executor, &keys, Duration::from_secs(30)).unwrap();

        let before = snap
            .with_entities(|e| e.get("ana").and_then(|d| d.get("balance")).cloned())
            .unwrap();
        assert_eq!(before, Some(json!(10)));
        snap.with_entities(|e| e.get_mut("ana").unwrap()["balance"] = json!(15))
            .unwrap();

        assert!(snap.is_open());
        assert_eq!(snap.entities().unwrap().get("ana").unwrap()["balance"], json!(15));
        assert_eq!(snap.release().unwrap(), ReleaseOutcome::Committed);
    }

    #[test]
    fn racing_release_and_timer_commit_once() {
        for _ in 0..20 {
            let (store, executor, keys) = setup();
            let snap = capture(&executor, &keys, Duration::from_millis(2)).unwrap();
            thread::sleep(Duration::from_millis(2));
            let _ = snap.release().unwrap();
            assert_eq!(store.commit_count(), 1);
            assert_eq!(executor.locks().held_count(), 0);
        }
    }
}
