//! Coordinator statistics.
//!
//! Counters are updated by the executor, retry engine, snapshot and
//! allocator, and can be read while transactions are in flight.
//!
//! # Usage
//!
//! ```rust,ignore
//! let coordinator = Coordinator::new(store, CoordinatorConfig::default());
//! // ... run transactions ...
//! let stats = coordinator.stats().snapshot();
//! println!("committed: {}", stats.transactions_committed);
//! println!("contention: {}", stats.lock_contentions);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live coordinator counters.
///
/// All counters are monotonically increasing.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    lock_contentions: AtomicU64,
    commit_conflicts: AtomicU64,
    retries: AtomicU64,
    snapshots_captured: AtomicU64,
    snapshots_expired: AtomicU64,
    identities_allocated: AtomicU64,
    allocation_collisions: AtomicU64,
}

impl CoordinatorStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_contention(&self) {
        self.lock_contentions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.commit_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot_captured(&self) {
        self.snapshots_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot_expired(&self) {
        self.snapshots_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_allocation(&self) {
        self.identities_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_collision(&self) {
        self.allocation_collisions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            commit_conflicts: self.commit_conflicts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            snapshots_captured: self.snapshots_captured.load(Ordering::Relaxed),
            snapshots_expired: self.snapshots_expired.load(Ordering::Relaxed),
            identities_allocated: self.identities_allocated.load(Ordering::Relaxed),
            allocation_collisions: self.allocation_collisions.load(Ordering::Relaxed),
        }
    }
}

/// A copy of [`CoordinatorStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Attempts that acquired their locks and began a store transaction.
    pub transactions_started: u64,
    /// Attempts that committed.
    pub transactions_committed: u64,
    /// Attempts that rolled back for any reason.
    pub transactions_rolled_back: u64,
    /// Attempts refused by the lock coordinator.
    pub lock_contentions: u64,
    /// Commits refused by the store.
    pub commit_conflicts: u64,
    /// Retries scheduled by the retry engine.
    pub retries: u64,
    /// Snapshots opened.
    pub snapshots_captured: u64,
    /// Snapshots committed by their idle timer.
    pub snapshots_expired: u64,
    /// Identities claimed by the allocator.
    pub identities_allocated: u64,
    /// Allocator candidates that were already taken.
    pub allocation_collisions: u64,
}
