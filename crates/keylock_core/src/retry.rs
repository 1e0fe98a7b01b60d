//! Retry engine: transparent retry on lock contention and commit conflicts.

use crate::error::{CoreError, CoreResult};
use crate::keyset::{EntitySnapshot, KeySet};
use crate::transaction::{MutationOutcome, TransactionExecutor, TxnOutcome};
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for retry behavior.
///
/// Each retry waits a delay drawn uniformly from `[min_delay, max_delay]`,
/// which spreads contending callers apart in time. There is no exponential
/// growth. With no cap configured, retries continue until the attempt
/// stops failing with a retryable error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Lower bound of the backoff delay.
    pub min_delay: Duration,
    /// Upper bound of the backoff delay.
    pub max_delay: Duration,
    /// Maximum number of attempts, including the first.
    pub max_attempts: Option<u32>,
    /// Maximum wall-clock time across all attempts.
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Creates the default unbounded policy with a 500-1000 ms backoff.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1000),
            max_attempts: None,
            max_elapsed: None,
        }
    }

    /// Creates a policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts: Some(1),
            max_elapsed: None,
        }
    }

    /// Sets the backoff interval.
    #[must_use]
    pub fn with_delay_range(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max.max(min);
        self
    }

    /// Caps the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Caps the total time spent retrying.
    #[must_use]
    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = Some(elapsed);
        self
    }

    /// Draws the next backoff delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let low = duration_nanos(self.min_delay);
        let high = duration_nanos(self.max_delay);
        Duration::from_nanos(rand::thread_rng().gen_range(low..=high))
    }

    /// Returns true if no further attempt is allowed.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.max_elapsed.is_some_and(|max| elapsed >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Runs `mutation` as a transaction over `keys`, retrying on contention.
///
/// Only [`CoreError::LockContention`] and [`CoreError::CommitConflict`] are
/// retried; every other error, including the mutation's own rejections,
/// is returned on the attempt that produced it. Each retry is a fresh
/// attempt with its own locks and store transaction.
///
/// # Errors
///
/// Returns the first non-retryable error, or [`CoreError::RetryExhausted`]
/// if the policy's cap is reached.
pub fn run_with_retry<F>(
    executor: &TransactionExecutor,
    keys: &KeySet,
    mut mutation: F,
    policy: &RetryPolicy,
) -> CoreResult<TxnOutcome>
where
    F: FnMut(EntitySnapshot) -> CoreResult<MutationOutcome>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);
        let err = match executor.execute(keys, &mut mutation) {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.is_retryable() => err,
            Err(err) => return Err(err),
        };

        let elapsed = started.elapsed();
        if policy.is_exhausted(attempts, elapsed) {
            warn!(attempts, ?elapsed, error = %err, "retry exhausted");
            return Err(CoreError::RetryExhausted {
                attempts,
                elapsed,
                last: Box::new(err),
            });
        }

        let delay = policy.delay();
        executor.stats().record_retry();
        debug!(attempt = attempts, ?delay, error = %err, "retrying transaction");
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keylock_store::{InMemoryStore, Key};
    use serde_json::json;
    use std::cell::Cell;
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy::new().with_delay_range(Duration::from_millis(1), Duration::from_millis(2))
    }

    fn keys() -> KeySet {
        KeySet::single("self", Key::name("Persons", "ana"))
    }

    #[test]
    fn default_policy_is_unbounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.min_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_millis(1000));
        assert!(!policy.is_exhausted(u32::MAX, Duration::from_secs(3600)));
    }

    #[test]
    fn delay_stays_in_range() {
        let policy = RetryPolicy::new();
        for _ in 0..100 {
            let delay = policy.delay();
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn degenerate_range_returns_min() {
        let policy = RetryPolicy::new().with_delay_range(Duration::from_millis(5), Duration::ZERO);
        assert_eq!(policy.delay(), Duration::from_millis(5));
    }

    #[test]
    fn caps() {
        let policy = RetryPolicy::new().with_max_attempts(3);
        assert!(!policy.is_exhausted(2, Duration::ZERO));
        assert!(policy.is_exhausted(3, Duration::ZERO));

        let policy = RetryPolicy::new().with_max_elapsed(Duration::from_millis(10));
        assert!(policy.is_exhausted(1, Duration::from_millis(10)));
        assert!(RetryPolicy::no_retry().is_exhausted(1, Duration::ZERO));
    }

    #[test]
    fn commit_conflicts_are_retried() {
        let store = Arc::new(InMemoryStore::new());
        let executor = TransactionExecutor::in_memory(store.clone());
        store.inject_conflicts(2);

        let calls = Cell::new(0);
        let outcome = run_with_retry(
            &executor,
            &keys(),
            |mut s| {
                calls.set(calls.get() + 1);
                s.get_or_create("self").insert("n".into(), json!(1));
                Ok(MutationOutcome::Commit(s))
            },
            &fast(),
        )
        .unwrap();

        assert!(outcome.is_committed());
        assert_eq!(calls.get(), 3);
        assert_eq!(executor.stats().snapshot().retries, 2);
    }

    #[test]
    fn rejections_are_never_retried() {
        let store = Arc::new(InMemoryStore::new());
        let executor = TransactionExecutor::in_memory(store);

        let calls = Cell::new(0);
        let err = run_with_retry(
            &executor,
            &keys(),
            |_| {
                calls.set(calls.get() + 1);
                Err(CoreError::rejected("no"))
            },
            &fast(),
        )
        .unwrap_err();

        assert!(matches!(err, CoreError::ValidationRejected { .. }));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn store_unavailable_is_not_retried() {
        let store = Arc::new(InMemoryStore::new());
        let executor = TransactionExecutor::in_memory(store.clone());
        store.set_available(false);

        let err = run_with_retry(&executor, &keys(), |s| Ok(MutationOutcome::Commit(s)), &fast())
            .unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
        assert_eq!(executor.stats().snapshot().retries, 0);
    }

    #[test]
    fn contention_cap_reports_retry_exhausted() {
        let store = Arc::new(InMemoryStore::new());
        let executor = TransactionExecutor::in_memory(store);
        let _blocker = executor.begin(&keys()).unwrap();

        let err = run_with_retry(
            &executor,
            &keys(),
            |s| Ok(MutationOutcome::Commit(s)),
            &fast().with_max_attempts(3),
        )
        .unwrap_err();

        match err {
            CoreError::RetryExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, CoreError::LockContention { .. }));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }
}
