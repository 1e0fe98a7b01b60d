//! Concurrency properties: exclusion, no leaks, no lost updates.

use keylock_core::{CoreError, KeySet, MutationOutcome};
use keylock_store::Key;
use keylock_testkit::prelude::*;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

#[test]
fn overlapping_transactions_never_overlap_in_time() {
    init_tracing();
    let t = TestCoordinator::new();
    let hot = t.seed_account("hot", 0);
    let log = EventLog::new();

    thread::scope(|s| {
        for worker in 0..6 {
            let t = &t;
            let log = &log;
            let hot = hot.clone();
            s.spawn(move || {
                let own = Key::name(ACCOUNT_KIND, format!("own-{worker}"));
                let keys = KeySet::new().with("hot", hot).with("own", own);
                for i in 0..5 {
                    let id = worker * 100 + i;
                    t.run_with_retry(&keys, |s| {
                        log.enter(id);
                        thread::sleep(Duration::from_millis(1));
                        log.exit(id);
                        Ok(MutationOutcome::Commit(s))
                    })
                    .unwrap();
                }
            });
        }
    });

    log.assert_exclusive();
    assert_eq!(log.events().len(), 60);
    assert_eq!(t.locks().held_count(), 0);
}

#[test]
fn twenty_concurrent_increments_add_exactly_twenty() {
    let t = TestCoordinator::new();
    let key = t.seed_account("counter", 5);

    let result = stress_concurrent_increments(
        &t,
        &key,
        &StressConfig {
            threads: 20,
            operations_per_thread: 1,
        },
    );
    result.log_summary("increments");

    assert_eq!(result.successful_ops, 20);
    assert_eq!(result.failed_ops, 0);
    assert_eq!(t.balance(&key), Some(25));
    assert_eq!(t.locks().held_count(), 0);
}

#[test]
fn increments_survive_injected_conflicts() {
    let t = TestCoordinator::new();
    let key = t.seed_account("counter", 0);
    t.store.inject_conflicts(5);

    let config = StressConfig {
        threads: 4,
        operations_per_thread: 5,
    };
    let result = stress_concurrent_increments(&t, &key, &config);

    assert_eq!(result.successful_ops, config.total());
    assert_eq!(t.balance(&key), Some(20));
    assert_eq!(t.stats().commit_conflicts, 5);
}

#[test]
fn mixed_outcomes_leave_no_held_tokens() {
    let t = TestCoordinator::new();
    let accounts: Vec<Key> = (0..4)
        .map(|i| t.seed_account(&format!("acct-{i}"), 3))
        .collect();

    let config = StressConfig {
        threads: 6,
        operations_per_thread: 10,
    };
    let result = stress_ring_transfers(&t, &accounts, 5, &config);

    assert_eq!(result.total_ops, config.total());
    assert!(result.failed_ops > 0, "expected some overdraft rejections");
    assert_eq!(t.locks().held_count(), 0);

    let total: i64 = accounts.iter().filter_map(|k| t.balance(k)).sum();
    assert_eq!(total, 12);
}

#[test]
fn contention_without_retry_leaves_no_held_tokens() {
    let t = TestCoordinator::new();
    let key = t.seed_account("hot", 0);
    let keys = KeySet::single("self", key);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..10 {
                    let result = t.run_with_policy(
                        &keys,
                        |s| {
                            thread::sleep(Duration::from_micros(200));
                            Ok(MutationOutcome::Commit(s))
                        },
                        &keylock_core::RetryPolicy::no_retry(),
                    );
                    match result {
                        Ok(_) | Err(CoreError::RetryExhausted { .. }) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            });
        }
    });

    assert_eq!(t.locks().held_count(), 0);
    let stats = t.stats();
    assert_eq!(
        stats.transactions_started,
        stats.transactions_committed + stats.transactions_rolled_back
    );
}

#[test]
fn disjoint_key_sets_do_not_block_each_other() {
    let t = TestCoordinator::new();
    let a = KeySet::single("self", t.seed_account("a", 0));
    let b = KeySet::single("self", t.seed_account("b", 0));

    let _held = t.transaction(&a).unwrap();
    let outcome = t
        .execute(&b, |s| Ok(MutationOutcome::Commit(s)))
        .unwrap();
    assert!(outcome.is_committed());
}

#[test]
fn concurrent_allocations_are_distinct_and_claimed() {
    let t = TestCoordinator::new();

    let keys: Vec<Key> = thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|_| {
                s.spawn(|| {
                    (0..4)
                        .map(|_| t.allocate("Orders").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let distinct: HashSet<&Key> = keys.iter().collect();
    assert_eq!(distinct.len(), 64);
    for key in &keys {
        assert!(t.document(key).is_some(), "{key} was not claimed");
    }
    assert_eq!(t.stats().identities_allocated, 64);
}
