//! Stress helpers for the coordinator.
//!
//! These drive many concurrent transactions through one coordinator and
//! report how many succeeded.

use crate::fixtures::scenarios;
use keylock_core::Coordinator;
use keylock_store::Key;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Logs a summary of the run.
    pub fn log_summary(&self, name: &str) {
        tracing::info!(
            name,
            total = self.total_ops,
            successful = self.successful_ops,
            failed = self.failed_ops,
            duration = ?self.duration,
            ops_per_second = self.ops_per_second,
            "stress run finished"
        );
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Operations issued by each thread.
    pub operations_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            operations_per_thread: 25,
        }
    }
}

impl StressConfig {
    /// Returns the total number of operations.
    pub fn total(&self) -> usize {
        self.threads * self.operations_per_thread
    }
}

/// Increments the balance of `key` once per operation from every thread.
pub fn stress_concurrent_increments(
    coordinator: &Coordinator,
    key: &Key,
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|s| {
        for _ in 0..config.threads {
            s.spawn(|| {
                for _ in 0..config.operations_per_thread {
                    match scenarios::increment(coordinator, key, 1) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}

/// Runs transfers between neighbouring accounts from every thread.
///
/// Amounts cycle through 1..=`max_amount`, so with small balances some
/// transfers are rejected as overdrafts. The total across `accounts` is
/// preserved whatever the mix of outcomes.
pub fn stress_ring_transfers(
    coordinator: &Coordinator,
    accounts: &[Key],
    max_amount: i64,
    config: &StressConfig,
) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();
    let n = accounts.len();

    if n >= 2 {
        thread::scope(|s| {
            for t in 0..config.threads {
                let successful = &successful;
                let failed = &failed;
                s.spawn(move || {
                    for i in 0..config.operations_per_thread {
                        let from = &accounts[(t + i) % n];
                        let to = &accounts[(t + i + 1) % n];
                        let amount = (i as i64 % max_amount.max(1)) + 1;
                        match scenarios::transfer(coordinator, from, to, amount) {
                            Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                            Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                        };
                    }
                });
            }
        });
    }

    StressTestResult::new(
        successful.into_inner(),
        failed.into_inner(),
        start.elapsed(),
    )
}
