//! Coordinator configuration.

use crate::retry::RetryPolicy;
use std::time::Duration;

/// Configuration for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Retry policy used by `run_with_retry` and the entity facade.
    pub retry: RetryPolicy,

    /// How long a snapshot may stay open before it auto-commits.
    pub snapshot_idle_timeout: Duration,

    /// Candidate identities the allocator tries before giving up.
    pub max_allocation_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            snapshot_idle_timeout: Duration::from_secs(30),
            max_allocation_attempts: 16,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the snapshot idle timeout.
    #[must_use]
    pub const fn snapshot_idle_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_idle_timeout = timeout;
        self
    }

    /// Sets the allocator attempt bound (at least one).
    #[must_use]
    pub const fn max_allocation_attempts(mut self, attempts: u32) -> Self {
        self.max_allocation_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.snapshot_idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_allocation_attempts, 16);
        assert_eq!(config.retry, RetryPolicy::new());
    }

    #[test]
    fn builder_pattern() {
        let config = CoordinatorConfig::new()
            .retry(RetryPolicy::no_retry())
            .snapshot_idle_timeout(Duration::from_millis(50))
            .max_allocation_attempts(0);

        assert_eq!(config.retry.max_attempts, Some(1));
        assert_eq!(config.snapshot_idle_timeout, Duration::from_millis(50));
        assert_eq!(config.max_allocation_attempts, 1);
    }
}
