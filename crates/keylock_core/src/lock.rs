//! Lock coordinator: all-or-nothing mutual exclusion over lock tokens.

use crate::digest::LockToken;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Result of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Every requested token is now held by the caller.
    Acquired,
    /// At least one token was already held; nothing was acquired.
    Blocked,
}

/// Serializes access to sets of lock tokens.
///
/// One instance is created per process (or per shared lock service) and
/// shared by reference among every caller. Implementations backed by a
/// shared store can extend mutual exclusion across processes.
///
/// # Contract
///
/// - `try_lock` is all-or-nothing and atomic relative to other `try_lock`
///   calls; it never waits
/// - `release` ignores tokens that are not held and is idempotent
/// - No fairness or queueing order is promised; callers make progress by
///   retrying with backoff
pub trait LockCoordinator: Send + Sync {
    /// Attempts to take every token in `tokens`.
    fn try_lock(&self, tokens: &[LockToken]) -> LockOutcome;

    /// Releases `tokens`.
    fn release(&self, tokens: &[LockToken]);

    /// Returns the number of tokens currently held.
    fn held_count(&self) -> usize;

    /// Returns true if `token` is currently held.
    fn is_held(&self, token: &LockToken) -> bool;
}

/// In-process lock table.
///
/// Backed by a hash set behind a single mutex, so a request costs
/// O(requested) rather than a scan of every held token.
#[derive(Default)]
pub struct LocalLockTable {
    held: Mutex<HashSet<LockToken>>,
}

impl LocalLockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockCoordinator for LocalLockTable {
    fn try_lock(&self, tokens: &[LockToken]) -> LockOutcome {
        let mut held = self.held.lock();
        if tokens.iter().any(|t| held.contains(t)) {
            trace!(requested = tokens.len(), "lock blocked");
            return LockOutcome::Blocked;
        }
        held.extend(tokens.iter().copied());
        trace!(requested = tokens.len(), held = held.len(), "lock acquired");
        LockOutcome::Acquired
    }

    fn release(&self, tokens: &[LockToken]) {
        let mut held = self.held.lock();
        for token in tokens {
            held.remove(token);
        }
        trace!(released = tokens.len(), held = held.len(), "lock released");
    }

    fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn is_held(&self, token: &LockToken) -> bool {
        self.held.lock().contains(token)
    }
}

impl fmt::Debug for LocalLockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalLockTable")
            .field("held", &self.held_count())
            .finish()
    }
}

/// Tokens held on behalf of one transaction attempt.
///
/// The tokens are released when the guard is dropped, so every exit path
/// of the owner (success, error, panic unwinding) gives them back.
pub struct LockGuard {
    locks: Arc<dyn LockCoordinator>,
    tokens: Vec<LockToken>,
}

impl LockGuard {
    /// Takes `tokens` from `locks`.
    ///
    /// `tokens` must already be deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockContention`] if any token is held elsewhere.
    pub fn acquire(locks: &Arc<dyn LockCoordinator>, tokens: Vec<LockToken>) -> CoreResult<Self> {
        match locks.try_lock(&tokens) {
            LockOutcome::Acquired => Ok(Self {
                locks: Arc::clone(locks),
                tokens,
            }),
            LockOutcome::Blocked => Err(CoreError::LockContention {
                requested: tokens.len(),
            }),
        }
    }

    /// Returns the held tokens.
    #[must_use]
    pub fn tokens(&self) -> &[LockToken] {
        &self.tokens
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.tokens);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("tokens", &self.tokens.len())
            .finish_non_exhaustive()
    }
}
