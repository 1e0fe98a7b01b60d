//! Collision-free identity allocation.

use crate::error::{CoreError, CoreResult};
use crate::keyset::KeySet;
use crate::transaction::{MutationOutcome, TransactionExecutor, TxnOutcome};
use keylock_store::{Document, Key};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const SLOT: &str = "slot";

/// Source of candidate identity names.
pub trait IdSource: Send + Sync {
    /// Returns a new candidate name.
    fn next_id(&self) -> String;
}

/// Random version 4 UUIDs in hyphenated form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV4Source;

impl IdSource for UuidV4Source {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Claims fresh identities by writing an empty placeholder document.
///
/// Each candidate is tested and reserved in its own single-key
/// transaction. A candidate whose slot is already occupied, or whose
/// transaction loses a race, is discarded and a new one generated. The
/// same candidate is never retried.
#[derive(Clone)]
pub struct IdentityAllocator {
    executor: TransactionExecutor,
    ids: Arc<dyn IdSource>,
    max_attempts: u32,
}

impl IdentityAllocator {
    /// Creates an allocator drawing UUIDv4 candidates.
    pub fn new(executor: TransactionExecutor, max_attempts: u32) -> Self {
        Self::with_source(executor, Arc::new(UuidV4Source), max_attempts)
    }

    /// Creates an allocator with a custom candidate source.
    pub fn with_source(
        executor: TransactionExecutor,
        ids: Arc<dyn IdSource>,
        max_attempts: u32,
    ) -> Self {
        Self {
            executor,
            ids,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Claims a fresh identity of `kind` in the default namespace.
    ///
    /// # Errors
    ///
    /// See [`IdentityAllocator::allocate_in`].
    pub fn allocate(&self, kind: &str) -> CoreResult<Key> {
        self.allocate_in(None, kind)
    }

    /// Claims a fresh identity of `kind` in `namespace`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Invalid`] if `kind` is empty
    /// - [`CoreError::StoreUnavailable`] on store failure
    /// - [`CoreError::RetryExhausted`] if every candidate was taken
    pub fn allocate_in(&self, namespace: Option<&str>, kind: &str) -> CoreResult<Key> {
        let started = Instant::now();
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            let mut candidate = Key::name(kind, self.ids.next_id());
            if let Some(ns) = namespace {
                candidate = candidate.with_namespace(ns);
            }
            let keys = KeySet::single(SLOT, candidate.clone());

            let result = self.executor.execute(&keys, |mut snapshot| {
                if snapshot.exists(SLOT) {
                    return Ok(MutationOutcome::Rollback);
                }
                snapshot.insert(SLOT, Document::new());
                Ok(MutationOutcome::Commit(snapshot))
            });

            let err = match result {
                Ok(TxnOutcome::Committed(_)) => {
                    self.executor.stats().record_allocation();
                    debug!(key = %candidate, attempt, "identity allocated");
                    return Ok(candidate);
                }
                Ok(TxnOutcome::RolledBack) => {
                    CoreError::invalid(format!("identity {candidate} already taken"))
                }
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            self.executor.stats().record_collision();
            debug!(key = %candidate, attempt, error = %err, "candidate identity rejected");
            last = Some(err);
        }

        Err(CoreError::RetryExhausted {
            attempts: self.max_attempts,
            elapsed: started.elapsed(),
            last: Box::new(
                last.unwrap_or_else(|| CoreError::invalid("no candidate identity was tried")),
            ),
        })
    }
}

impl fmt::Debug for IdentityAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityAllocator")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
