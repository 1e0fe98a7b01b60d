//! Transaction attempt state and mutation outcomes.

use crate::keyset::EntitySnapshot;
use std::fmt;

/// Phase of one transaction attempt.
///
/// An attempt exists only once its tokens are held. It starts `Locked`,
/// moves through `Reading -> Executing -> Saving` and ends in exactly one of `Committed`, `RolledBack` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnPhase {
    /// Lock tokens held, store transaction started.
    Locked,
    /// Reading every participant.
    Reading,
    /// Caller mutation running.
    Executing,
    /// Staging writes and committing.
    Saving,
    /// Store commit succeeded.
    Committed,
    /// Caller asked for rollback.
    RolledBack,
    /// Ended by an error.
    Aborted(AbortReason),
}

impl TxnPhase {
    /// Returns true once the attempt has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TxnPhase::Committed | TxnPhase::RolledBack | TxnPhase::Aborted(_)
        )
    }
}

/// Why an attempt was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The caller's mutation returned an error.
    Mutation,
    /// The committed snapshot broke the transaction contract.
    Contract,
    /// The store refused the commit.
    CommitConflict,
    /// A store read, write or commit failed.
    Store,
    /// The handle was dropped before finishing.
    Abandoned,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::Mutation => "mutation failed",
            AbortReason::Contract => "contract violation",
            AbortReason::CommitConflict => "commit conflict",
            AbortReason::Store => "store failure",
            AbortReason::Abandoned => "abandoned",
        };
        f.write_str(text)
    }
}

/// What a mutation asks the executor to do.
///
/// Failures are reported through the `Err` side of the mutation's result
/// and always roll back.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Save every entry of the snapshot and commit.
    Commit(EntitySnapshot),
    /// Discard everything and release the locks.
    Rollback,
}

/// Result of a finished transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnOutcome {
    /// Committed; carries the saved snapshot.
    Committed(EntitySnapshot),
    /// Rolled back at the caller's request.
    RolledBack,
}

impl TxnOutcome {
    /// Returns true if the transaction committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, TxnOutcome::Committed(_))
    }

    /// Returns the committed snapshot, if any.
    #[must_use]
    pub fn into_committed(self) -> Option<EntitySnapshot> {
        match self {
            TxnOutcome::Committed(snapshot) => Some(snapshot),
            TxnOutcome::RolledBack => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(!TxnPhase::Locked.is_terminal());
        assert!(!TxnPhase::Saving.is_terminal());
        assert!(TxnPhase::Committed.is_terminal());
        assert!(TxnPhase::RolledBack.is_terminal());
        assert!(TxnPhase::Aborted(AbortReason::Store).is_terminal());
    }

    #[test]
    fn outcome_accessors() {
        let committed = TxnOutcome::Committed(EntitySnapshot::default());
        assert!(committed.is_committed());
        assert!(committed.into_committed().is_some());
        assert!(TxnOutcome::RolledBack.into_committed().is_none());
    }
}
