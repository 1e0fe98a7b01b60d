//! Transaction execution over a key set.
//!
//! Each attempt:
//! - **Locks** every participant, all-or-nothing, before touching the store
//! - **Reads** every participant inside one store transaction
//! - **Mutates** through a caller function returning a [`MutationOutcome`]
//! - **Saves** every participant and commits atomically, or rolls back
//!
//! Lock tokens are released on every exit path.

mod executor;
mod state;

pub use executor::{ActiveTransaction, TransactionExecutor};
pub use state::{AbortReason, MutationOutcome, TxnOutcome, TxnPhase};
