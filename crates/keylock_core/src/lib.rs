//! # keylock Core
//!
//! Multi-key transaction coordinator for document stores.
//!
//! The store underneath offers only optimistic, single-transaction ACID
//! semantics. This crate adds:
//! - Mutual exclusion over arbitrary sets of documents ([`LockCoordinator`])
//! - Atomic read-modify-write over a named key set ([`TransactionExecutor`])
//! - Transparent retry on lock contention and commit conflicts ([`RetryPolicy`])
//! - Transactions held open over an idle window with auto-commit ([`Snapshot`])
//! - Collision-free identity allocation ([`IdentityAllocator`])
//! - Single-entity convenience operations ([`EntityHandle`])
//!
//! ## Usage
//!
//! ```rust
//! use keylock_core::{Coordinator, CoordinatorConfig, KeySet, MutationOutcome};
//! use keylock_store::{InMemoryStore, Key};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let coordinator = Coordinator::new(Arc::new(InMemoryStore::new()), CoordinatorConfig::default());
//! let keys = KeySet::single("counter", Key::name("Counters", "hits"));
//!
//! coordinator
//!     .run_with_retry(&keys, |mut s| {
//!         let doc = s.get_or_create("counter");
//!         let n = doc.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
//!         doc.insert("n".into(), json!(n + 1));
//!         Ok(MutationOutcome::Commit(s))
//!     })
//!     .unwrap();
//! ```
//!
//! ## Timeouts
//!
//! Only snapshots time out. A mutation that never returns holds its locks
//! for as long as it runs.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod allocator;
mod config;
mod coordinator;
mod digest;
mod entity;
mod error;
mod keyset;
mod lock;
pub mod retry;
pub mod snapshot;
mod stats;
mod transaction;

pub use allocator::{IdSource, IdentityAllocator, UuidV4Source};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, QueryResult};
pub use digest::{lock_token, query_fingerprint, LockToken, TOKEN_SIZE};
pub use entity::{EntityHandle, Validator};
pub use error::{CoreError, CoreResult};
pub use keyset::{EntitySnapshot, KeySet};
pub use lock::{LocalLockTable, LockCoordinator, LockGuard, LockOutcome};
pub use retry::{run_with_retry, RetryPolicy};
pub use snapshot::{ReleaseOutcome, Snapshot, SnapshotEnd};
pub use stats::{CoordinatorStats, StatsSnapshot};
pub use transaction::{
    AbortReason, ActiveTransaction, MutationOutcome, TransactionExecutor, TxnOutcome, TxnPhase,
};
