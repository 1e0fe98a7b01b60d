//! # keylock Store
//!
//! The document store boundary consumed by the keylock coordinator.
//!
//! The coordinator does not own storage. It drives an external,
//! eventually-consistent document store that offers only optimistic
//! single-transaction ACID semantics. This crate defines that boundary and
//! ships an in-memory reference implementation.
//!
//! ## Design Principles
//!
//! - Stores address documents by [`Key`] (namespace, kind, name-or-id)
//! - Document bodies are untyped records ([`Document`])
//! - Transactions stage writes and detect write-write conflicts at commit
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and embedding
//!
//! ## Example
//!
//! ```rust
//! use keylock_store::{DocumentStore, FilterOp, InMemoryStore, Key, Query};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! store.put_committed(
//!     Key::name("Persons", "ana"),
//!     json!({"balance": 100}).as_object().unwrap().clone(),
//! );
//!
//! let page = store
//!     .run_query(&Query::new("Persons").filter("balance", FilterOp::Ge, 50))
//!     .unwrap();
//! assert_eq!(page.entities.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod document;
mod error;
mod key;
mod memory;
mod query;

pub use backend::{DocumentStore, StoreTransaction};
pub use document::{compare_values, project, sort_order, Document};
pub use error::{StoreError, StoreResult};
pub use key::{Key, KeyPath};
pub use memory::InMemoryStore;
pub use query::{Cursor, Direction, Filter, FilterOp, Order, Query, QueryPage};
pub use serde_json::Value;
