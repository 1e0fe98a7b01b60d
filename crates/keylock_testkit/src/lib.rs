//! # keylock Testkit
//!
//! Test utilities for keylock.
//!
//! This crate provides:
//! - An in-memory coordinator fixture with a fast retry policy
//! - Account transfer and increment scenarios
//! - An event log for checking mutual exclusion
//! - Property-based generators using proptest
//! - Concurrent stress helpers
//! - Tracing setup and log capture for tests
//!
//! ## Usage
//!
//! ```rust
//! use keylock_testkit::prelude::*;
//!
//! with_coordinator(|t| {
//!     let ana = t.seed_account("ana", 100);
//!     let bob = t.seed_account("bob", 0);
//!     scenarios::transfer(t, &ana, &bob, 40).unwrap();
//!     assert_eq!(t.balance(&bob), Some(40));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::events::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use events::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
