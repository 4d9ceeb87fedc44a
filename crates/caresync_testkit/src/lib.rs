//! # CareSync Testkit
//!
//! Test utilities for CareSync.
//!
//! This crate provides:
//! - Test stores (in memory or on a temporary journal file) and clinical
//!   payload builders
//! - Property-based generators for payloads and edit sequences
//! - Concurrent edit stress runs against a store
//!
//! ## Usage
//!
//! ```rust
//! use caresync_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     let row = store.create("Patient", patient("p1", "Ann")).unwrap();
//!     assert_eq!(row.external_id, "p1");
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
