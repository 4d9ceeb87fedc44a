//! # CareSync Core
//!
//! Offline record store for CareSync.
//!
//! This crate provides:
//! - A record table keyed by `(record_type, external_id)` with stable
//!   local uuids
//! - A per-record change log and the squash that folds it for upload
//! - A reference index over the string references between records
//! - Per-record locks and atomic transactions
//! - A checksummed append-only journal with crash recovery and compaction
//! - Optional AES-256-GCM sealing of journal frames (`encryption` feature)
//!
//! ## Usage
//!
//! ```
//! use caresync_core::{RecordStore, SquashedOperation};
//! use serde_json::json;
//!
//! let store = RecordStore::open_in_memory().unwrap();
//! let patient = store.create("Patient", json!({"id": "tmp-1"})).unwrap();
//! store
//!     .create("Observation", json!({"subject": {"reference": "Patient/tmp-1"}}))
//!     .unwrap();
//!
//! assert_eq!(store.referrers("Patient/tmp-1").len(), 1);
//!
//! let squashed = store.squashed(patient.record_uuid).unwrap().unwrap();
//! assert!(matches!(squashed.operation, SquashedOperation::Insert(_)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change;
mod config;
pub mod crypto;
mod error;
pub mod journal;
mod lock;
mod record;
mod reference;
mod schema;
mod stats;
mod store;
mod types;

pub use change::{
    squash, ChangeKind, ChangeLog, ChangeLogEntry, ChangeToken, SquashedChange,
    SquashedOperation,
};
pub use config::StoreConfig;
pub use crypto::{EncryptionKey, FrameCipher};
pub use error::{CoreError, CoreResult};
pub use journal::{FrameInfo, JournalBackend, MemoryJournal};
#[cfg(feature = "std")]
pub use journal::FileJournal;
pub use lock::{LockTable, RecordLocks};
pub use record::{RecordKey, RecordRow};
pub use reference::{ReferenceIndex, ReferenceIndexEntry};
pub use schema::{read_id, write_id, DeclaredReferenceFields, NamedReferenceMembers, RecordSchema};
pub use stats::{StoreCounters, StoreStats, TypeStats};
pub use store::{RecordStore, StoreTransaction};
pub use types::{ChangeId, RecordUuid, SequenceNumber};
