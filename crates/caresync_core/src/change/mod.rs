//! Change tracking.
//!
//! Every local mutation appends a [`ChangeLogEntry`] in the same
//! transaction that writes the record. Before upload, the pending entries
//! of a record are [`squash`]ed into one [`SquashedChange`] carrying a
//! [`ChangeToken`]; acknowledging the upload discards exactly the ids of
//! that token.
//!
//! ## Invariants
//!
//! - Per record, INSERT is only ever first and DELETE only ever last
//! - Change ids increase monotonically and are never reused
//! - Entries are appended and deleted whole; payloads are rewritten in
//!   place only by reference consolidation and conflict rebase

mod entry;
mod log;
mod squash;

pub use entry::{ChangeKind, ChangeLogEntry, ChangeToken};
pub use log::ChangeLog;
pub(crate) use log::check_append;
pub use squash::{squash, SquashedChange, SquashedOperation};
