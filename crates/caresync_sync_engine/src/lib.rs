//! # CareSync Sync Engine
//!
//! Upload and download between a local [`caresync_core::RecordStore`] and
//! a remote server.
//!
//! This crate provides:
//! - Squashing of pending changes into upload requests, bundled or per record
//! - Reference-aware upload ordering
//! - Consolidation of server responses, including id renumbering and the
//!   rewrite of every local reference to a renumbered record
//! - Paged download with a persisted, resumable watermark
//! - Pluggable conflict resolution against pending local changes
//! - A transport seam with a scripted mock and a CBOR loopback transport
//!
//! ## Architecture
//!
//! Each cycle runs as tokio tasks joined by bounded channels. Only the
//! [`Transport`] calls suspend; everything touching the store is a short
//! synchronous transaction.
//!
//! ## Key Invariants
//!
//! - A token discards exactly the changes it was built from
//! - A download cursor never moves past a page that was not fully applied
//! - Renumbering a record and rewriting its referrers commit together
//! - No automatic retries; a failed cycle leaves its work pending

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod download;
mod engine;
mod error;
mod loopback;
mod state;
mod transport;
pub mod upload;

pub use config::{CreateMode, DownloadTypeConfig, EscalationPolicy, SyncConfig, UploadStrategy};
pub use download::{
    AcceptLocalResolver, AcceptRemoteResolver, ConflictResolver, DownloadCursor, DownloadState,
    FnResolver, LastUpdatedWinsResolver, Resolution,
};
pub use engine::{Engine, SyncCycleReport};
pub use error::{SyncError, SyncResult};
pub use loopback::{CborTransport, LoopbackClient, LoopbackServer, MessageClient};
pub use state::{
    DownloadReport, Pipeline, RecordFailure, Renumbering, SyncStats, TypeDownload, UploadReport,
};
pub use transport::{MockTransport, Transport};
