//! # CareSync Sync Server
//!
//! In-process reference server for CareSync.
//!
//! This crate provides:
//! - Upload handling for PUT, POST, PATCH and DELETE entries, bundled or
//!   single, with version checks against `if_match`
//! - Server-assigned ids for POST, with references to them resolved
//!   inside the same bundle
//! - Paged downloads ordered by modification time, tombstones included
//! - A CBOR byte entry point for loopback transports
//!
//! # Architecture
//!
//! The server keeps its records in memory behind one lock. A logical clock
//! gives every write a distinct, increasing modification time so that
//! clients can use the latest time they saw as a download watermark.
//!
//! There is no network listener; a client reaches the server through
//! [`SyncServer::handle_bytes`] or the typed handlers.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod records;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use records::{LogicalClock, RecordTable, StoredRecord};
pub use server::SyncServer;
