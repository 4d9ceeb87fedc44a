//! # CareSync Sync Protocol
//!
//! Message types exchanged between a CareSync client and server.
//!
//! This crate provides:
//! - Upload requests in bundled and single shapes, with per-entry outcomes
//! - Paged download requests and remote records
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations. The sync engine
//! itself is encoding agnostic; CBOR is used by the reference transport.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod download;
mod error;
mod messages;
mod upload;

pub use download::{DownloadPage, DownloadRequest, RemoteRecord};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{decode, encode, SyncMessage};
pub use upload::{EntryOutcome, UploadBody, UploadEntry, UploadRequest, UploadResponse, Verb};
