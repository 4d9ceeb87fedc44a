//! Error types for CareSync core.

use crate::types::{ChangeId, RecordUuid};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in record store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No live record exists for the given key.
    #[error("record not found: {record_type}/{external_id}")]
    NotFound {
        /// Record type.
        record_type: String,
        /// External identifier.
        external_id: String,
    },

    /// A record with the same key already exists (tombstones included).
    #[error("duplicate record: {record_type}/{external_id}")]
    DuplicateRecord {
        /// Record type.
        record_type: String,
        /// External identifier.
        external_id: String,
    },

    /// The pending changes of a record violate the INSERT-first,
    /// DELETE-last ordering.
    #[error("malformed change sequence for record {record_uuid}: {message}")]
    MalformedChangeSequence {
        /// Record whose changes are malformed.
        record_uuid: RecordUuid,
        /// Description of the violation.
        message: String,
    },

    /// Patch codec error.
    #[error("codec error: {0}")]
    Codec(#[from] caresync_codec::CodecError),

    /// Journal write or decode error.
    #[error("journal error: {message}")]
    Journal {
        /// Description of the failure.
        message: String,
    },

    /// A checksum mismatch or undecodable frame before the journal tail.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the journal.
    #[error("journal locked: another process has exclusive access")]
    JournalLocked,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A transaction wrote to a record it did not lock.
    #[error("record {record_uuid} is not locked by this transaction")]
    LockedRecordMissing {
        /// Record that was written without a lock.
        record_uuid: RecordUuid,
    },

    /// Record locks could not be acquired in time.
    #[error("timed out waiting for record locks")]
    LockTimeout,

    /// A referenced change log entry does not exist.
    #[error("change not found: {0}")]
    ChangeNotFound(ChangeId),

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The crate was built without the `encryption` feature.
    #[error("encryption feature not enabled")]
    EncryptionNotEnabled,

    /// Sealing a journal frame failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// A journal frame could not be opened with the configured key.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Key material of the wrong length.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(record_type: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self::NotFound {
            record_type: record_type.into(),
            external_id: external_id.into(),
        }
    }

    /// Creates a duplicate record error.
    pub fn duplicate(record_type: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self::DuplicateRecord {
            record_type: record_type.into(),
            external_id: external_id.into(),
        }
    }

    /// Creates a malformed change sequence error.
    pub fn malformed_sequence(record_uuid: RecordUuid, message: impl Into<String>) -> Self {
        Self::MalformedChangeSequence {
            record_uuid,
            message: message.into(),
        }
    }

    /// Creates a journal error.
    pub fn journal(message: impl Into<String>) -> Self {
        Self::Journal {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an encryption not enabled error.
    pub fn encryption_not_enabled() -> Self {
        Self::EncryptionNotEnabled
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Returns true if retrying the operation cannot succeed.
    ///
    /// Malformed change sequences and journal corruption need operator
    /// attention; everything else may succeed on a later attempt.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedChangeSequence { .. } | Self::JournalCorruption { .. }
        )
    }
}
