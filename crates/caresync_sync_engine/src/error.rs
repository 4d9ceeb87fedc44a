//! Error types for the sync engine.

use caresync_codec::CodecError;
use caresync_core::CoreError;
use caresync_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store error.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// Patch error while building or merging a change.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server refused a change because its version tag is stale.
    #[error("conflict on {reference}: {message}")]
    Conflict {
        /// `"<type>/<id>"` of the record.
        reference: String,
        /// Server message.
        message: String,
    },

    /// The server rejected a change.
    #[error("rejected {reference}: {message}")]
    Rejected {
        /// `"<type>/<id>"` of the record.
        reference: String,
        /// Server message.
        message: String,
    },

    /// Applying an acknowledged change locally failed and was rolled back.
    #[error("consolidation of {reference} failed: {message}")]
    ConsolidationFailure {
        /// `"<type>/<id>"` of the record.
        reference: String,
        /// Cause.
        message: String,
    },

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a consolidation failure.
    pub fn consolidation(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsolidationFailure {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the same work later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ConsolidationFailure { .. } => true,
            SyncError::Core(CoreError::LockTimeout) => true,
            _ => false,
        }
    }

    /// Returns true if the error indicates local store corruption.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Core(e) if e.is_fatal())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        SyncError::Protocol(e.to_string())
    }
}
