//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while parsing, applying or merging patches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A JSON pointer was not syntactically valid.
    #[error("invalid JSON pointer {pointer:?}: {message}")]
    InvalidPointer {
        /// The offending pointer text.
        pointer: String,
        /// Description of the problem.
        message: String,
    },

    /// The target of an operation does not exist.
    #[error("path not found: {path}")]
    PathNotFound {
        /// Pointer that could not be resolved.
        path: String,
    },

    /// The parent of an `add` target does not exist or is not a container.
    #[error("invalid parent for path {path}: {message}")]
    InvalidParent {
        /// Pointer whose parent failed to resolve.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// An array index was malformed or out of bounds.
    #[error("array index out of bounds at {path}: index {index}, len {len}")]
    IndexOutOfBounds {
        /// Pointer containing the index.
        path: String,
        /// The requested index.
        index: usize,
        /// Length of the array.
        len: usize,
    },

    /// The operation is not allowed on the given path.
    #[error("invalid operation on {path}: {message}")]
    InvalidOperation {
        /// Pointer the operation targeted.
        path: String,
        /// Description of why it is invalid.
        message: String,
    },

    /// The patch document could not be decoded.
    #[error("malformed patch: {message}")]
    MalformedPatch {
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid pointer error.
    pub fn invalid_pointer(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPointer {
            pointer: pointer.into(),
            message: message.into(),
        }
    }

    /// Creates a path not found error.
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    /// Creates an invalid parent error.
    pub fn invalid_parent(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParent {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a malformed patch error.
    pub fn malformed_patch(message: impl Into<String>) -> Self {
        Self::MalformedPatch {
            message: message.into(),
        }
    }
}
