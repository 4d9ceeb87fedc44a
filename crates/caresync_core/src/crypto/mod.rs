//! Encryption of journal frames at rest.
//!
//! With the `encryption` feature enabled, a store opened with an
//! [`EncryptionKey`] seals every journal frame body with AES-256-GCM.
//! Frame headers and checksums stay in the clear, so torn-tail recovery
//! works the same on an encrypted journal.
//!
//! Without the feature the types still exist but every constructor
//! returns [`CoreError::EncryptionNotEnabled`](crate::CoreError::EncryptionNotEnabled).

#[cfg(feature = "encryption")]
mod encrypted;

#[cfg(feature = "encryption")]
pub use encrypted::*;

#[cfg(not(feature = "encryption"))]
mod stub {
    use crate::error::{CoreError, CoreResult};

    /// Journal encryption key (unavailable without the `encryption` feature).
    #[derive(Debug, Clone)]
    pub struct EncryptionKey {
        _private: (),
    }

    impl EncryptionKey {
        /// Always returns an error when encryption is disabled.
        pub fn generate() -> CoreResult<Self> {
            Err(CoreError::encryption_not_enabled())
        }

        /// Always returns an error when encryption is disabled.
        pub fn from_bytes(_bytes: &[u8]) -> CoreResult<Self> {
            Err(CoreError::encryption_not_enabled())
        }

        /// Always returns an error when encryption is disabled.
        pub fn derive_from_passphrase(_passphrase: &[u8], _salt: &[u8]) -> CoreResult<Self> {
            Err(CoreError::encryption_not_enabled())
        }
    }

    /// Frame cipher (unavailable without the `encryption` feature).
    #[derive(Debug)]
    pub struct FrameCipher {
        _private: (),
    }

    impl FrameCipher {
        /// Creates a cipher. No key can exist without the feature.
        #[must_use]
        pub fn new(_key: &EncryptionKey) -> Self {
            Self { _private: () }
        }

        /// Always returns an error when encryption is disabled.
        pub fn seal(&self, _plaintext: &[u8]) -> CoreResult<Vec<u8>> {
            Err(CoreError::encryption_not_enabled())
        }

        /// Always returns an error when encryption is disabled.
        pub fn open(&self, _sealed: &[u8]) -> CoreResult<Vec<u8>> {
            Err(CoreError::encryption_not_enabled())
        }
    }

}

#[cfg(not(feature = "encryption"))]
pub use stub::*;
