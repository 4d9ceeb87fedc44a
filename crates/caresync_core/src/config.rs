//! Store configuration.

use crate::crypto::EncryptionKey;
use std::time::Duration;

/// Configuration for opening a record store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// How long a transaction waits for record locks (`None` = forever).
    pub lock_wait: Option<Duration>,

    /// Compact the journal on open once it holds more frames than this
    /// (0 = never).
    pub compact_after_frames: usize,

    /// Key that seals journal frames (`None` = plaintext journal).
    pub encryption_key: Option<EncryptionKey>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            lock_wait: Some(Duration::from_secs(30)),
            compact_after_frames: 0,
            encryption_key: None,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn lock_wait(mut self, wait: Option<Duration>) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the frame count that triggers compaction on open.
    #[must_use]
    pub const fn compact_after_frames(mut self, frames: usize) -> Self {
        self.compact_after_frames = frames;
        self
    }

    /// Seals journal frames with `key`.
    ///
    /// A key is only obtainable with the `encryption` feature enabled.
    #[must_use]
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.sync_on_commit);
        assert_eq!(config.lock_wait, Some(Duration::from_secs(30)));
        assert_eq!(config.compact_after_frames, 0);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .sync_on_commit(false)
            .lock_wait(None)
            .compact_after_frames(1000);
        assert!(!config.sync_on_commit);
        assert!(config.lock_wait.is_none());
        assert_eq!(config.compact_after_frames, 1000);
    }
}
