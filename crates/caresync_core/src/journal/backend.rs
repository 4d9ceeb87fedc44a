//! Journal storage backends.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::Arc;

/// An append-only byte store holding journal frames.
///
/// Backends do not interpret frames; [`super::Journal`] owns the format.
pub trait JournalBackend: Send + Sync {
    /// Reads the whole journal image.
    fn read_all(&self) -> CoreResult<Vec<u8>>;

    /// Appends bytes at the end.
    fn append(&mut self, data: &[u8]) -> CoreResult<()>;

    /// Makes appended data durable.
    fn sync(&mut self) -> CoreResult<()>;

    /// Truncates the journal to `len` bytes.
    fn truncate(&mut self, len: u64) -> CoreResult<()>;

    /// Atomically replaces the whole journal image.
    fn replace(&mut self, data: &[u8]) -> CoreResult<()>;

    /// Returns the current size in bytes.
    fn len(&self) -> CoreResult<u64>;

    /// Returns true if the journal is empty.
    fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-memory journal.
///
/// Clones share the same buffer, so a test can drop a store and reopen a
/// new one over the same bytes to simulate a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryJournal {
    /// Creates an empty in-memory journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal holding `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Returns a copy of the journal image.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Overwrites the journal image.
    pub fn set_bytes(&self, bytes: Vec<u8>) {
        *self.data.lock() = bytes;
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        Ok(self.data.lock().clone())
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        self.data.lock().extend_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        let mut data = self.data.lock();
        let len = usize::try_from(len)
            .map_err(|_| CoreError::invalid_operation("truncate length out of range"))?;
        if len > data.len() {
            return Err(CoreError::invalid_operation(format!(
                "cannot truncate {} byte journal to {len}",
                data.len()
            )));
        }
        data.truncate(len);
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        *self.data.lock() = data.to_vec();
        Ok(())
    }

    fn len(&self) -> CoreResult<u64> {
        Ok(self.data.lock().len() as u64)
    }
}
