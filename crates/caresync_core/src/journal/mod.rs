//! Append-only journal for durability.
//!
//! Every committed store transaction is written as one frame before its
//! effects become visible. On open the journal is replayed to rebuild the
//! tables.
//!
//! ## Recovery policy
//!
//! - A torn trailing frame (short header, short payload, or a checksum
//!   mismatch in the final frame) is a crash mid-write. It is truncated
//!   and replay proceeds with the earlier frames.
//! - A checksum mismatch with more data after it, or a frame that passes
//!   its checksum but does not decode, is [`CoreError::JournalCorruption`]
//!   and the store refuses to open.
//!
//! Compaction rewrites the journal as a single snapshot frame.
//!
//! With a [`FrameCipher`] attached, frame bodies are sealed before they are
//! checksummed. A body that fails to open is
//! [`CoreError::DecryptionFailed`], which is what a wrong key looks like.

mod backend;
#[cfg(feature = "std")]
mod file;
mod frame;
mod record;

pub use backend::{JournalBackend, MemoryJournal};
#[cfg(feature = "std")]
pub use file::FileJournal;
pub use frame::{compute_crc32, encode_frame, scan_frames, FRAME_HEADER_SIZE};
pub use record::{CommitRecord, JournalRecord, SnapshotRecord, StoreOp};

use crate::crypto::FrameCipher;
use crate::error::{CoreError, CoreResult};
use frame::RawFrame;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Summary of one frame, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    /// Byte offset of the frame header.
    pub offset: u64,
    /// Payload length in bytes.
    pub len: usize,
    /// `commit` or `snapshot`.
    pub kind: &'static str,
    /// Sequence number the frame ends at.
    pub seq: u64,
    /// Number of table mutations in the frame.
    pub ops: usize,
}

/// Framed, checksummed journal over a [`JournalBackend`].
pub struct Journal {
    backend: Mutex<Box<dyn JournalBackend>>,
    sync_on_commit: bool,
    cipher: Option<FrameCipher>,
}

impl Journal {
    /// Creates a journal over `backend`.
    pub fn new(backend: Box<dyn JournalBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
            cipher: None,
        }
    }

    /// Seals frame bodies with `cipher` from now on.
    #[must_use]
    pub fn with_cipher(mut self, cipher: FrameCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Returns true if frame bodies are sealed.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn frame_for(&self, record: &JournalRecord) -> CoreResult<Vec<u8>> {
        let body = record.encode()?;
        match &self.cipher {
            Some(cipher) => encode_frame(&cipher.seal(&body)?),
            None => encode_frame(&body),
        }
    }

    fn record_in(&self, frame: &RawFrame<'_>) -> CoreResult<JournalRecord> {
        let opened;
        let body = match &self.cipher {
            Some(cipher) => {
                opened = cipher.open(frame.payload)?;
                opened.as_slice()
            }
            None => frame.payload,
        };
        JournalRecord::decode(body).map_err(|e| CoreError::journal_corruption(frame.offset, e.to_string()))
    }

    /// Appends a record as one frame.
    ///
    /// Returns the number of bytes written.
    pub fn append(&self, record: &JournalRecord) -> CoreResult<usize> {
        let frame = self.frame_for(record)?;
        let mut backend = self.backend.lock();
        backend.append(&frame)?;
        if self.sync_on_commit {
            backend.sync()?;
        }
        Ok(frame.len())
    }

    /// Reads every record, truncating a torn tail.
    pub fn replay(&self) -> CoreResult<Vec<JournalRecord>> {
        let mut backend = self.backend.lock();
        let image = backend.read_all()?;
        let scan = scan_frames(&image)?;

        let records = scan
            .frames
            .iter()
            .map(|frame| self.record_in(frame))
            .collect::<CoreResult<Vec<_>>>()?;

        if scan.has_torn_tail(image.len()) {
            warn!(
                valid_len = scan.valid_len,
                total_len = image.len(),
                "truncating torn journal tail"
            );
            backend.truncate(scan.valid_len)?;
            backend.sync()?;
        }

        debug!(frames = records.len(), "journal replayed");
        Ok(records)
    }

    /// Lists frames without modifying the journal.
    pub fn frames(&self) -> CoreResult<Vec<FrameInfo>> {
        let image = self.backend.lock().read_all()?;
        let scan = scan_frames(&image)?;
        scan.frames
            .iter()
            .map(|frame| {
                let record = self.record_in(frame)?;
                let ops = match &record {
                    JournalRecord::Commit(commit) => commit.ops.len(),
                    JournalRecord::Snapshot(snapshot) => {
                        snapshot.records.len() + snapshot.changes.len() + snapshot.metadata.len()
                    }
                };
                Ok(FrameInfo {
                    offset: frame.offset,
                    len: frame.payload.len(),
                    kind: record.kind_name(),
                    seq: record.seq().as_u64(),
                    ops,
                })
            })
            .collect()
    }

    /// Replaces the whole journal with `records`.
    pub fn rewrite(&self, records: &[JournalRecord]) -> CoreResult<()> {
        let mut image = Vec::new();
        for record in records {
            image.extend(self.frame_for(record)?);
        }
        let mut backend = self.backend.lock();
        backend.replace(&image)?;
        backend.sync()?;
        Ok(())
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        self.backend.lock().len()
    }

    /// Forces appended data to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_commit", &self.sync_on_commit)
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}
