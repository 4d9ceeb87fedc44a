//! Store statistics.
//!
//! [`StoreCounters`] are atomic and bumped as the store works;
//! [`StoreStats`] is a point-in-time view combining them with table counts.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for a record store.
#[derive(Debug, Default)]
pub struct StoreCounters {
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    journal_bytes_written: AtomicU64,
    compactions: AtomicU64,
}

impl StoreCounters {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self, bytes: usize) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.journal_bytes_written
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of committed transactions.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted transactions.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the bytes appended to the journal since open.
    pub fn journal_bytes_written(&self) -> u64 {
        self.journal_bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of compactions since open.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }
}

/// Per-type record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    /// Live records.
    pub records: u64,
    /// Records marked deleted awaiting upload.
    pub tombstones: u64,
    /// Records with pending changes.
    pub pending_records: u64,
}

/// A point-in-time snapshot of store state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Sequence number of the last commit.
    pub seq: u64,
    /// Live records.
    pub records: u64,
    /// Tombstoned records.
    pub tombstones: u64,
    /// Records with at least one pending change.
    pub pending_records: u64,
    /// Total pending change log entries.
    pub pending_changes: usize,
    /// Indexed references.
    pub references: usize,
    /// Counts by record type.
    pub by_type: BTreeMap<String, TypeStats>,
    /// Committed transactions since open.
    pub transactions_committed: u64,
    /// Aborted transactions since open.
    pub transactions_aborted: u64,
    /// Journal bytes written since open.
    pub journal_bytes_written: u64,
    /// Compactions since open.
    pub compactions: u64,
}
