//! Per-record mutual exclusion.
//!
//! A transaction declares the records it will write and takes all their
//! locks at once. Locks are granted all-or-nothing, so two transactions
//! with overlapping record sets never deadlock; unrelated records proceed
//! in parallel.

use crate::error::{CoreError, CoreResult};
use crate::types::RecordUuid;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The table of currently held record locks.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashSet<RecordUuid>>,
    released: Condvar,
}

impl LockTable {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires locks on every record in `records`.
    ///
    /// Blocks until all are free, or until `wait` elapses when given.
    pub fn acquire(
        self: &Arc<Self>,
        records: impl IntoIterator<Item = RecordUuid>,
        wait: Option<Duration>,
    ) -> CoreResult<RecordLocks> {
        let wanted: BTreeSet<RecordUuid> = records.into_iter().collect();
        let deadline = wait.map(|wait| Instant::now() + wait);

        let mut held = self.held.lock();
        while wanted.iter().any(|uuid| held.contains(uuid)) {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut held, deadline).timed_out()
                        && wanted.iter().any(|uuid| held.contains(uuid))
                    {
                        return Err(CoreError::LockTimeout);
                    }
                }
                None => self.released.wait(&mut held),
            }
        }
        held.extend(wanted.iter().copied());
        drop(held);

        Ok(RecordLocks {
            table: Arc::clone(self),
            records: wanted,
        })
    }

    /// Returns true if `record` is currently locked.
    #[must_use]
    pub fn is_locked(&self, record: RecordUuid) -> bool {
        self.held.lock().contains(&record)
    }

    fn release(&self, records: &BTreeSet<RecordUuid>) {
        let mut held = self.held.lock();
        for uuid in records {
            held.remove(uuid);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// A set of held record locks, released on drop.
#[derive(Debug)]
pub struct RecordLocks {
    table: Arc<LockTable>,
    records: BTreeSet<RecordUuid>,
}

impl RecordLocks {
    /// Returns true if `record` is covered by these locks.
    #[must_use]
    pub fn covers(&self, record: RecordUuid) -> bool {
        self.records.contains(&record)
    }

    /// Returns the locked records in uuid order.
    pub fn records(&self) -> impl Iterator<Item = RecordUuid> + '_ {
        self.records.iter().copied()
    }
}

impl Drop for RecordLocks {
    fn drop(&mut self) {
        self.table.release(&self.records);
    }
}
