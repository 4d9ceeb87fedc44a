//! The change log table.

use crate::change::entry::{ChangeKind, ChangeLogEntry};
use crate::error::{CoreError, CoreResult};
use crate::types::{ChangeId, RecordUuid};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Pending local changes, indexed by id and by record.
///
/// The log only holds committed state; writes go through
/// [`crate::StoreTransaction`], which replaces a record's whole pending
/// list on commit.
#[derive(Debug, Default, Clone)]
pub struct ChangeLog {
    entries: BTreeMap<ChangeId, ChangeLogEntry>,
    by_record: HashMap<RecordUuid, BTreeSet<ChangeId>>,
}

impl ChangeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a record's pending entries in id order.
    #[must_use]
    pub fn entries_for(&self, record_uuid: RecordUuid) -> Vec<ChangeLogEntry> {
        self.by_record
            .get(&record_uuid)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the records with pending changes, ordered by their oldest
    /// pending change.
    #[must_use]
    pub fn pending_records(&self) -> Vec<RecordUuid> {
        let mut seen = BTreeSet::new();
        self.entries
            .values()
            .filter(|entry| seen.insert(entry.record_uuid))
            .map(|entry| entry.record_uuid)
            .collect()
    }

    /// Returns an entry by id.
    #[must_use]
    pub fn get(&self, id: ChangeId) -> Option<&ChangeLogEntry> {
        self.entries.get(&id)
    }

    /// Returns true if the record has pending changes.
    #[must_use]
    pub fn has_pending(&self, record_uuid: RecordUuid) -> bool {
        self.by_record
            .get(&record_uuid)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Returns the total number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the highest id in the log.
    #[must_use]
    pub fn max_id(&self) -> Option<ChangeId> {
        self.entries.keys().next_back().copied()
    }

    /// Iterates all entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ChangeLogEntry> {
        self.entries.values()
    }

    /// Replaces the pending list of a record.
    pub(crate) fn set_entries(&mut self, record_uuid: RecordUuid, entries: Vec<ChangeLogEntry>) {
        if let Some(old) = self.by_record.remove(&record_uuid) {
            for id in old {
                self.entries.remove(&id);
            }
        }
        if entries.is_empty() {
            return;
        }
        let ids = entries.iter().map(|entry| entry.id).collect();
        for entry in entries {
            self.entries.insert(entry.id, entry);
        }
        self.by_record.insert(record_uuid, ids);
    }
}

/// Checks that `kind` may follow `existing` in a record's pending list.
///
/// INSERT is only valid on an empty list; nothing may follow DELETE.
pub(crate) fn check_append(
    record_uuid: RecordUuid,
    existing: &[ChangeLogEntry],
    kind: &ChangeKind,
) -> CoreResult<()> {
    if matches!(kind, ChangeKind::Insert { .. }) && !existing.is_empty() {
        return Err(CoreError::malformed_sequence(
            record_uuid,
            "insert appended after other changes",
        ));
    }
    if existing
        .last()
        .is_some_and(|entry| matches!(entry.kind, ChangeKind::Delete))
    {
        return Err(CoreError::malformed_sequence(
            record_uuid,
            format!("{} appended after a delete", kind.name()),
        ));
    }
    Ok(())
}
