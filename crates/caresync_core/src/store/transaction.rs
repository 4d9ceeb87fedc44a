//! Store transactions.

use crate::change::{check_append, ChangeKind, ChangeLogEntry, ChangeToken};
use crate::error::{CoreError, CoreResult};
use crate::journal::StoreOp;
use crate::lock::RecordLocks;
use crate::record::{RecordKey, RecordRow};
use crate::reference::ReferenceIndexEntry;
use crate::store::RecordStore;
use crate::types::{ChangeId, RecordUuid};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// An open transaction over a set of locked records.
///
/// Reads see committed state plus this transaction's own writes. Writes
/// are buffered and applied atomically on commit; dropping the
/// transaction discards them. Only records locked when the transaction
/// began may be written.
pub struct StoreTransaction<'a> {
    store: &'a RecordStore,
    locks: RecordLocks,
    rows: BTreeMap<RecordUuid, Option<RecordRow>>,
    changes: BTreeMap<RecordUuid, Vec<ChangeLogEntry>>,
    meta: BTreeMap<String, Option<Value>>,
}

impl<'a> StoreTransaction<'a> {
    pub(crate) fn new(store: &'a RecordStore, locks: RecordLocks) -> Self {
        Self {
            store,
            locks,
            rows: BTreeMap::new(),
            changes: BTreeMap::new(),
            meta: BTreeMap::new(),
        }
    }

    /// Returns true if this transaction holds the lock for `record_uuid`.
    #[must_use]
    pub fn is_locked(&self, record_uuid: RecordUuid) -> bool {
        self.locks.covers(record_uuid)
    }

    fn ensure_locked(&self, record_uuid: RecordUuid) -> CoreResult<()> {
        if self.locks.covers(record_uuid) {
            Ok(())
        } else {
            Err(CoreError::LockedRecordMissing { record_uuid })
        }
    }

    // ---- reads ----

    /// Returns a record row by uuid, tombstones included.
    pub fn record(&self, record_uuid: RecordUuid) -> Option<RecordRow> {
        match self.rows.get(&record_uuid) {
            Some(row) => row.clone(),
            None => self.store.get_by_uuid(record_uuid),
        }
    }

    /// Finds a record row by key, tombstones included.
    pub fn find(&self, key: &RecordKey) -> Option<RecordRow> {
        if let Some(row) = self.rows.values().flatten().find(|row| &row.key() == key) {
            return Some(row.clone());
        }
        let uuid = self.store.find_uuid(key)?;
        if self.rows.contains_key(&uuid) {
            // Rewritten or removed in this transaction.
            return None;
        }
        self.store.get_by_uuid(uuid)
    }

    /// Returns a record's pending changes in id order.
    pub fn changes(&self, record_uuid: RecordUuid) -> Vec<ChangeLogEntry> {
        match self.changes.get(&record_uuid) {
            Some(entries) => entries.clone(),
            None => self.store.changes_for(record_uuid),
        }
    }

    /// Returns the committed references to `target`.
    pub fn referrers(&self, target: &str) -> Vec<ReferenceIndexEntry> {
        self.store.referrers(target)
    }

    /// Reads a metadata value.
    pub fn meta<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        let value = match self.meta.get(key) {
            Some(value) => value.clone(),
            None => self.store.meta_value(key),
        };
        value
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| CoreError::invalid_operation(format!("metadata {key}: {e}")))
            })
            .transpose()
    }

    // ---- writes ----

    /// Inserts or replaces a record row.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateRecord`] if another record already uses the
    /// row's key.
    pub fn put_record(&mut self, row: RecordRow) -> CoreResult<()> {
        self.ensure_locked(row.record_uuid)?;
        if let Some(existing) = self.find(&row.key()) {
            if existing.record_uuid != row.record_uuid {
                return Err(CoreError::duplicate(&row.record_type, &row.external_id));
            }
        }
        self.rows.insert(row.record_uuid, Some(row));
        Ok(())
    }

    /// Physically removes a record and all its pending changes.
    pub fn remove_record(&mut self, record_uuid: RecordUuid) -> CoreResult<()> {
        self.ensure_locked(record_uuid)?;
        self.rows.insert(record_uuid, None);
        self.changes.insert(record_uuid, Vec::new());
        Ok(())
    }

    /// Appends a change to a record's pending list.
    ///
    /// # Errors
    ///
    /// [`CoreError::MalformedChangeSequence`] if the change would break
    /// the INSERT-first, DELETE-last ordering.
    pub fn append_change(
        &mut self,
        record_uuid: RecordUuid,
        kind: ChangeKind,
        version_tag: Option<String>,
    ) -> CoreResult<ChangeId> {
        self.ensure_locked(record_uuid)?;
        let mut entries = self.changes(record_uuid);
        check_append(record_uuid, &entries, &kind)?;

        let id = self.store.allocate_change_id();
        entries.push(ChangeLogEntry {
            id,
            record_uuid,
            kind,
            version_tag_at_change: version_tag,
            timestamp: Utc::now(),
        });
        self.changes.insert(record_uuid, entries);
        Ok(id)
    }

    /// Deletes exactly the entries covered by `token`.
    ///
    /// Returns how many entries were removed. Entries appended after the
    /// token was taken are kept.
    pub fn discard_token(
        &mut self,
        record_uuid: RecordUuid,
        token: &ChangeToken,
    ) -> CoreResult<usize> {
        self.ensure_locked(record_uuid)?;
        let mut entries = self.changes(record_uuid);
        let before = entries.len();
        entries.retain(|entry| !token.contains(entry.id));
        let removed = before - entries.len();
        self.changes.insert(record_uuid, entries);
        Ok(removed)
    }

    /// Replaces the payload of one pending entry in place.
    pub fn replace_change(
        &mut self,
        record_uuid: RecordUuid,
        id: ChangeId,
        kind: ChangeKind,
    ) -> CoreResult<()> {
        self.ensure_locked(record_uuid)?;
        let mut entries = self.changes(record_uuid);
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(CoreError::ChangeNotFound(id))?;
        entry.kind = kind;
        self.changes.insert(record_uuid, entries);
        Ok(())
    }

    /// Sets the version tag every pending entry of a record was made
    /// against. Used once the server acknowledges a newer version.
    pub fn retag(&mut self, record_uuid: RecordUuid, version_tag: Option<String>) -> CoreResult<()> {
        self.ensure_locked(record_uuid)?;
        let mut entries = self.changes(record_uuid);
        if entries.is_empty() {
            return Ok(());
        }
        for entry in &mut entries {
            entry.version_tag_at_change = version_tag.clone();
        }
        self.changes.insert(record_uuid, entries);
        Ok(())
    }

    /// Replaces all pending entries of a record with a single new entry.
    ///
    /// The new entry gets a fresh id, so an upload already holding a token
    /// for the old entries cannot discard it.
    pub fn rebase(
        &mut self,
        record_uuid: RecordUuid,
        kind: ChangeKind,
        version_tag: Option<String>,
    ) -> CoreResult<ChangeId> {
        self.ensure_locked(record_uuid)?;
        self.changes.insert(record_uuid, Vec::new());
        self.append_change(record_uuid, kind, version_tag)
    }

    /// Drops every pending entry of a record.
    pub fn clear_changes(&mut self, record_uuid: RecordUuid) -> CoreResult<usize> {
        self.ensure_locked(record_uuid)?;
        let removed = self.changes(record_uuid).len();
        self.changes.insert(record_uuid, Vec::new());
        Ok(removed)
    }

    /// Writes a metadata value.
    pub fn put_meta<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> CoreResult<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::invalid_operation(format!("metadata {key}: {e}")))?;
        self.meta.insert(key, Some(value));
        Ok(())
    }

    /// Removes a metadata value.
    pub fn remove_meta(&mut self, key: impl Into<String>) {
        self.meta.insert(key.into(), None);
    }

    /// Returns true if the transaction has buffered writes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.rows.is_empty() || !self.changes.is_empty() || !self.meta.is_empty()
    }

    pub(crate) fn into_ops(self) -> (Vec<StoreOp>, RecordLocks) {
        let mut ops = Vec::new();
        for (record_uuid, row) in self.rows {
            ops.push(match row {
                Some(row) => StoreOp::PutRecord { row },
                None => StoreOp::RemoveRecord { record_uuid },
            });
        }
        for (record_uuid, entries) in self.changes {
            ops.push(StoreOp::SetChanges {
                record_uuid,
                entries,
            });
        }
        for (key, value) in self.meta {
            ops.push(match value {
                Some(value) => StoreOp::PutMeta { key, value },
                None => StoreOp::RemoveMeta { key },
            });
        }
        (ops, self.locks)
    }
}

impl std::fmt::Debug for StoreTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransaction")
            .field("rows", &self.rows.len())
            .field("changes", &self.changes.len())
            .field("meta", &self.meta.len())
            .finish_non_exhaustive()
    }
}
