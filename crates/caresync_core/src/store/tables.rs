//! Committed table state.

use crate::change::{ChangeLog, ChangeLogEntry};
use crate::error::{CoreError, CoreResult};
use crate::journal::{CommitRecord, SnapshotRecord, StoreOp};
use crate::record::{RecordKey, RecordRow};
use crate::reference::ReferenceIndex;
use crate::schema::RecordSchema;
use crate::types::{ChangeId, RecordUuid, SequenceNumber};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Everything the journal rebuilds on open.
#[derive(Debug)]
pub(crate) struct Tables {
    pub(crate) records: HashMap<RecordUuid, RecordRow>,
    pub(crate) keys: HashMap<RecordKey, RecordUuid>,
    pub(crate) changes: ChangeLog,
    pub(crate) references: ReferenceIndex,
    pub(crate) metadata: BTreeMap<String, Value>,
    pub(crate) seq: SequenceNumber,
    pub(crate) next_change_id: ChangeId,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            keys: HashMap::new(),
            changes: ChangeLog::new(),
            references: ReferenceIndex::new(),
            metadata: BTreeMap::new(),
            seq: SequenceNumber::default(),
            next_change_id: ChangeId::new(1),
        }
    }
}

impl Tables {
    /// Rebuilds tables from a compacted snapshot.
    pub(crate) fn from_snapshot(snapshot: SnapshotRecord, schema: &dyn RecordSchema) -> Self {
        let mut tables = Self {
            seq: snapshot.seq,
            next_change_id: snapshot.next_change_id,
            metadata: snapshot.metadata,
            ..Self::default()
        };
        for row in snapshot.records {
            tables.put_record(row, schema);
        }
        let mut grouped: BTreeMap<RecordUuid, Vec<ChangeLogEntry>> = BTreeMap::new();
        for entry in snapshot.changes {
            grouped.entry(entry.record_uuid).or_default().push(entry);
        }
        for (record_uuid, entries) in grouped {
            tables.changes.set_entries(record_uuid, entries);
        }
        tables
    }

    /// Captures the tables as a snapshot.
    pub(crate) fn snapshot(&self) -> SnapshotRecord {
        let mut records: Vec<RecordRow> = self.records.values().cloned().collect();
        records.sort_by_key(|row| row.record_uuid);
        SnapshotRecord {
            seq: self.seq,
            next_change_id: self.next_change_id,
            records,
            changes: self.changes.iter().cloned().collect(),
            metadata: self.metadata.clone(),
        }
    }

    /// Checks that applying `ops` keeps `(type, external_id)` unique.
    pub(crate) fn validate(&self, ops: &[StoreOp]) -> CoreResult<()> {
        let removed: HashSet<RecordUuid> = ops
            .iter()
            .filter_map(|op| match op {
                StoreOp::RemoveRecord { record_uuid } => Some(*record_uuid),
                _ => None,
            })
            .collect();
        let rewritten: HashMap<RecordUuid, RecordKey> = ops
            .iter()
            .filter_map(|op| match op {
                StoreOp::PutRecord { row } => Some((row.record_uuid, row.key())),
                _ => None,
            })
            .collect();

        let mut claimed: HashMap<&RecordKey, RecordUuid> = HashMap::new();
        for (uuid, key) in &rewritten {
            if let Some(other) = claimed.insert(key, *uuid) {
                if other != *uuid {
                    return Err(CoreError::duplicate(&key.record_type, &key.external_id));
                }
            }
            if let Some(holder) = self.keys.get(key) {
                let released = removed.contains(holder)
                    || rewritten.get(holder).is_some_and(|new_key| new_key != key);
                if holder != uuid && !released {
                    return Err(CoreError::duplicate(&key.record_type, &key.external_id));
                }
            }
        }
        Ok(())
    }

    /// Applies a commit.
    pub(crate) fn apply_commit(&mut self, commit: CommitRecord, schema: &dyn RecordSchema) {
        for op in commit.ops {
            self.apply(op, schema);
        }
        self.seq = self.seq.max(commit.seq);
        self.next_change_id = self.next_change_id.max(commit.next_change_id);
    }

    fn apply(&mut self, op: StoreOp, schema: &dyn RecordSchema) {
        match op {
            StoreOp::PutRecord { row } => self.put_record(row, schema),
            StoreOp::RemoveRecord { record_uuid } => self.remove_record(record_uuid),
            StoreOp::SetChanges {
                record_uuid,
                entries,
            } => self.changes.set_entries(record_uuid, entries),
            StoreOp::PutMeta { key, value } => {
                self.metadata.insert(key, value);
            }
            StoreOp::RemoveMeta { key } => {
                self.metadata.remove(&key);
            }
        }
    }

    fn put_record(&mut self, row: RecordRow, schema: &dyn RecordSchema) {
        let key = row.key();
        if let Some(old) = self.records.get(&row.record_uuid) {
            let old_key = old.key();
            if old_key != key && self.keys.get(&old_key) == Some(&row.record_uuid) {
                self.keys.remove(&old_key);
            }
        }
        self.keys.insert(key, row.record_uuid);
        self.references.reindex(
            row.record_uuid,
            schema.references(&row.record_type, &row.payload),
        );
        self.records.insert(row.record_uuid, row);
    }

    fn remove_record(&mut self, record_uuid: RecordUuid) {
        if let Some(row) = self.records.remove(&record_uuid) {
            let key = row.key();
            if self.keys.get(&key) == Some(&record_uuid) {
                self.keys.remove(&key);
            }
        }
        self.references.remove(record_uuid);
        self.changes.set_entries(record_uuid, Vec::new());
    }
}
