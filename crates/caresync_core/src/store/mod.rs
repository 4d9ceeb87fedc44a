//! The record store.
//!
//! [`RecordStore`] owns the record table, the change log, the reference
//! index and sync metadata. Every mutation runs in a [`StoreTransaction`]
//! that locks the records it writes; a commit appends one journal frame
//! and then applies the buffered writes under a short table lock.

mod tables;
mod transaction;

pub use transaction::StoreTransaction;

use crate::change::{squash, ChangeKind, ChangeLogEntry, SquashedChange};
use crate::config::StoreConfig;
use crate::crypto::FrameCipher;
use crate::error::{CoreError, CoreResult};
use crate::journal::{CommitRecord, FrameInfo, Journal, JournalBackend, JournalRecord, MemoryJournal};
use crate::lock::LockTable;
use crate::record::{RecordKey, RecordRow};
use crate::reference::ReferenceIndexEntry;
use crate::schema::{read_id, write_id, NamedReferenceMembers, RecordSchema};
use crate::stats::{StoreCounters, StoreStats, TypeStats};
use crate::types::{ChangeId, RecordUuid, SequenceNumber};
use caresync_codec::{diff, JsonPointer};
use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tables::Tables;
use tracing::{debug, info, warn};

/// The local record store.
///
/// # Example
///
/// ```
/// use caresync_core::RecordStore;
/// use serde_json::json;
///
/// let store = RecordStore::open_in_memory().unwrap();
/// let row = store.create("Patient", json!({"name": "Ann"})).unwrap();
///
/// store.update("Patient", &row.external_id, json!({"name": "Anna"})).unwrap();
/// assert_eq!(store.changes_for(row.record_uuid).len(), 2);
/// ```
pub struct RecordStore {
    config: StoreConfig,
    schema: Arc<dyn RecordSchema>,
    journal: Journal,
    tables: RwLock<Tables>,
    locks: Arc<LockTable>,
    next_change_id: AtomicU64,
    counters: StoreCounters,
}

impl RecordStore {
    /// Opens a store over a journal backend, replaying its frames.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalCorruption`] if the journal is damaged
    /// before its tail, and [`CoreError::DecryptionFailed`] if
    /// `config.encryption_key` does not open its frames.
    pub fn open(
        backend: Box<dyn JournalBackend>,
        config: StoreConfig,
        schema: Arc<dyn RecordSchema>,
    ) -> CoreResult<Self> {
        let mut journal = Journal::new(backend, config.sync_on_commit);
        if let Some(key) = &config.encryption_key {
            journal = journal.with_cipher(FrameCipher::new(key));
        }
        let records = journal.replay()?;
        let frame_count = records.len();

        let mut tables = Tables::default();
        for record in records {
            match record {
                JournalRecord::Snapshot(snapshot) => {
                    tables = Tables::from_snapshot(snapshot, schema.as_ref());
                }
                JournalRecord::Commit(commit) => tables.apply_commit(commit, schema.as_ref()),
            }
        }
        let next_id = tables
            .changes
            .max_id()
            .map_or(tables.next_change_id, |max| max.next().max(tables.next_change_id));
        tables.next_change_id = next_id;

        info!(
            records = tables.records.len(),
            pending = tables.changes.len(),
            seq = %tables.seq,
            encrypted = journal.is_encrypted(),
            "record store opened"
        );

        let store = Self {
            next_change_id: AtomicU64::new(next_id.as_u64()),
            tables: RwLock::new(tables),
            locks: Arc::new(LockTable::new()),
            counters: StoreCounters::new(),
            journal,
            schema,
            config,
        };

        if store.config.compact_after_frames > 0 && frame_count > store.config.compact_after_frames {
            store.compact()?;
        }
        Ok(store)
    }

    /// Opens an in-memory store with the default schema.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(
            Box::new(MemoryJournal::new()),
            StoreConfig::default(),
            Arc::new(NamedReferenceMembers),
        )
    }

    /// Opens a store backed by a journal file.
    #[cfg(feature = "std")]
    pub fn open_file(
        path: &std::path::Path,
        config: StoreConfig,
        schema: Arc<dyn RecordSchema>,
    ) -> CoreResult<Self> {
        let backend = crate::journal::FileJournal::open(path)?;
        Self::open(Box::new(backend), config, schema)
    }

    /// Returns the schema hook.
    #[must_use]
    pub fn schema(&self) -> &Arc<dyn RecordSchema> {
        &self.schema
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ---- transactions ----

    /// Runs `f` in a transaction that locks `records`.
    ///
    /// If `f` returns `Ok` the transaction is committed; if it returns
    /// `Err` every buffered write is discarded.
    pub fn transaction<F, T>(&self, records: &[RecordUuid], f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut StoreTransaction<'_>) -> CoreResult<T>,
    {
        let locks = self
            .locks
            .acquire(records.iter().copied(), self.config.lock_wait)?;
        let mut txn = StoreTransaction::new(self, locks);
        match f(&mut txn) {
            Ok(value) => {
                self.commit(txn)?;
                Ok(value)
            }
            Err(e) => {
                self.counters.record_abort();
                debug!(error = %e, "transaction aborted");
                Err(e)
            }
        }
    }

    fn commit(&self, txn: StoreTransaction<'_>) -> CoreResult<Option<SequenceNumber>> {
        if !txn.is_dirty() {
            return Ok(None);
        }
        let (ops, _locks) = txn.into_ops();

        let mut tables = self.tables.write();
        tables.validate(&ops)?;

        let seq = tables.seq.next();
        let commit = CommitRecord {
            seq,
            next_change_id: ChangeId::new(self.next_change_id.load(Ordering::SeqCst)),
            ops,
        };
        let bytes = self.journal.append(&JournalRecord::Commit(commit.clone()))?;
        tables.apply_commit(commit, self.schema.as_ref());
        self.counters.record_commit(bytes);
        Ok(Some(seq))
    }

    pub(crate) fn allocate_change_id(&self) -> ChangeId {
        ChangeId::new(self.next_change_id.fetch_add(1, Ordering::SeqCst))
    }

    // ---- reads ----

    /// Returns a live record by key.
    pub fn get(&self, record_type: &str, external_id: &str) -> Option<RecordRow> {
        let key = RecordKey::new(record_type, external_id);
        let tables = self.tables.read();
        let uuid = tables.keys.get(&key)?;
        tables.records.get(uuid).filter(|row| row.is_live()).cloned()
    }

    /// Returns a record by uuid, tombstones included.
    pub fn get_by_uuid(&self, record_uuid: RecordUuid) -> Option<RecordRow> {
        self.tables.read().records.get(&record_uuid).cloned()
    }

    /// Looks up the uuid for a key, tombstones included.
    pub fn find_uuid(&self, key: &RecordKey) -> Option<RecordUuid> {
        self.tables.read().keys.get(key).copied()
    }

    /// Lists the live records of a type, ordered by external id.
    pub fn list(&self, record_type: &str) -> Vec<RecordRow> {
        let tables = self.tables.read();
        let mut rows: Vec<RecordRow> = tables
            .records
            .values()
            .filter(|row| row.is_live() && row.record_type == record_type)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        rows
    }

    /// Returns records with pending changes, oldest change first.
    pub fn pending_records(&self) -> Vec<RecordUuid> {
        self.tables.read().changes.pending_records()
    }

    /// Returns a record's pending changes in id order.
    pub fn changes_for(&self, record_uuid: RecordUuid) -> Vec<ChangeLogEntry> {
        self.tables.read().changes.entries_for(record_uuid)
    }

    /// Returns true if the record has pending changes.
    pub fn has_pending(&self, record_uuid: RecordUuid) -> bool {
        self.tables.read().changes.has_pending(record_uuid)
    }

    /// Squashes a record's pending changes.
    pub fn squashed(&self, record_uuid: RecordUuid) -> CoreResult<Option<SquashedChange>> {
        squash(&self.changes_for(record_uuid))
    }

    /// Returns every record referencing `target` (`"<type>/<id>"`).
    pub fn referrers(&self, target: &str) -> Vec<ReferenceIndexEntry> {
        self.tables.read().references.referrers(target)
    }

    /// Returns the references a record holds, as `(field, target)` pairs.
    pub fn references_of(&self, record_uuid: RecordUuid) -> Vec<(JsonPointer, String)> {
        self.tables.read().references.references_of(record_uuid).to_vec()
    }

    /// Reads a typed metadata value.
    pub fn meta<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        self.meta_value(key)
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| CoreError::invalid_operation(format!("metadata {key}: {e}")))
            })
            .transpose()
    }

    pub(crate) fn meta_value(&self, key: &str) -> Option<Value> {
        self.tables.read().metadata.get(key).cloned()
    }

    /// Lists metadata keys starting with `prefix`.
    pub fn meta_keys(&self, prefix: &str) -> Vec<String> {
        self.tables
            .read()
            .metadata
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the sequence number of the last commit.
    pub fn committed_seq(&self) -> SequenceNumber {
        self.tables.read().seq
    }

    /// Collects table statistics.
    pub fn stats(&self) -> StoreStats {
        let tables = self.tables.read();
        let mut stats = StoreStats {
            seq: tables.seq.as_u64(),
            pending_changes: tables.changes.len(),
            references: tables.references.len(),
            transactions_committed: self.counters.transactions_committed(),
            transactions_aborted: self.counters.transactions_aborted(),
            journal_bytes_written: self.counters.journal_bytes_written(),
            compactions: self.counters.compactions(),
            ..StoreStats::default()
        };
        for row in tables.records.values() {
            let per_type = stats.by_type.entry(row.record_type.clone()).or_insert_with(TypeStats::default);
            if row.tombstone {
                stats.tombstones += 1;
                per_type.tombstones += 1;
            } else {
                stats.records += 1;
                per_type.records += 1;
            }
            if tables.changes.has_pending(row.record_uuid) {
                stats.pending_records += 1;
                per_type.pending_records += 1;
            }
        }
        stats
    }

    // ---- local mutations ----

    /// Creates a record and its INSERT change in one transaction.
    ///
    /// The payload's id (at the schema's id pointer) becomes the external
    /// id; when absent, a random client id is generated and written into
    /// the payload.
    ///
    /// # Errors
    ///
    /// [`CoreError::DuplicateRecord`] if a record with the same key exists,
    /// including one with a pending delete.
    pub fn create(&self, record_type: &str, mut payload: Value) -> CoreResult<RecordRow> {
        if !payload.is_object() {
            return Err(CoreError::invalid_operation(format!(
                "{record_type} payload must be a JSON object"
            )));
        }
        let external_id = match read_id(self.schema.as_ref(), record_type, &payload) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                write_id(self.schema.as_ref(), record_type, &mut payload, &id)?;
                id
            }
        };

        let record_uuid = RecordUuid::new();
        let row = RecordRow {
            record_uuid,
            record_type: record_type.to_string(),
            external_id,
            payload,
            version_tag: None,
            last_updated_remote: None,
            last_updated_local: Some(Utc::now()),
            tombstone: false,
        };

        self.transaction(&[record_uuid], |txn| {
            if txn.find(&row.key()).is_some() {
                return Err(CoreError::duplicate(&row.record_type, &row.external_id));
            }
            txn.put_record(row.clone())?;
            txn.append_change(
                record_uuid,
                ChangeKind::Insert {
                    snapshot: row.payload.clone(),
                },
                None,
            )?;
            Ok(())
        })?;

        debug!(record_type, external_id = %row.external_id, "record created");
        Ok(row)
    }

    /// Replaces a record's payload and appends an UPDATE change.
    ///
    /// An update that leaves the payload unchanged (after schema
    /// normalization) writes nothing and returns the current row.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if no live record has this key.
    pub fn update(
        &self,
        record_type: &str,
        external_id: &str,
        mut payload: Value,
    ) -> CoreResult<RecordRow> {
        let key = RecordKey::new(record_type, external_id);
        let record_uuid = self
            .find_uuid(&key)
            .ok_or_else(|| CoreError::not_found(record_type, external_id))?;

        match read_id(self.schema.as_ref(), record_type, &payload) {
            Some(id) if id != external_id => {
                return Err(CoreError::invalid_operation(format!(
                    "payload id {id} does not match {key}"
                )));
            }
            Some(_) => {}
            None => write_id(self.schema.as_ref(), record_type, &mut payload, external_id)?,
        }

        self.transaction(&[record_uuid], |txn| {
            let mut row = txn
                .record(record_uuid)
                .filter(|row| row.is_live() && row.key() == key)
                .ok_or_else(|| CoreError::not_found(record_type, external_id))?;

            let before = self.schema.normalize(record_type, &row.payload);
            let after = self.schema.normalize(record_type, &payload);
            if before == after {
                warn!(record_type, external_id, "update produced no changes");
                return Ok(row);
            }

            let patch = diff(&row.payload, &payload);
            row.payload = payload;
            row.last_updated_local = Some(Utc::now());
            let version_tag = row.version_tag.clone();
            txn.put_record(row.clone())?;
            txn.append_change(record_uuid, ChangeKind::Update { patch }, version_tag)?;
            Ok(row)
        })
    }

    /// Marks a record deleted and appends a DELETE change.
    ///
    /// The row stays as a tombstone until the delete is acknowledged by
    /// the server or discarded locally.
    pub fn delete(&self, record_type: &str, external_id: &str) -> CoreResult<()> {
        let key = RecordKey::new(record_type, external_id);
        let record_uuid = self
            .find_uuid(&key)
            .ok_or_else(|| CoreError::not_found(record_type, external_id))?;

        self.transaction(&[record_uuid], |txn| {
            let mut row = txn
                .record(record_uuid)
                .filter(|row| row.is_live() && row.key() == key)
                .ok_or_else(|| CoreError::not_found(record_type, external_id))?;
            row.tombstone = true;
            row.last_updated_local = Some(Utc::now());
            let version_tag = row.version_tag.clone();
            txn.put_record(row)?;
            txn.append_change(record_uuid, ChangeKind::Delete, version_tag)?;
            Ok(())
        })?;

        debug!(record_type, external_id, "record deleted");
        Ok(())
    }

    // ---- maintenance ----

    /// Rewrites the journal as a single snapshot frame.
    pub fn compact(&self) -> CoreResult<()> {
        let tables = self.tables.write();
        let mut snapshot = tables.snapshot();
        snapshot.next_change_id = ChangeId::new(self.next_change_id.load(Ordering::SeqCst));
        let before = self.journal.size()?;
        self.journal.rewrite(&[JournalRecord::Snapshot(snapshot)])?;
        self.counters.record_compaction();
        info!(before, after = self.journal.size()?, "journal compacted");
        Ok(())
    }

    /// Lists journal frames.
    pub fn journal_frames(&self) -> CoreResult<Vec<FrameInfo>> {
        let _tables = self.tables.read();
        self.journal.frames()
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.journal.size()
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("config", &self.config)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::SquashedOperation;
    use serde_json::json;

    fn reopen(memory: &MemoryJournal) -> RecordStore {
        RecordStore::open(
            Box::new(memory.clone()),
            StoreConfig::default(),
            Arc::new(NamedReferenceMembers),
        )
        .unwrap()
    }

    #[test]
    fn create_assigns_client_id() {
        let store = RecordStore::open_in_memory().unwrap();
        let row = store.create("Patient", json!({"name": "Ann"})).unwrap();
        assert!(!row.external_id.is_empty());
        assert_eq!(row.payload["id"], json!(row.external_id));

        let changes = store.changes_for(row.record_uuid);
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0].kind, ChangeKind::Insert { .. }));
    }

    #[test]
    fn create_rejects_duplicates_and_tombstones() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create("Patient", json!({"id": "p1"})).unwrap();
        assert!(matches!(
            store.create("Patient", json!({"id": "p1"})),
            Err(CoreError::DuplicateRecord { .. })
        ));

        store.delete("Patient", "p1").unwrap();
        assert!(store.get("Patient", "p1").is_none());
        assert!(matches!(
            store.create("Patient", json!({"id": "p1"})),
            Err(CoreError::DuplicateRecord { .. })
        ));
        // Same id under another type is fine.
        assert!(store.create("Practitioner", json!({"id": "p1"})).is_ok());
    }

    #[test]
    fn create_rejects_non_objects() {
        let store = RecordStore::open_in_memory().unwrap();
        assert!(store.create("Patient", json!([1, 2])).is_err());
    }

    #[test]
    fn update_appends_patch_and_skips_no_ops() {
        let store = RecordStore::open_in_memory().unwrap();
        let row = store.create("Patient", json!({"id": "p1", "name": "Ann"})).unwrap();

        let updated = store
            .update("Patient", "p1", json!({"name": "Anna"}))
            .unwrap();
        assert_eq!(updated.payload, json!({"id": "p1", "name": "Anna"}));

        store
            .update("Patient", "p1", json!({"id": "p1", "name": "Anna"}))
            .unwrap();
        assert_eq!(store.changes_for(row.record_uuid).len(), 2);

        assert!(matches!(
            store.update("Patient", "p1", json!({"id": "other"})),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(matches!(
            store.update("Patient", "nope", json!({})),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn delete_then_update_is_not_found() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create("Patient", json!({"id": "p1"})).unwrap();
        store.delete("Patient", "p1").unwrap();
        assert!(matches!(
            store.update("Patient", "p1", json!({"id": "p1", "x": 1})),
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete("Patient", "p1"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = RecordStore::open_in_memory().unwrap();
        let row = store.create("Patient", json!({"id": "p1"})).unwrap();
        let uuid = row.record_uuid;

        let result: CoreResult<()> = store.transaction(&[uuid], |txn| {
            let mut row = txn.record(uuid).unwrap();
            row.payload = json!({"id": "p1", "x": 1});
            txn.put_record(row)?;
            txn.append_change(uuid, ChangeKind::Delete, None)?;
            Err(CoreError::invalid_operation("boom"))
        });
        assert!(result.is_err());
        assert_eq!(store.get("Patient", "p1").unwrap().payload, json!({"id": "p1"}));
        assert_eq!(store.changes_for(uuid).len(), 1);
    }

    #[test]
    fn writes_require_locks() {
        let store = RecordStore::open_in_memory().unwrap();
        let row = store.create("Patient", json!({"id": "p1"})).unwrap();
        let result = store.transaction(&[], |txn| txn.append_change(row.record_uuid, ChangeKind::Delete, None));
        assert!(matches!(result, Err(CoreError::LockedRecordMissing { .. })));
    }

    #[test]
    fn discard_token_keeps_later_entries() {
        let store = RecordStore::open_in_memory().unwrap();
        let row = store.create("Patient", json!({"id": "p1", "n": 1})).unwrap();
        let squashed = store.squashed(row.record_uuid).unwrap().unwrap();

        store.update("Patient", "p1", json!({"id": "p1", "n": 2})).unwrap();
        store
            .transaction(&[row.record_uuid], |txn| txn.discard_token(row.record_uuid, &squashed.token))
            .unwrap();

        let remaining = store.changes_for(row.record_uuid);
        assert_eq!(remaining.len(), 1);
        assert!(matches!(remaining[0].kind, ChangeKind::Update { .. }));
    }

    #[test]
    fn reopen_replays_journal() {
        let memory = MemoryJournal::new();
        let uuid = {
            let store = reopen(&memory);
            let row = store.create("Patient", json!({"id": "p1", "name": "Ann"})).unwrap();
            store.update("Patient", "p1", json!({"id": "p1", "name": "Anna"})).unwrap();
            store
                .create("Observation", json!({"id": "o1", "subject": {"reference": "Patient/p1"}}))
                .unwrap();
            row.record_uuid
        };

        let store = reopen(&memory);
        assert_eq!(store.get("Patient", "p1").unwrap().payload["name"], "Anna");
        assert_eq!(store.changes_for(uuid).len(), 2);
        assert_eq!(store.referrers("Patient/p1").len(), 1);

        // Change ids keep increasing across restarts.
        let max_before = store.changes_for(uuid).last().unwrap().id;
        store.update("Patient", "p1", json!({"id": "p1", "name": "Annie"})).unwrap();
        assert!(store.changes_for(uuid).last().unwrap().id > max_before);
    }

    #[test]
    fn compact_preserves_state() {
        let memory = MemoryJournal::new();
        {
            let store = reopen(&memory);
            for i in 0..5 {
                store.create("Patient", json!({"id": format!("p{i}")})).unwrap();
            }
            store.delete("Patient", "p0").unwrap();
            store
                .transaction(&[], |txn| txn.put_meta("cursor/Patient", &json!({"w": 1})))
                .unwrap();
            store.compact().unwrap();
            assert_eq!(store.journal_frames().unwrap().len(), 1);
        }

        let store = reopen(&memory);
        assert_eq!(store.list("Patient").len(), 4);
        assert_eq!(store.stats().tombstones, 1);
        assert_eq!(store.meta::<Value>("cursor/Patient").unwrap(), Some(json!({"w": 1})));
        let pending = store.pending_records();
        assert_eq!(pending.len(), 5);
        let squashed = store.squashed(pending[0]).unwrap().unwrap();
        assert_eq!(squashed.operation.name(), SquashedOperation::Discard.name());
    }

    #[cfg(feature = "encryption")]
    #[test]
    fn encrypted_store_reopens_only_with_its_key() {
        use crate::crypto::EncryptionKey;

        let key = EncryptionKey::generate();
        let open_with = |memory: &MemoryJournal, key: EncryptionKey| {
            RecordStore::open(
                Box::new(memory.clone()),
                StoreConfig::default().encryption_key(key),
                Arc::new(NamedReferenceMembers),
            )
        };

        let memory = MemoryJournal::new();
        {
            let store = open_with(&memory, key.clone()).unwrap();
            store
                .create("Patient", json!({"id": "p1", "name": "Annabelle Hathaway"}))
                .unwrap();
            store.compact().unwrap();
            store.create("Patient", json!({"id": "p2", "name": "Bartholomew"})).unwrap();
        }
        let bytes = memory.bytes();
        assert!(!bytes.windows(18).any(|w| w == b"Annabelle Hathaway"));
        assert!(!bytes.windows(11).any(|w| w == b"Bartholomew"));

        let store = open_with(&memory, key).unwrap();
        assert_eq!(store.get("Patient", "p1").unwrap().payload["name"], "Annabelle Hathaway");
        assert_eq!(store.list("Patient").len(), 2);
        drop(store);

        let wrong = open_with(&memory, EncryptionKey::generate());
        assert!(matches!(wrong, Err(CoreError::DecryptionFailed { .. })));
        assert!(matches!(
            RecordStore::open(
                Box::new(memory.clone()),
                StoreConfig::default(),
                Arc::new(NamedReferenceMembers)
            ),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn stats_by_type() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create("Patient", json!({"id": "p1"})).unwrap();
        store.create("Patient", json!({"id": "p2"})).unwrap();
        store.create("Observation", json!({"id": "o1"})).unwrap();
        let stats = store.stats();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.pending_changes, 3);
        assert_eq!(stats.by_type["Patient"].records, 2);
        assert_eq!(stats.by_type["Observation"].pending_records, 1);
    }
}
