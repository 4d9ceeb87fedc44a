//! Applying upload outcomes to the local store.
//!
//! Every acknowledged record is consolidated in its own transaction. A
//! create that came back with a new server id renumbers the record and
//! rewrites every local reference to it; the record and all referrers
//! known at lock time are locked together so no reader sees a half
//! renumbered graph. Referrers committed while the transaction ran are
//! picked up by a sweep afterwards.

use crate::error::{SyncError, SyncResult};
use crate::state::Renumbering;
use crate::upload::generator::PendingUpload;
use caresync_codec::rewrite::{rewrite_document, rewrite_patch};
use caresync_codec::{diff, JsonPointer, ReferenceRewriteMode};
use caresync_core::{
    write_id, ChangeKind, ChangeToken, CoreError, RecordKey, RecordSchema, RecordStore,
    RecordUuid, StoreTransaction,
};
use caresync_sync_protocol::{EntryOutcome, UploadEntry, Verb};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_SWEEPS: usize = 8;

/// What consolidating one entry did locally.
#[derive(Debug, Clone, PartialEq)]
pub enum Consolidated {
    /// The change was acknowledged and its token discarded.
    Acknowledged,
    /// A create was acknowledged under a new id.
    Renumbered(Renumbering),
    /// A delete was acknowledged and the record removed.
    Removed,
}

/// Applies server outcomes to the store.
pub struct Consolidator {
    store: Arc<RecordStore>,
    rewrite_mode: ReferenceRewriteMode,
}

impl Consolidator {
    /// Creates a consolidator.
    pub fn new(store: Arc<RecordStore>, rewrite_mode: ReferenceRewriteMode) -> Self {
        Self {
            store,
            rewrite_mode,
        }
    }

    /// Applies the outcome of one entry sent on its own.
    ///
    /// Conflicts and rejections come back as errors and leave the token
    /// in place, as does any local failure.
    pub fn consolidate(
        &self,
        member: &PendingUpload,
        entry: &UploadEntry,
        outcome: &EntryOutcome,
    ) -> SyncResult<Consolidated> {
        self.consolidate_in_batch(member, entry, outcome, &member.token)
    }

    /// Applies the outcome of one entry of a request whose entries cover
    /// the changes in `in_flight`.
    ///
    /// A renumbering that rewrites a referrer's in-flight change also
    /// appends a corrective UPDATE for it: the server already holds the
    /// old reference from this request.
    pub fn consolidate_in_batch(
        &self,
        member: &PendingUpload,
        entry: &UploadEntry,
        outcome: &EntryOutcome,
        in_flight: &ChangeToken,
    ) -> SyncResult<Consolidated> {
        let reference = member.reference();
        match (entry.verb, outcome) {
            (
                Verb::Put | Verb::Post,
                EntryOutcome::Created {
                    resource_type,
                    resource_id,
                    version_tag,
                    last_updated,
                },
            ) => {
                if resource_type != &member.record_type {
                    return Err(SyncError::Protocol(format!(
                        "{reference} was created as {resource_type}/{resource_id}"
                    )));
                }
                self.on_created(member, resource_id, version_tag.clone(), *last_updated, in_flight)
            }
            // A replayed PUT of a create the server already holds.
            (
                Verb::Put,
                EntryOutcome::Updated {
                    version_tag,
                    last_updated,
                },
            )
            | (
                Verb::Patch,
                EntryOutcome::Updated {
                    version_tag,
                    last_updated,
                },
            ) => self.on_updated(member, version_tag.clone(), *last_updated),
            (Verb::Delete, EntryOutcome::Deleted) => self.on_deleted(member),
            (_, EntryOutcome::Conflict { message }) => Err(SyncError::Conflict {
                reference,
                message: message.clone(),
            }),
            (_, EntryOutcome::Rejected { message }) => Err(SyncError::Rejected {
                reference,
                message: message.clone(),
            }),
            (verb, outcome) => Err(SyncError::Protocol(format!(
                "unexpected outcome {outcome:?} for {verb} {reference}"
            ))),
        }
    }

    fn on_created(
        &self,
        member: &PendingUpload,
        server_id: &str,
        version_tag: Option<String>,
        last_updated: DateTime<Utc>,
        in_flight: &ChangeToken,
    ) -> SyncResult<Consolidated> {
        let record_uuid = member.record_uuid;
        let old_reference = member.reference();
        if server_id == member.external_id {
            self.acknowledge(member, version_tag, last_updated)?;
            return Ok(Consolidated::Acknowledged);
        }

        let new_reference = RecordKey::new(&member.record_type, server_id).reference();
        let mut lock_set: BTreeSet<RecordUuid> = self.referrer_uuids(&old_reference);
        lock_set.insert(record_uuid);
        let lock_set: Vec<RecordUuid> = lock_set.into_iter().collect();

        let schema = Arc::clone(self.store.schema());
        let rewrite = ReferenceRewrite {
            mode: self.rewrite_mode,
            old_reference: &old_reference,
            new_reference: &new_reference,
            in_flight,
        };
        let referrers_rewritten = self
            .store
            .transaction(&lock_set, |txn| {
                let mut row = txn
                    .record(record_uuid)
                    .ok_or_else(|| CoreError::not_found(&member.record_type, &member.external_id))?;
                row.external_id = server_id.to_string();
                write_id(schema.as_ref(), &row.record_type, &mut row.payload, server_id)?;
                row.version_tag = version_tag.clone();
                row.last_updated_remote = Some(last_updated);
                txn.put_record(row)?;
                txn.discard_token(record_uuid, &member.token)?;
                txn.retag(record_uuid, version_tag.clone())?;
                rewrite_own_id(txn, schema.as_ref(), member, server_id)?;

                let referrers: BTreeSet<RecordUuid> = txn
                    .referrers(&old_reference)
                    .into_iter()
                    .map(|entry| entry.referrer_uuid)
                    .filter(|uuid| txn.is_locked(*uuid))
                    .collect();
                let mut rewritten = 0;
                for referrer in referrers {
                    if rewrite.apply(txn, schema.as_ref(), referrer)? {
                        rewritten += 1;
                    }
                }
                Ok(rewritten)
            })
            .map_err(|e| consolidation_error(&old_reference, e))?;

        let swept = self.sweep(&rewrite)?;
        info!(
            from = %old_reference,
            to = %new_reference,
            referrers = referrers_rewritten + swept,
            "record renumbered"
        );
        Ok(Consolidated::Renumbered(Renumbering {
            record_uuid,
            old_reference,
            new_reference,
            referrers_rewritten: referrers_rewritten + swept,
        }))
    }

    fn on_updated(
        &self,
        member: &PendingUpload,
        version_tag: Option<String>,
        last_updated: DateTime<Utc>,
    ) -> SyncResult<Consolidated> {
        self.acknowledge(member, version_tag, last_updated)?;
        Ok(Consolidated::Acknowledged)
    }

    fn acknowledge(
        &self,
        member: &PendingUpload,
        version_tag: Option<String>,
        last_updated: DateTime<Utc>,
    ) -> SyncResult<()> {
        let record_uuid = member.record_uuid;
        self.store
            .transaction(&[record_uuid], |txn| {
                let mut row = txn
                    .record(record_uuid)
                    .ok_or_else(|| CoreError::not_found(&member.record_type, &member.external_id))?;
                row.version_tag = version_tag.clone();
                row.last_updated_remote = Some(last_updated);
                txn.put_record(row)?;
                txn.discard_token(record_uuid, &member.token)?;
                txn.retag(record_uuid, version_tag.clone())
            })
            .map_err(|e| consolidation_error(&member.reference(), e))?;
        debug!(reference = %member.reference(), version = ?version_tag, "upload acknowledged");
        Ok(())
    }

    fn on_deleted(&self, member: &PendingUpload) -> SyncResult<Consolidated> {
        let record_uuid = member.record_uuid;
        let removed = self
            .store
            .transaction(&[record_uuid], |txn| {
                txn.discard_token(record_uuid, &member.token)?;
                if txn.changes(record_uuid).is_empty() {
                    txn.remove_record(record_uuid)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            })
            .map_err(|e| consolidation_error(&member.reference(), e))?;
        debug!(reference = %member.reference(), removed, "delete acknowledged");
        Ok(if removed {
            Consolidated::Removed
        } else {
            Consolidated::Acknowledged
        })
    }

    /// Rewrites referrers of `old_reference` that appeared after the
    /// renumbering transaction took its locks.
    fn sweep(&self, rewrite: &ReferenceRewrite<'_>) -> SyncResult<usize> {
        let schema = Arc::clone(self.store.schema());
        let old_reference = rewrite.old_reference;
        let mut total = 0;
        for _ in 0..MAX_SWEEPS {
            // The old id may have been taken by a new local record.
            if let Some(key) = RecordKey::parse_reference(old_reference) {
                if self.store.find_uuid(&key).is_some() {
                    return Ok(total);
                }
            }
            let referrers: Vec<RecordUuid> = self.referrer_uuids(old_reference).into_iter().collect();
            if referrers.is_empty() {
                return Ok(total);
            }
            total += self
                .store
                .transaction(&referrers, |txn| {
                    let mut rewritten = 0;
                    for referrer in &referrers {
                        if rewrite.apply(txn, schema.as_ref(), *referrer)? {
                            rewritten += 1;
                        }
                    }
                    Ok(rewritten)
                })
                .map_err(|e| consolidation_error(old_reference, e))?;
        }
        warn!(reference = %old_reference, "references still pending after sweeping");
        Err(SyncError::consolidation(
            old_reference,
            "referrers kept appearing while renumbering",
        ))
    }

    fn referrer_uuids(&self, target: &str) -> BTreeSet<RecordUuid> {
        self.store
            .referrers(target)
            .into_iter()
            .map(|entry| entry.referrer_uuid)
            .collect()
    }
}

impl std::fmt::Debug for Consolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consolidator")
            .field("rewrite_mode", &self.rewrite_mode)
            .finish_non_exhaustive()
    }
}

fn consolidation_error(reference: &str, error: CoreError) -> SyncError {
    if error.is_fatal() {
        SyncError::Core(error)
    } else {
        SyncError::consolidation(reference, error.to_string())
    }
}

/// Rewrites the embedded id in the record's remaining pending entries.
fn rewrite_own_id(
    txn: &mut StoreTransaction<'_>,
    schema: &dyn RecordSchema,
    member: &PendingUpload,
    server_id: &str,
) -> Result<(), CoreError> {
    let record_uuid = member.record_uuid;
    let id_pointer = schema.id_pointer(&member.record_type);
    let is_id = |pointer: &JsonPointer| pointer == &id_pointer;
    for entry in txn.changes(record_uuid) {
        match entry.kind {
            ChangeKind::Insert { mut snapshot } => {
                write_id(schema, &member.record_type, &mut snapshot, server_id)?;
                txn.replace_change(record_uuid, entry.id, ChangeKind::Insert { snapshot })?;
            }
            ChangeKind::Update { mut patch } => {
                if rewrite_patch(&mut patch, &member.external_id, server_id, &is_id) > 0 {
                    txn.replace_change(record_uuid, entry.id, ChangeKind::Update { patch })?;
                }
            }
            ChangeKind::Delete => {}
        }
    }
    Ok(())
}

/// One renumbering as seen by the records that point at it.
struct ReferenceRewrite<'a> {
    mode: ReferenceRewriteMode,
    old_reference: &'a str,
    new_reference: &'a str,
    /// Changes sent in the request being consolidated.
    in_flight: &'a ChangeToken,
}

impl ReferenceRewrite<'_> {
    /// Rewrites one referrer's snapshot and pending entries. Returns true
    /// if anything changed.
    ///
    /// The server copy is corrected with an UPDATE when the referrer has
    /// nothing pending, or when a rewritten entry was already sent with
    /// the old reference.
    fn apply(
        &self,
        txn: &mut StoreTransaction<'_>,
        schema: &dyn RecordSchema,
        referrer: RecordUuid,
    ) -> Result<bool, CoreError> {
        let Some(mut row) = txn.record(referrer) else {
            return Ok(false);
        };
        let (old_reference, new_reference) = (self.old_reference, self.new_reference);
        let record_type = row.record_type.clone();
        let mode = self.mode;
        let accept = |pointer: &JsonPointer| {
            mode.accepts(pointer, |p| schema.is_reference_field(&record_type, p))
        };

        let before = row.payload.clone();
        let in_payload = rewrite_document(&mut row.payload, old_reference, new_reference, &accept);

        let entries = txn.changes(referrer);
        let had_pending = !entries.is_empty();
        let mut in_entries = 0;
        let mut sent_stale = false;
        for entry in entries {
            let kind = match entry.kind {
                ChangeKind::Insert { mut snapshot } => {
                    match rewrite_document(&mut snapshot, old_reference, new_reference, &accept) {
                        0 => continue,
                        n => {
                            in_entries += n;
                            ChangeKind::Insert { snapshot }
                        }
                    }
                }
                ChangeKind::Update { mut patch } => {
                    match rewrite_patch(&mut patch, old_reference, new_reference, &accept) {
                        0 => continue,
                        n => {
                            in_entries += n;
                            ChangeKind::Update { patch }
                        }
                    }
                }
                ChangeKind::Delete => continue,
            };
            sent_stale |= self.in_flight.contains(entry.id);
            txn.replace_change(referrer, entry.id, kind)?;
        }

        if in_payload > 0 {
            let patch = diff(&before, &row.payload);
            let version_tag = row.version_tag.clone();
            let live = row.is_live();
            txn.put_record(row)?;
            if live && (!had_pending || sent_stale) {
                debug!(referrer = %referrer, to = %new_reference, "corrective update queued");
                txn.append_change(referrer, ChangeKind::Update { patch }, version_tag)?;
            }
        }
        Ok(in_payload + in_entries > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::generator::collect_pending;
    use caresync_core::SquashedOperation;
    use serde_json::json;

    fn created(id: &str, tag: &str) -> EntryOutcome {
        EntryOutcome::Created {
            resource_type: "Patient".into(),
            resource_id: id.into(),
            version_tag: Some(tag.into()),
            last_updated: Utc::now(),
        }
    }

    fn pending_for(store: &RecordStore, reference: &str) -> PendingUpload {
        collect_pending(store)
            .unwrap()
            .uploads
            .into_iter()
            .find(|p| p.reference() == reference)
            .unwrap()
    }

    fn post(member: &PendingUpload) -> UploadEntry {
        member.entry(crate::config::CreateMode::ServerAssigned).unwrap()
    }

    #[test]
    fn created_with_new_id_rewrites_referrers() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "tmp-1", "name": "Ann"})).unwrap();
        let obs = store
            .create("Observation", json!({"id": "o1", "subject": {"reference": "Patient/tmp-1"}}))
            .unwrap();
        let member = pending_for(&store, "Patient/tmp-1");
        let consolidator = Consolidator::new(Arc::clone(&store), ReferenceRewriteMode::IndexedFields);

        let result = consolidator
            .consolidate(&member, &post(&member), &created("42", "1"))
            .unwrap();
        let Consolidated::Renumbered(renumbering) = result else {
            panic!("expected renumbering, got {result:?}");
        };
        assert_eq!(renumbering.new_reference, "Patient/42");
        assert_eq!(renumbering.referrers_rewritten, 1);

        let patient = store.get("Patient", "42").unwrap();
        assert_eq!(patient.payload["id"], "42");
        assert_eq!(patient.version_tag.as_deref(), Some("1"));
        assert!(store.get("Patient", "tmp-1").is_none());
        assert!(!store.has_pending(patient.record_uuid));

        let observation = store.get_by_uuid(obs.record_uuid).unwrap();
        assert_eq!(observation.payload["subject"]["reference"], "Patient/42");
        let squashed = store.squashed(obs.record_uuid).unwrap().unwrap();
        assert_eq!(
            squashed.operation,
            SquashedOperation::Insert(json!({"id": "o1", "subject": {"reference": "Patient/42"}}))
        );
        assert!(store.referrers("Patient/tmp-1").is_empty());
        assert_eq!(store.referrers("Patient/42").len(), 1);
    }

    #[test]
    fn later_edits_survive_and_follow_the_new_id() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "tmp-1", "name": "Ann"})).unwrap();
        let member = pending_for(&store, "Patient/tmp-1");
        store
            .update("Patient", "tmp-1", json!({"id": "tmp-1", "name": "Anna"}))
            .unwrap();

        let consolidator = Consolidator::new(Arc::clone(&store), ReferenceRewriteMode::IndexedFields);
        consolidator
            .consolidate(&member, &post(&member), &created("42", "1"))
            .unwrap();

        let squashed = store.squashed(member.record_uuid).unwrap().unwrap();
        assert!(matches!(squashed.operation, SquashedOperation::Update(_)));
        assert_eq!(squashed.version_tag.as_deref(), Some("1"));
        assert_eq!(store.get("Patient", "42").unwrap().payload["name"], "Anna");
    }

    #[test]
    fn failed_renumbering_rolls_back_everything() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let temp = store.create("Patient", json!({"id": "tmp-1", "name": "Ann"})).unwrap();
        store.create("Patient", json!({"id": "42", "name": "Bob"})).unwrap();
        let obs = store
            .create("Observation", json!({"id": "o1", "subject": {"reference": "Patient/tmp-1"}}))
            .unwrap();
        let member = pending_for(&store, "Patient/tmp-1");
        let consolidator = Consolidator::new(Arc::clone(&store), ReferenceRewriteMode::IndexedFields);

        let result = consolidator.consolidate(&member, &post(&member), &created("42", "1"));
        assert!(matches!(result, Err(SyncError::ConsolidationFailure { .. })), "{result:?}");

        let patient = store.get("Patient", "tmp-1").unwrap();
        assert_eq!(patient.record_uuid, temp.record_uuid);
        assert_eq!(patient.version_tag, None);
        let squashed = store.squashed(temp.record_uuid).unwrap().unwrap();
        assert_eq!(squashed.token, member.token);
        assert!(matches!(squashed.operation, SquashedOperation::Insert(_)));
        assert_eq!(store.get("Patient", "42").unwrap().payload["name"], "Bob");

        let observation = store.get_by_uuid(obs.record_uuid).unwrap();
        assert_eq!(observation.payload["subject"]["reference"], "Patient/tmp-1");
        assert_eq!(
            store.squashed(obs.record_uuid).unwrap().unwrap().operation,
            SquashedOperation::Insert(json!({"id": "o1", "subject": {"reference": "Patient/tmp-1"}}))
        );
        assert_eq!(store.referrers("Patient/tmp-1").len(), 1);
        assert!(store.referrers("Patient/42").is_empty());
    }

    #[test]
    fn conflict_keeps_the_token() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        let member = pending_for(&store, "Patient/p1");
        let consolidator = Consolidator::new(Arc::clone(&store), ReferenceRewriteMode::IndexedFields);

        let outcome = EntryOutcome::Conflict {
            message: "version mismatch".into(),
        };
        let result = consolidator.consolidate(&member, &post(&member), &outcome);
        assert!(matches!(result, Err(SyncError::Conflict { .. })));
        assert!(store.has_pending(member.record_uuid));
    }

    #[test]
    fn acknowledged_delete_removes_the_row() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let row = store.create("Patient", json!({"id": "p1"})).unwrap();
        store
            .transaction(&[row.record_uuid], |txn| txn.clear_changes(row.record_uuid))
            .unwrap();
        store.delete("Patient", "p1").unwrap();

        let member = pending_for(&store, "Patient/p1");
        let entry = member.entry(crate::config::CreateMode::ClientId).unwrap();
        let consolidator = Consolidator::new(Arc::clone(&store), ReferenceRewriteMode::IndexedFields);
        let result = consolidator
            .consolidate(&member, &entry, &EntryOutcome::Deleted)
            .unwrap();
        assert_eq!(result, Consolidated::Removed);
        assert!(store.get_by_uuid(row.record_uuid).is_none());
    }

    #[test]
    fn mismatched_outcome_is_a_protocol_error() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        let member = pending_for(&store, "Patient/p1");
        let consolidator = Consolidator::new(Arc::clone(&store), ReferenceRewriteMode::IndexedFields);
        let result = consolidator.consolidate(&member, &post(&member), &EntryOutcome::Deleted);
        assert!(matches!(result, Err(SyncError::Protocol(_))));
        assert!(store.has_pending(member.record_uuid));
    }

    #[test]
    fn uploaded_referrer_gets_a_corrective_update() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "tmp-1"})).unwrap();
        let obs = store
            .create("Observation", json!({"id": "o1", "subject": {"reference": "Patient/tmp-1"}}))
            .unwrap();
        store
            .transaction(&[obs.record_uuid], |txn| txn.clear_changes(obs.record_uuid))
            .unwrap();

        let member = pending_for(&store, "Patient/tmp-1");
        let consolidator = Consolidator::new(Arc::clone(&store), ReferenceRewriteMode::IndexedFields);
        consolidator
            .consolidate(&member, &post(&member), &created("42", "1"))
            .unwrap();

        let squashed = store.squashed(obs.record_uuid).unwrap().unwrap();
        let SquashedOperation::Update(patch) = squashed.operation else {
            panic!("expected an update");
        };
        assert_eq!(patch.len(), 1);
    }
}
