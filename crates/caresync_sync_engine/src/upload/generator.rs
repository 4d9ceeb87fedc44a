//! Squashed changes to upload requests.

use crate::config::{CreateMode, UploadStrategy};
use crate::error::SyncResult;
use crate::state::RecordFailure;
use caresync_core::{squash, ChangeToken, CoreError, RecordStore, RecordUuid, SquashedOperation};
use caresync_sync_protocol::{UploadBody, UploadEntry, UploadRequest, Verb};
use tracing::debug;

/// One record's squashed change, ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    /// Local uuid of the record.
    pub record_uuid: RecordUuid,
    /// Record type.
    pub record_type: String,
    /// External id at the time the change was read.
    pub external_id: String,
    /// The squashed operation.
    pub operation: SquashedOperation,
    /// Version tag of the first squashed entry.
    pub version_tag: Option<String>,
    /// Ids the operation covers.
    pub token: ChangeToken,
}

impl PendingUpload {
    /// Returns `"<type>/<id>"`.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.record_type, self.external_id)
    }

    /// Builds the upload entry, or `None` for a local discard.
    pub fn entry(&self, create_mode: CreateMode) -> Option<UploadEntry> {
        let (verb, body) = match &self.operation {
            SquashedOperation::Insert(snapshot) => {
                let verb = match create_mode {
                    CreateMode::ClientId => Verb::Put,
                    CreateMode::ServerAssigned => Verb::Post,
                };
                (verb, Some(UploadBody::Resource(snapshot.clone())))
            }
            SquashedOperation::Update(patch) => (Verb::Patch, Some(UploadBody::Patch(patch.clone()))),
            SquashedOperation::Delete => (Verb::Delete, None),
            SquashedOperation::Discard => return None,
        };
        Some(UploadEntry {
            verb,
            resource_type: self.record_type.clone(),
            resource_id: self.external_id.clone(),
            body,
            if_match: self.version_tag.clone(),
        })
    }
}

/// Pending work read from the store.
#[derive(Debug, Default)]
pub struct PendingSet {
    /// Changes to send.
    pub uploads: Vec<PendingUpload>,
    /// Changes that cancel out locally.
    pub discards: Vec<PendingUpload>,
    /// Records whose changes could not be squashed.
    pub failures: Vec<RecordFailure>,
}

/// Squashes every record with pending changes.
///
/// A record whose patches fail to fold is reported and skipped. A
/// malformed change sequence aborts the whole read.
pub fn collect_pending(store: &RecordStore) -> SyncResult<PendingSet> {
    let mut set = PendingSet::default();
    for record_uuid in store.pending_records() {
        match read_pending(store, record_uuid, None) {
            Ok(Some(pending)) => {
                if pending.operation == SquashedOperation::Discard {
                    set.discards.push(pending);
                } else {
                    set.uploads.push(pending);
                }
            }
            Ok(None) => {}
            Err(CoreError::Codec(e)) => {
                let reference = store
                    .get_by_uuid(record_uuid)
                    .map(|row| row.reference())
                    .unwrap_or_else(|| record_uuid.to_string());
                set.failures.push(RecordFailure {
                    record_uuid: Some(record_uuid),
                    reference,
                    error: e.into(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    debug!(
        uploads = set.uploads.len(),
        discards = set.discards.len(),
        failures = set.failures.len(),
        "pending changes collected"
    );
    Ok(set)
}

/// Re-reads a planned upload from the store just before it is sent.
///
/// Only the entries of the planned token are folded, so edits made after
/// planning wait for the next cycle. Returns `None` if any of those
/// entries is gone, which happens when a download resolved the record in
/// the meantime.
pub fn refresh(store: &RecordStore, planned: &PendingUpload) -> SyncResult<Option<PendingUpload>> {
    Ok(read_pending(store, planned.record_uuid, Some(&planned.token))?)
}

fn read_pending(
    store: &RecordStore,
    record_uuid: RecordUuid,
    only: Option<&ChangeToken>,
) -> Result<Option<PendingUpload>, CoreError> {
    let Some(row) = store.get_by_uuid(record_uuid) else {
        return Ok(None);
    };
    let mut entries = store.changes_for(record_uuid);
    if let Some(token) = only {
        entries.retain(|entry| token.contains(entry.id));
        if entries.len() != token.len() {
            return Ok(None);
        }
    }
    Ok(squash(&entries)?.map(|squashed| PendingUpload {
        record_uuid,
        record_type: row.record_type,
        external_id: row.external_id,
        operation: squashed.operation,
        version_tag: squashed.version_tag,
        token: squashed.token,
    }))
}

/// An upload request and the changes its entries came from.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    /// The request to send.
    pub request: UploadRequest,
    /// Source changes, aligned with the request entries.
    pub members: Vec<PendingUpload>,
}

impl UploadBatch {
    /// Returns the tokens to discard once the request is acknowledged.
    pub fn tokens(&self) -> Vec<&ChangeToken> {
        self.members.iter().map(|member| &member.token).collect()
    }
}

/// Splits pending changes into request-sized groups.
///
/// Bundled groups hold up to `batch_size` changes (all when `None`);
/// per-record groups hold exactly one.
pub fn plan(
    pending: Vec<PendingUpload>,
    strategy: UploadStrategy,
    batch_size: Option<usize>,
) -> Vec<Vec<PendingUpload>> {
    let pending: Vec<PendingUpload> = pending
        .into_iter()
        .filter(|p| p.operation != SquashedOperation::Discard)
        .collect();
    if pending.is_empty() {
        return Vec::new();
    }
    let size = match strategy {
        UploadStrategy::PerRecord => 1,
        UploadStrategy::Bundled => batch_size.unwrap_or(pending.len()).max(1),
    };
    let mut groups = Vec::new();
    let mut iter = pending.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(size).collect());
    }
    groups
}

/// Builds the request for one planned group.
pub fn build(
    members: Vec<PendingUpload>,
    strategy: UploadStrategy,
    create_mode: CreateMode,
) -> Option<UploadBatch> {
    let (entries, members): (Vec<UploadEntry>, Vec<PendingUpload>) = members
        .into_iter()
        .filter_map(|member| member.entry(create_mode).map(|entry| (entry, member)))
        .unzip();
    let request = match strategy {
        UploadStrategy::PerRecord if entries.len() == 1 => {
            UploadRequest::Single(entries.into_iter().next()?)
        }
        _ if entries.is_empty() => return None,
        _ => UploadRequest::Bundled(entries),
    };
    Some(UploadBatch { request, members })
}

/// Turns squashed changes into requests and the tokens they cover.
pub fn generate(
    pending: Vec<PendingUpload>,
    strategy: UploadStrategy,
    create_mode: CreateMode,
    batch_size: Option<usize>,
) -> Vec<UploadBatch> {
    plan(pending, strategy, batch_size)
        .into_iter()
        .filter_map(|group| build(group, strategy, create_mode))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use caresync_codec::diff;
    use caresync_core::ChangeId;
    use serde_json::json;

    fn pending(id: &str, operation: SquashedOperation, ids: &[u64]) -> PendingUpload {
        PendingUpload {
            record_uuid: RecordUuid::new(),
            record_type: "Patient".into(),
            external_id: id.into(),
            operation,
            version_tag: Some("2".into()),
            token: ChangeToken::new(ids.iter().copied().map(ChangeId::new)),
        }
    }

    fn sample() -> Vec<PendingUpload> {
        vec![
            pending("a", SquashedOperation::Insert(json!({"id": "a"})), &[1, 2]),
            pending(
                "b",
                SquashedOperation::Update(diff(&json!({"n": 1}), &json!({"n": 2}))),
                &[3],
            ),
            pending("c", SquashedOperation::Discard, &[4, 5]),
            pending("d", SquashedOperation::Delete, &[6]),
        ]
    }

    #[test]
    fn bundled_maps_verbs_and_skips_discards() {
        let batches = generate(sample(), UploadStrategy::Bundled, CreateMode::ClientId, None);
        assert_eq!(batches.len(), 1);
        let entries = batches[0].request.entries();
        let verbs: Vec<Verb> = entries.iter().map(|entry| entry.verb).collect();
        assert_eq!(verbs, vec![Verb::Put, Verb::Patch, Verb::Delete]);
        assert_eq!(entries[1].if_match.as_deref(), Some("2"));
        assert!(entries[2].body.is_none());
        assert_eq!(batches[0].tokens().len(), 3);
    }

    #[test]
    fn server_assigned_creates_use_post() {
        let batches = generate(sample(), UploadStrategy::Bundled, CreateMode::ServerAssigned, None);
        assert_eq!(batches[0].request.entries()[0].verb, Verb::Post);
    }

    #[test]
    fn per_record_sends_single_requests() {
        let batches = generate(sample(), UploadStrategy::PerRecord, CreateMode::ClientId, None);
        assert_eq!(batches.len(), 3);
        assert!(batches
            .iter()
            .all(|batch| matches!(batch.request, UploadRequest::Single(_))));
        assert_eq!(batches[0].members[0].token.len(), 2);
    }

    #[test]
    fn bundled_batches_respect_size() {
        let batches = generate(sample(), UploadStrategy::Bundled, CreateMode::ClientId, Some(2));
        let sizes: Vec<usize> = batches.iter().map(|batch| batch.request.len()).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn refresh_ignores_later_entries() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create("Patient", json!({"id": "p1", "n": 1})).unwrap();
        let set = collect_pending(&store).unwrap();
        assert_eq!(set.uploads.len(), 1);
        let planned = set.uploads[0].clone();

        store.update("Patient", "p1", json!({"id": "p1", "n": 2})).unwrap();
        let fresh = refresh(&store, &planned).unwrap().unwrap();
        assert_eq!(fresh.token, planned.token);
        assert_eq!(fresh.operation, SquashedOperation::Insert(json!({"id": "p1", "n": 1})));
    }

    #[test]
    fn collect_separates_discards() {
        let store = RecordStore::open_in_memory().unwrap();
        store.create("Patient", json!({"id": "p1"})).unwrap();
        store.delete("Patient", "p1").unwrap();
        store.create("Patient", json!({"id": "p2"})).unwrap();

        let set = collect_pending(&store).unwrap();
        assert_eq!(set.discards.len(), 1);
        assert_eq!(set.uploads.len(), 1);
        assert_eq!(set.uploads[0].external_id, "p2");
    }
}
