//! Collapsing a record's pending changes into one outgoing change.

use crate::change::entry::{ChangeKind, ChangeLogEntry, ChangeToken};
use crate::error::{CoreError, CoreResult};
use crate::types::RecordUuid;
use caresync_codec::{apply_in_place, merge, Patch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The network-level effect of a record's pending changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "body", rename_all = "snake_case")]
pub enum SquashedOperation {
    /// Create the record with this snapshot.
    Insert(Value),
    /// Apply this patch to the server's copy.
    Update(Patch),
    /// Delete the server's copy.
    Delete,
    /// The record never reached the server and was deleted locally;
    /// nothing has to be sent.
    Discard,
}

impl SquashedOperation {
    /// Short name used in logs and listings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete => "delete",
            Self::Discard => "discard",
        }
    }
}

/// The squashed form of a record's pending changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquashedChange {
    /// Record the change applies to.
    pub record_uuid: RecordUuid,
    /// Combined operation.
    pub operation: SquashedOperation,
    /// Version tag of the first squashed entry.
    pub version_tag: Option<String>,
    /// Ids of every entry folded into this change.
    pub token: ChangeToken,
}

/// Squashes the pending changes of one record.
///
/// Entries are folded left to right in id order:
///
/// - INSERT followed by UPDATEs becomes one INSERT of the final snapshot
/// - consecutive UPDATEs become one UPDATE with the merged patch
/// - anything followed by DELETE becomes a DELETE, or [`SquashedOperation::Discard`]
///   when the sequence starts with INSERT
///
/// Returns `None` for an empty input.
///
/// # Errors
///
/// [`CoreError::MalformedChangeSequence`] if INSERT is not first, something
/// follows DELETE or the entries belong to different records;
/// [`CoreError::Codec`] if a patch does not apply to the INSERT snapshot.
pub fn squash(entries: &[ChangeLogEntry]) -> CoreResult<Option<SquashedChange>> {
    let mut ordered: Vec<&ChangeLogEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| entry.id);

    let Some(first) = ordered.first() else {
        return Ok(None);
    };
    let record_uuid = first.record_uuid;

    let mut operation: Option<SquashedOperation> = None;
    for entry in &ordered {
        if entry.record_uuid != record_uuid {
            return Err(CoreError::malformed_sequence(
                record_uuid,
                format!("{} belongs to record {}", entry.id, entry.record_uuid),
            ));
        }

        operation = Some(match (operation, &entry.kind) {
            (None, ChangeKind::Insert { snapshot }) => SquashedOperation::Insert(snapshot.clone()),
            (None, ChangeKind::Update { patch }) => SquashedOperation::Update(patch.clone()),
            (None, ChangeKind::Delete) => SquashedOperation::Delete,

            (Some(_), ChangeKind::Insert { .. }) => {
                return Err(CoreError::malformed_sequence(
                    record_uuid,
                    format!("insert {} is not the first change", entry.id),
                ));
            }
            (Some(SquashedOperation::Delete | SquashedOperation::Discard), _) => {
                return Err(CoreError::malformed_sequence(
                    record_uuid,
                    format!("{} follows a delete", entry.id),
                ));
            }

            (Some(SquashedOperation::Insert(mut snapshot)), ChangeKind::Update { patch }) => {
                apply_in_place(patch, &mut snapshot)?;
                SquashedOperation::Insert(snapshot)
            }
            (Some(SquashedOperation::Update(merged)), ChangeKind::Update { patch }) => {
                SquashedOperation::Update(merge(&merged, patch)?)
            }

            (Some(SquashedOperation::Insert(_)), ChangeKind::Delete) => SquashedOperation::Discard,
            (Some(SquashedOperation::Update(_)), ChangeKind::Delete) => SquashedOperation::Delete,
        });
    }

    let Some(operation) = operation else {
        return Ok(None);
    };

    Ok(Some(SquashedChange {
        record_uuid,
        operation,
        version_tag: first.version_tag_at_change.clone(),
        token: ChangeToken::new(ordered.iter().map(|entry| entry.id)),
    }))
}
