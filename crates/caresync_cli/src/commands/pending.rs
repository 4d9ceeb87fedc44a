//! Pending command implementation.

use super::open_store;
use caresync_core::SquashedOperation;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// One record's squashed pending change.
#[derive(Debug, Serialize)]
pub struct PendingInfo {
    /// Local record uuid.
    pub record_uuid: String,
    /// `"<type>/<id>"` of the record.
    pub reference: String,
    /// `insert`, `update`, `delete` or `discard`.
    pub operation: &'static str,
    /// Version tag the change was made against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<String>,
    /// Number of change log entries folded into this change.
    pub entries: usize,
    /// Snapshot for inserts, patch for updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Runs the pending command.
pub fn run(
    path: &Path,
    record_type: Option<&str>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pending = collect(path, record_type, limit)?;
    println!("{}", serde_json::to_string_pretty(&pending)?);
    Ok(())
}

/// Opens the store and squashes every pending record.
pub fn collect(
    path: &Path,
    record_type: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<PendingInfo>, Box<dyn std::error::Error>> {
    info!("Listing pending changes in {:?}", path);
    let store = open_store(path)?;
    let mut pending = Vec::new();

    for record_uuid in store.pending_records() {
        if pending.len() >= limit.unwrap_or(usize::MAX) {
            break;
        }
        let Some(row) = store.get_by_uuid(record_uuid) else {
            continue;
        };
        if record_type.is_some_and(|t| t != row.record_type) {
            continue;
        }
        let Some(change) = store.squashed(record_uuid)? else {
            continue;
        };
        let body = match &change.operation {
            SquashedOperation::Insert(snapshot) => Some(snapshot.clone()),
            SquashedOperation::Update(patch) => Some(patch.to_json()),
            SquashedOperation::Delete | SquashedOperation::Discard => None,
        };
        pending.push(PendingInfo {
            record_uuid: record_uuid.to_string(),
            reference: row.reference(),
            operation: change.operation.name(),
            version_tag: change.version_tag,
            entries: change.token.len(),
            body,
        });
    }

    Ok(pending)
}
