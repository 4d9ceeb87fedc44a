//! Request handlers for upload and download.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::records::{RecordTable, StoredRecord};
use caresync_codec::rewrite::{rewrite_document, rewrite_patch};
use caresync_codec::{apply, JsonPointer};
use caresync_sync_protocol::{
    DownloadPage, DownloadRequest, EntryOutcome, UploadBody, UploadEntry, UploadRequest,
    UploadResponse, Verb,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by all handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Record table.
    pub records: RwLock<RecordTable>,
}

impl HandlerContext {
    /// Creates a context with an empty table.
    pub fn new(config: ServerConfig) -> Self {
        let records = RwLock::new(RecordTable::new(config.first_id));
        Self { config, records }
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles an upload request.
    ///
    /// Entries are applied in order under one table lock. Every entry gets
    /// its own outcome; a refused entry does not stop the rest.
    pub fn handle_upload(&self, request: UploadRequest) -> ServerResult<UploadResponse> {
        let max = self.context.config.max_upload_entries;
        if request.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many entries: {} > {max}",
                request.len()
            )));
        }

        let bundled = matches!(request, UploadRequest::Bundled(_));
        let entries = match request {
            UploadRequest::Bundled(entries) => entries,
            UploadRequest::Single(entry) => vec![entry],
        };

        let mut table = self.context.records.write();
        let mut renames: Vec<(String, String)> = Vec::new();
        let mut outcomes = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if bundled && self.context.config.resolve_bundle_references {
                resolve_renames(&mut entry, &renames);
            }
            let outcome = self.apply_entry(&mut table, &entry);
            if let (Verb::Post, EntryOutcome::Created { resource_type, resource_id, .. }) =
                (entry.verb, &outcome)
            {
                renames.push((entry.reference(), format!("{resource_type}/{resource_id}")));
            }
            debug!(
                verb = %entry.verb,
                reference = %entry.reference(),
                success = outcome.is_success(),
                "upload entry"
            );
            outcomes.push(outcome);
        }

        info!(entries = outcomes.len(), bundled, "upload handled");
        Ok(UploadResponse::new(outcomes))
    }

    /// Handles a download request.
    ///
    /// The page token is the offset into the ordered result of the same
    /// query.
    pub fn handle_download(&self, request: DownloadRequest) -> ServerResult<DownloadPage> {
        let config = &self.context.config;
        let page_size = request
            .page_size
            .unwrap_or(config.page_size)
            .clamp(1, config.max_page_size);
        let offset = match request.page_token.as_deref() {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| {
                ServerError::InvalidRequest(format!("malformed page token {token:?}"))
            })?,
        };

        let changed = self.context.records.read().changed_since(
            &request.resource_type,
            request.updated_after,
            &request.params,
        );
        let end = offset.saturating_add(page_size).min(changed.len());
        let records = changed.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page_token = (end < changed.len()).then(|| end.to_string());

        debug!(
            resource_type = %request.resource_type,
            offset,
            returned = records.len(),
            more = next_page_token.is_some(),
            "download page"
        );
        Ok(DownloadPage {
            records,
            next_page_token,
        })
    }

    fn apply_entry(&self, table: &mut RecordTable, entry: &UploadEntry) -> EntryOutcome {
        let current = table.get(&entry.resource_type, &entry.resource_id).cloned();
        match entry.verb {
            Verb::Put => {
                let Some(mut payload) = resource_body(entry) else {
                    return rejected("PUT needs a resource body");
                };
                if let Some(live) = current.as_ref().filter(|r| !r.is_deleted()) {
                    if let Some(outcome) = check_version(entry, live) {
                        return outcome;
                    }
                }
                self.set_id(&mut payload, &entry.resource_id);
                let (stored, existed) = table.write(&entry.resource_type, &entry.resource_id, payload);
                if existed {
                    updated(&stored)
                } else {
                    created(&entry.resource_type, &entry.resource_id, &stored)
                }
            }
            Verb::Post => {
                let Some(mut payload) = resource_body(entry) else {
                    return rejected("POST needs a resource body");
                };
                let id = self.assign_id(table, &entry.resource_type);
                self.set_id(&mut payload, &id);
                let (stored, _) = table.write(&entry.resource_type, &id, payload);
                created(&entry.resource_type, &id, &stored)
            }
            Verb::Patch => {
                let Some(UploadBody::Patch(patch)) = &entry.body else {
                    return rejected("PATCH needs a patch body");
                };
                let Some(live) = current.filter(|r| !r.is_deleted()) else {
                    return rejected(format!("{} not found", entry.reference()));
                };
                if let Some(outcome) = check_version(entry, &live) {
                    return outcome;
                }
                let Some(base) = live.payload.as_ref() else {
                    return rejected(format!("{} not found", entry.reference()));
                };
                let mut patched = match apply(patch, base) {
                    Ok(patched) => patched,
                    Err(e) => return rejected(format!("patch does not apply: {e}")),
                };
                if !patched.is_object() {
                    return rejected("patched resource is not an object");
                }
                self.set_id(&mut patched, &entry.resource_id);
                let (stored, _) = table.write(&entry.resource_type, &entry.resource_id, patched);
                updated(&stored)
            }
            Verb::Delete => {
                if let Some(live) = current.as_ref().filter(|r| !r.is_deleted()) {
                    if let Some(outcome) = check_version(entry, live) {
                        return outcome;
                    }
                }
                table.delete(&entry.resource_type, &entry.resource_id);
                EntryOutcome::Deleted
            }
        }
    }

    fn assign_id(&self, table: &mut RecordTable, resource_type: &str) -> String {
        loop {
            let id = format!("{}{}", self.context.config.id_prefix, table.next_id());
            if !table.contains(resource_type, &id) {
                return id;
            }
        }
    }

    fn set_id(&self, payload: &mut Value, id: &str) {
        if let Some(object) = payload.as_object_mut() {
            object.insert(self.context.config.id_field.clone(), Value::String(id.to_string()));
        }
    }
}

/// Rewrites references to resources POSTed earlier in the same bundle.
fn resolve_renames(entry: &mut UploadEntry, renames: &[(String, String)]) {
    let accept_all = |_: &JsonPointer| true;
    for (old, new) in renames {
        if entry.reference() == *old {
            if let Some((_, id)) = new.split_once('/') {
                entry.resource_id = id.to_string();
            }
        }
        match &mut entry.body {
            Some(UploadBody::Resource(doc)) => {
                rewrite_document(doc, old, new, &accept_all);
            }
            Some(UploadBody::Patch(patch)) => {
                rewrite_patch(patch, old, new, &accept_all);
            }
            None => {}
        }
    }
}

fn resource_body(entry: &UploadEntry) -> Option<Value> {
    match &entry.body {
        Some(UploadBody::Resource(doc)) if doc.is_object() => Some(doc.clone()),
        _ => None,
    }
}

/// Returns a conflict outcome if the entry names a version the record no
/// longer has.
fn check_version(entry: &UploadEntry, current: &StoredRecord) -> Option<EntryOutcome> {
    let expected = entry.if_match.as_deref()?;
    let actual = current.version_tag();
    if normalize_tag(expected) == actual {
        return None;
    }
    Some(EntryOutcome::Conflict {
        message: format!(
            "{} is at version {actual}, change was made against {expected}",
            entry.reference()
        ),
    })
}

/// Strips the weak-validator prefix and quotes of an HTTP entity tag.
fn normalize_tag(tag: &str) -> &str {
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

fn created(resource_type: &str, resource_id: &str, stored: &StoredRecord) -> EntryOutcome {
    EntryOutcome::Created {
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        version_tag: Some(stored.version_tag()),
        last_updated: stored.last_updated,
    }
}

fn updated(stored: &StoredRecord) -> EntryOutcome {
    EntryOutcome::Updated {
        version_tag: Some(stored.version_tag()),
        last_updated: stored.last_updated,
    }
}

fn rejected(message: impl Into<String>) -> EntryOutcome {
    EntryOutcome::Rejected {
        message: message.into(),
    }
}
