//! The download cycle.
//!
//! For each configured type a fetch task pulls pages ahead into a bounded
//! channel while the calling task applies them. Each remote record is
//! applied in its own transaction. The type's cursor is persisted only
//! after every record of a page was applied, so a failure or a
//! cancellation never moves the watermark past unapplied data.

use crate::config::{DownloadTypeConfig, EscalationPolicy, SyncConfig};
use crate::download::resolver::{ConflictResolver, Resolution};
use crate::download::state::{cursor_key, DownloadCursor, DownloadState};
use crate::error::{SyncError, SyncResult};
use crate::state::{DownloadReport, RecordFailure, TypeDownload};
use crate::transport::Transport;
use caresync_codec::diff;
use caresync_core::{
    squash, write_id, ChangeKind, CoreError, RecordKey, RecordRow, RecordSchema, RecordStore,
    RecordUuid, SquashedOperation, StoreTransaction,
};
use caresync_sync_protocol::{DownloadPage, RemoteRecord};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const KEEP_LOCAL_PREFIX: &str = "keep_local/";

fn keep_local_key(record_uuid: RecordUuid) -> String {
    format!("{KEEP_LOCAL_PREFIX}{record_uuid}")
}

/// Reads the persisted download state of a type.
pub fn load_state(store: &RecordStore, resource_type: &str) -> SyncResult<DownloadState> {
    let cursor: Option<DownloadCursor> = store.meta(&cursor_key(resource_type))?;
    Ok(DownloadState::from_cursor(cursor))
}

/// What applying one remote record did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Inserted,
    Overwritten,
    Removed,
    Resolved,
    /// Pending local changes win without a resolver call.
    LocalWins,
    /// The resolver kept the local copy; the page is fetched again.
    KeptLocal,
    /// Kept local too often and reported.
    Escalated,
    Skipped,
}

enum Fetched {
    Page(DownloadPage),
    Failed(SyncError),
}

/// Runs download cycles against a transport.
pub struct DownloadPipeline {
    store: Arc<RecordStore>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn ConflictResolver>,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl DownloadPipeline {
    /// Creates a pipeline.
    pub fn new(
        store: Arc<RecordStore>,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn ConflictResolver>,
        config: SyncConfig,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            transport,
            resolver,
            config,
            cancelled,
        }
    }

    /// Downloads every configured type once.
    ///
    /// A per-record failure stops that type's pass and is reported; the
    /// other types still run. A transport error or cancellation ends the
    /// cycle.
    pub async fn run(&self) -> SyncResult<DownloadReport> {
        let mut report = DownloadReport::default();
        for download in &self.config.download_types {
            let summary = self.run_type(download, &mut report).await?;
            report.types.push(summary);
        }
        info!(
            types = report.types.len(),
            escalated = report.escalated.len(),
            failures = report.failures.len(),
            "download cycle finished"
        );
        Ok(report)
    }

    async fn run_type(
        &self,
        download: &DownloadTypeConfig,
        report: &mut DownloadReport,
    ) -> SyncResult<TypeDownload> {
        let resource_type = download.resource_type.as_str();
        let mut state = load_state(&self.store, resource_type)?.begin();
        let first = match state.cursor() {
            Some(cursor) => cursor.clone(),
            None => DownloadCursor::default(),
        };
        debug!(
            resource_type,
            resume = first.next_page_token.is_some(),
            since = ?first.query_watermark,
            "download pass started"
        );

        let (page_tx, mut page_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let fetcher = tokio::spawn(fetch_pages(
            Arc::clone(&self.transport),
            Arc::clone(&self.cancelled),
            first,
            download.clone(),
            self.config.page_size,
            page_tx,
        ));

        let mut summary = TypeDownload {
            resource_type: resource_type.to_string(),
            ..TypeDownload::default()
        };
        let outcome = loop {
            let Some(fetched) = page_rx.recv().await else {
                break Ok(());
            };
            let page = match fetched {
                Fetched::Page(page) => page,
                Fetched::Failed(e) => break Err(e),
            };
            if self.cancelled.load(Ordering::SeqCst) {
                break Err(SyncError::Cancelled);
            }

            summary.pages += 1;
            let complete = self.apply_page(&page, &mut summary, report)?;
            if !complete {
                debug!(resource_type, "page not fully applied; cursor kept");
                break Ok(());
            }

            state = state.advance(&page)?;
            if let Some(cursor) = state.cursor() {
                let key = cursor_key(resource_type);
                self.store.transaction(&[], |txn| txn.put_meta(key, cursor))?;
            }
            if let DownloadState::Done(cursor) = &state {
                summary.completed = true;
                info!(
                    resource_type,
                    watermark = ?cursor.committed_watermark,
                    "download watermark advanced"
                );
                break Ok(());
            }
        };

        fetcher.abort();
        outcome?;
        Ok(summary)
    }

    /// Applies one page. Returns true if the cursor may move past it.
    fn apply_page(
        &self,
        page: &DownloadPage,
        summary: &mut TypeDownload,
        report: &mut DownloadReport,
    ) -> SyncResult<bool> {
        let mut complete = true;
        for remote in &page.records {
            match self.apply_remote(remote) {
                Ok(applied) => {
                    match applied {
                        Applied::Inserted => summary.inserted += 1,
                        Applied::Overwritten => summary.overwritten += 1,
                        Applied::Removed => summary.removed += 1,
                        Applied::Resolved => summary.resolved += 1,
                        Applied::LocalWins => summary.kept_local += 1,
                        Applied::KeptLocal => {
                            summary.kept_local += 1;
                            complete = false;
                        }
                        Applied::Escalated => {
                            summary.kept_local += 1;
                            if let Some(uuid) = self.local_uuid(remote) {
                                report.escalated.push(uuid);
                            }
                        }
                        Applied::Skipped => {}
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(reference = %remote.reference(), error = %e, "remote record not applied");
                    report.failures.push(RecordFailure {
                        record_uuid: self.local_uuid(remote),
                        reference: remote.reference(),
                        error: e,
                    });
                    complete = false;
                }
            }
        }
        Ok(complete)
    }

    fn local_uuid(&self, remote: &RemoteRecord) -> Option<RecordUuid> {
        self.store
            .find_uuid(&RecordKey::new(&remote.resource_type, &remote.resource_id))
    }

    fn apply_remote(&self, remote: &RemoteRecord) -> SyncResult<Applied> {
        let Some(record_uuid) = self.local_uuid(remote) else {
            return self.insert_remote(remote);
        };

        let schema = Arc::clone(self.store.schema());
        let schema = schema.as_ref();
        let applied = self.store.transaction(&[record_uuid], |txn| {
            let row = txn
                .record(record_uuid)
                .ok_or_else(|| CoreError::not_found(&remote.resource_type, &remote.resource_id))?;
            let pending = txn.changes(record_uuid);

            if pending.is_empty() {
                if remote.deleted {
                    txn.remove_record(record_uuid)?;
                    return Ok(Applied::Removed);
                }
                overwrite(txn, schema, row, remote)?;
                return Ok(Applied::Overwritten);
            }

            let local = squash(&pending)?;
            if remote.deleted {
                return Ok(match local.map(|squashed| squashed.operation) {
                    Some(SquashedOperation::Delete | SquashedOperation::Discard) => {
                        txn.remove_record(record_uuid)?;
                        txn.remove_meta(keep_local_key(record_uuid));
                        Applied::Removed
                    }
                    Some(SquashedOperation::Update(_)) => {
                        recreate_locally_edited(txn, row, remote)?;
                        Applied::LocalWins
                    }
                    Some(SquashedOperation::Insert(_)) | None => Applied::LocalWins,
                });
            }

            match self.resolver.resolve(&row, remote) {
                Resolution::KeepRemote => {
                    overwrite(txn, schema, row, remote)?;
                    txn.clear_changes(record_uuid)?;
                    txn.remove_meta(keep_local_key(record_uuid));
                    Ok(Applied::Resolved)
                }
                Resolution::KeepLocal => self.keep_local(txn, row, remote),
                Resolution::Resolved(merged) => {
                    let operation = local.map(|squashed| squashed.operation);
                    rebase_onto_remote(txn, schema, row, remote, merged, operation)?;
                    txn.remove_meta(keep_local_key(record_uuid));
                    Ok(Applied::Resolved)
                }
            }
        })?;

        debug!(reference = %remote.reference(), outcome = ?applied, "remote record applied");
        Ok(applied)
    }

    fn insert_remote(&self, remote: &RemoteRecord) -> SyncResult<Applied> {
        if remote.deleted {
            return Ok(Applied::Skipped);
        }
        let record_uuid = RecordUuid::new();
        let row = RecordRow {
            record_uuid,
            record_type: remote.resource_type.clone(),
            external_id: remote.resource_id.clone(),
            payload: Value::Null,
            version_tag: None,
            last_updated_remote: None,
            last_updated_local: None,
            tombstone: false,
        };
        let schema = Arc::clone(self.store.schema());
        self.store
            .transaction(&[record_uuid], |txn| overwrite(txn, schema.as_ref(), row, remote))?;
        Ok(Applied::Inserted)
    }

    fn keep_local(
        &self,
        txn: &mut StoreTransaction<'_>,
        row: RecordRow,
        remote: &RemoteRecord,
    ) -> Result<Applied, CoreError> {
        let key = keep_local_key(row.record_uuid);
        let count = txn.meta::<u32>(&key)?.unwrap_or(0) + 1;
        if count < self.config.max_keep_local_cycles {
            txn.put_meta(key, &count)?;
            return Ok(Applied::KeptLocal);
        }

        txn.remove_meta(key);
        match self.config.escalation {
            EscalationPolicy::Report => {
                warn!(reference = %remote.reference(), cycles = count, "local copy kept too long");
                Ok(Applied::Escalated)
            }
            EscalationPolicy::AcceptRemote => {
                warn!(reference = %remote.reference(), cycles = count, "accepting remote copy after repeated conflicts");
                let record_uuid = row.record_uuid;
                overwrite(txn, self.store.schema().as_ref(), row, remote)?;
                txn.clear_changes(record_uuid)?;
                Ok(Applied::Resolved)
            }
        }
    }
}

impl std::fmt::Debug for DownloadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn fetch_pages(
    transport: Arc<dyn Transport>,
    cancelled: Arc<AtomicBool>,
    mut cursor: DownloadCursor,
    download: DownloadTypeConfig,
    page_size: Option<usize>,
    pages: mpsc::Sender<Fetched>,
) {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            let _ = pages.send(Fetched::Failed(SyncError::Cancelled)).await;
            return;
        }
        let request = cursor.request(&download.resource_type, &download.params, page_size);
        let page = match transport.fetch(&request).await {
            Ok(page) => page,
            Err(e) => {
                warn!(resource_type = %download.resource_type, error = %e, "page fetch failed");
                let _ = pages.send(Fetched::Failed(e)).await;
                return;
            }
        };
        let next = page.next_page_token.clone();
        if pages.send(Fetched::Page(page)).await.is_err() {
            return;
        }
        match next {
            Some(token) => cursor.next_page_token = Some(token),
            None => return,
        }
    }
}

fn remote_snapshot(schema: &dyn RecordSchema, remote: &RemoteRecord) -> Result<Value, CoreError> {
    let mut payload = match &remote.payload {
        Some(payload) if payload.is_object() => payload.clone(),
        _ => {
            return Err(CoreError::invalid_operation(format!(
                "{} arrived without an object payload",
                remote.reference()
            )))
        }
    };
    write_id(schema, &remote.resource_type, &mut payload, &remote.resource_id)?;
    Ok(payload)
}

/// Replaces the local copy with the remote one.
fn overwrite(
    txn: &mut StoreTransaction<'_>,
    schema: &dyn RecordSchema,
    mut row: RecordRow,
    remote: &RemoteRecord,
) -> Result<(), CoreError> {
    row.payload = remote_snapshot(schema, remote)?;
    row.version_tag = remote.version_tag.clone();
    row.last_updated_remote = Some(remote.last_updated);
    row.tombstone = false;
    txn.put_record(row)
}

/// Turns a pending UPDATE of a record the server deleted into an INSERT
/// of the local snapshot, so the next upload recreates it instead of
/// patching a resource that is gone.
fn recreate_locally_edited(
    txn: &mut StoreTransaction<'_>,
    mut row: RecordRow,
    remote: &RemoteRecord,
) -> Result<(), CoreError> {
    let snapshot = row.payload.clone();
    txn.rebase(row.record_uuid, ChangeKind::Insert { snapshot }, None)?;
    row.version_tag = None;
    row.last_updated_remote = Some(remote.last_updated);
    txn.put_record(row)
}

/// Stores a merged snapshot and rewrites the pending change so the next
/// upload sends the merge on top of the remote version.
fn rebase_onto_remote(
    txn: &mut StoreTransaction<'_>,
    schema: &dyn RecordSchema,
    mut row: RecordRow,
    remote: &RemoteRecord,
    mut merged: Value,
    local: Option<SquashedOperation>,
) -> Result<(), CoreError> {
    let record_uuid = row.record_uuid;
    let base = remote_snapshot(schema, remote)?;
    write_id(schema, &row.record_type, &mut merged, &row.external_id)?;
    let tag = remote.version_tag.clone();

    match local {
        Some(SquashedOperation::Insert(_)) => {
            let snapshot = merged.clone();
            txn.rebase(record_uuid, ChangeKind::Insert { snapshot }, tag.clone())?;
        }
        Some(SquashedOperation::Update(_)) | None => {
            let patch = diff(&base, &merged);
            if patch.is_empty() {
                txn.clear_changes(record_uuid)?;
            } else {
                txn.rebase(record_uuid, ChangeKind::Update { patch }, tag.clone())?;
            }
        }
        Some(SquashedOperation::Delete | SquashedOperation::Discard) => {
            txn.rebase(record_uuid, ChangeKind::Delete, tag.clone())?;
        }
    }

    row.payload = merged;
    row.version_tag = tag;
    row.last_updated_remote = Some(remote.last_updated);
    txn.put_record(row)
}
