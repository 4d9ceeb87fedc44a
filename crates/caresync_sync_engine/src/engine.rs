//! The engine façade.

use crate::config::SyncConfig;
use crate::download::{load_state, AcceptRemoteResolver, ConflictResolver, DownloadPipeline, DownloadState};
use crate::error::SyncResult;
use crate::state::{ActivityGuard, DownloadReport, Pipeline, SyncStats, UploadReport};
use crate::transport::Transport;
use crate::upload::UploadPipeline;
use caresync_core::{RecordRow, RecordStore};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Reports of one full sync.
#[derive(Debug, Default)]
pub struct SyncCycleReport {
    /// The download half, run first.
    pub download: DownloadReport,
    /// The upload half.
    pub upload: UploadReport,
}

/// Local-first record access with upload and download against a server.
///
/// Writes go straight to the local store and are picked up by the next
/// upload. Upload and download may run at the same time; each of them
/// runs at most once at a time.
pub struct Engine {
    store: Arc<RecordStore>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn ConflictResolver>,
    config: SyncConfig,
    upload_cancelled: Arc<AtomicBool>,
    download_cancelled: Arc<AtomicBool>,
    uploading: AtomicBool,
    downloading: AtomicBool,
    stats: RwLock<SyncStats>,
}

impl Engine {
    /// Creates an engine. Conflicts are resolved in favour of the server
    /// until [`Engine::with_resolver`] says otherwise.
    pub fn new(store: Arc<RecordStore>, transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        Self {
            store,
            transport,
            resolver: Arc::new(AcceptRemoteResolver),
            config,
            upload_cancelled: Arc::new(AtomicBool::new(false)),
            download_cancelled: Arc::new(AtomicBool::new(false)),
            uploading: AtomicBool::new(false),
            downloading: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Sets the conflict resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns a snapshot of the running statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    // ---- records ----

    /// Creates a record.
    pub fn create(&self, record_type: &str, payload: Value) -> SyncResult<RecordRow> {
        Ok(self.store.create(record_type, payload)?)
    }

    /// Replaces a record's payload.
    pub fn update(&self, record_type: &str, external_id: &str, payload: Value) -> SyncResult<RecordRow> {
        Ok(self.store.update(record_type, external_id, payload)?)
    }

    /// Deletes a record.
    pub fn delete(&self, record_type: &str, external_id: &str) -> SyncResult<()> {
        Ok(self.store.delete(record_type, external_id)?)
    }

    /// Reads a live record.
    pub fn get(&self, record_type: &str, external_id: &str) -> Option<RecordRow> {
        self.store.get(record_type, external_id)
    }

    /// Lists the live records of a type.
    pub fn list(&self, record_type: &str) -> Vec<RecordRow> {
        self.store.list(record_type)
    }

    // ---- sync ----

    /// Asks running cycles to stop at their next page or request.
    ///
    /// Each pipeline clears only its own flag when it starts, so a cycle
    /// starting on one side never revives a cancelled cycle on the other.
    pub fn cancel(&self) {
        self.upload_cancelled.store(true, Ordering::SeqCst);
        self.download_cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns the download state of a type.
    pub fn download_state(&self, resource_type: &str) -> SyncResult<DownloadState> {
        load_state(&self.store, resource_type)
    }

    /// Uploads pending changes once.
    pub async fn sync_upload(&self) -> SyncResult<UploadReport> {
        let _running = ActivityGuard::start(&self.uploading, Pipeline::Upload)?;
        self.upload_cancelled.store(false, Ordering::SeqCst);

        let pipeline = UploadPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.config.clone(),
            Arc::clone(&self.upload_cancelled),
        );
        match pipeline.run().await {
            Ok(report) => {
                self.stats.write().record_upload(&report);
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "upload failed");
                self.stats.write().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Downloads every configured type once.
    pub async fn sync_download(&self) -> SyncResult<DownloadReport> {
        let _running = ActivityGuard::start(&self.downloading, Pipeline::Download)?;
        self.download_cancelled.store(false, Ordering::SeqCst);

        let pipeline = DownloadPipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            Arc::clone(&self.resolver),
            self.config.clone(),
            Arc::clone(&self.download_cancelled),
        );
        match pipeline.run().await {
            Ok(report) => {
                self.stats.write().record_download(&report);
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "download failed");
                self.stats.write().last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Downloads, then uploads.
    ///
    /// Downloading first lets conflicts resolve locally before the merged
    /// result is uploaded.
    pub async fn sync(&self) -> SyncResult<SyncCycleReport> {
        let download = self.sync_download().await?;
        let upload = self.sync_upload().await?;
        info!(
            downloaded = download.types.len(),
            uploaded = upload.uploaded,
            "sync finished"
        );
        Ok(SyncCycleReport { download, upload })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("uploading", &self.uploading.load(Ordering::SeqCst))
            .field("downloading", &self.downloading.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
