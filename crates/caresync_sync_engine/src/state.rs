//! Pipeline activity, cycle reports and running statistics.

use crate::error::{SyncError, SyncResult};
use caresync_core::RecordUuid;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

/// Which pipeline an activity guard belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// The upload pipeline.
    Upload,
    /// The download pipeline.
    Download,
}

impl Pipeline {
    fn name(self) -> &'static str {
        match self {
            Self::Upload => "uploading",
            Self::Download => "downloading",
        }
    }
}

/// Marks a pipeline as running for as long as the guard lives.
///
/// Upload and download may run at the same time; the same pipeline may
/// not run twice at once.
#[derive(Debug)]
pub(crate) struct ActivityGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ActivityGuard<'a> {
    pub(crate) fn start(flag: &'a AtomicBool, pipeline: Pipeline) -> SyncResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::InvalidStateTransition {
                from: pipeline.name().into(),
                to: pipeline.name().into(),
            });
        }
        Ok(Self { flag })
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A record that could not be synced this cycle.
#[derive(Debug)]
pub struct RecordFailure {
    /// Local uuid of the record.
    pub record_uuid: Option<RecordUuid>,
    /// `"<type>/<id>"` of the record.
    pub reference: String,
    /// What went wrong.
    pub error: SyncError,
}

/// A record renumbered after the server assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renumbering {
    /// Local uuid of the record.
    pub record_uuid: RecordUuid,
    /// Reference before renumbering.
    pub old_reference: String,
    /// Reference after renumbering.
    pub new_reference: String,
    /// Number of other records whose references were rewritten.
    pub referrers_rewritten: usize,
}

/// Result of one upload cycle.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Requests sent to the server.
    pub requests_sent: usize,
    /// Records acknowledged and consolidated.
    pub uploaded: usize,
    /// Records created and deleted locally, dropped without a request.
    pub discarded: usize,
    /// Records the server renumbered.
    pub renumbered: Vec<Renumbering>,
    /// Records left pending, with the reason.
    pub failures: Vec<RecordFailure>,
}

impl UploadReport {
    /// Returns true if every pending record was uploaded or discarded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-type result of a download cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeDownload {
    /// Resource type.
    pub resource_type: String,
    /// Pages fully applied.
    pub pages: usize,
    /// Remote records inserted locally.
    pub inserted: usize,
    /// Local records overwritten by remote snapshots.
    pub overwritten: usize,
    /// Local records removed because the server deleted them.
    pub removed: usize,
    /// Conflicts resolved by a merge or by taking the remote snapshot.
    pub resolved: usize,
    /// Conflicts where the local change was kept.
    pub kept_local: usize,
    /// True once the type's pass reached the last page.
    pub completed: bool,
}

/// Result of one download cycle.
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// Per-type results, in configuration order.
    pub types: Vec<TypeDownload>,
    /// Records kept local past the escalation threshold.
    pub escalated: Vec<RecordUuid>,
    /// Records that could not be applied; their page will be refetched.
    pub failures: Vec<RecordFailure>,
}

impl DownloadReport {
    /// Returns the result for a type.
    pub fn for_type(&self, resource_type: &str) -> Option<&TypeDownload> {
        self.types
            .iter()
            .find(|summary| summary.resource_type == resource_type)
    }

    /// Returns true if every configured type completed without failures.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.types.iter().all(|summary| summary.completed)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed upload cycles.
    pub upload_cycles: u64,
    /// Completed download cycles.
    pub download_cycles: u64,
    /// Records uploaded.
    pub records_uploaded: u64,
    /// Remote records applied locally.
    pub records_downloaded: u64,
    /// Conflicts seen on download.
    pub conflicts_encountered: u64,
    /// Per-record failures across all cycles.
    pub record_failures: u64,
    /// End of the last successful upload cycle.
    pub last_upload: Option<DateTime<Utc>>,
    /// End of the last successful download cycle.
    pub last_download: Option<DateTime<Utc>>,
    /// Last cycle-level error message.
    pub last_error: Option<String>,
}

impl SyncStats {
    pub(crate) fn record_upload(&mut self, report: &UploadReport) {
        self.upload_cycles += 1;
        self.records_uploaded += report.uploaded as u64;
        self.record_failures += report.failures.len() as u64;
        self.last_upload = Some(Utc::now());
        self.last_error = None;
    }

    pub(crate) fn record_download(&mut self, report: &DownloadReport) {
        self.download_cycles += 1;
        for summary in &report.types {
            self.records_downloaded +=
                (summary.inserted + summary.overwritten + summary.removed + summary.resolved) as u64;
            self.conflicts_encountered += (summary.resolved + summary.kept_local) as u64;
        }
        self.record_failures += report.failures.len() as u64;
        self.last_download = Some(Utc::now());
        self.last_error = None;
    }
}
