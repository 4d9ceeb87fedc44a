//! Configuration for the sync engine.

use caresync_codec::ReferenceRewriteMode;
use std::collections::BTreeMap;

/// How squashed changes are grouped into requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStrategy {
    /// Many entries per request.
    #[default]
    Bundled,
    /// One request per record, consolidated before the next is built.
    PerRecord,
}

/// How locally created records are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// `PUT` with the client-generated id; the server keeps it.
    #[default]
    ClientId,
    /// `POST`; the server assigns a new id and the record is renumbered.
    ServerAssigned,
}

/// What happens once a record has been kept local too many times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscalationPolicy {
    /// Keep the local change and list the record in the download report.
    #[default]
    Report,
    /// Give up the local change and take the remote snapshot.
    AcceptRemote,
}

/// A record type to download, with optional filter parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTypeConfig {
    /// Resource type.
    pub resource_type: String,
    /// Filter parameters sent with every page request.
    pub params: BTreeMap<String, String>,
}

impl DownloadTypeConfig {
    /// Creates an unfiltered download for a type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a filter parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upload request grouping.
    pub upload_strategy: UploadStrategy,
    /// Verb used for locally created records.
    pub create_mode: CreateMode,
    /// Maximum entries per bundled request (`None` = all in one).
    pub upload_batch_size: Option<usize>,
    /// Order uploads so referenced records go before their referrers.
    pub order_by_references: bool,
    /// Record types to download, in order.
    pub download_types: Vec<DownloadTypeConfig>,
    /// Preferred download page size.
    pub page_size: Option<usize>,
    /// Consecutive keep-local outcomes before escalation.
    pub max_keep_local_cycles: u32,
    /// Escalation behavior.
    pub escalation: EscalationPolicy,
    /// Which strings are rewritten when a record is renumbered.
    pub rewrite_mode: ReferenceRewriteMode,
    /// Capacity of the channels between pipeline stages.
    pub channel_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            upload_strategy: UploadStrategy::Bundled,
            create_mode: CreateMode::ClientId,
            upload_batch_size: None,
            order_by_references: true,
            download_types: Vec::new(),
            page_size: None,
            max_keep_local_cycles: 3,
            escalation: EscalationPolicy::Report,
            rewrite_mode: ReferenceRewriteMode::IndexedFields,
            channel_capacity: 16,
        }
    }

    /// Sets the upload strategy.
    pub fn with_upload_strategy(mut self, strategy: UploadStrategy) -> Self {
        self.upload_strategy = strategy;
        self
    }

    /// Sets the create mode.
    pub fn with_create_mode(mut self, mode: CreateMode) -> Self {
        self.create_mode = mode;
        self
    }

    /// Sets the bundled batch size.
    pub fn with_upload_batch_size(mut self, size: usize) -> Self {
        self.upload_batch_size = Some(size.max(1));
        self
    }

    /// Enables or disables reference ordering of uploads.
    pub fn with_reference_ordering(mut self, enabled: bool) -> Self {
        self.order_by_references = enabled;
        self
    }

    /// Adds a record type to download.
    pub fn with_download_type(mut self, download: DownloadTypeConfig) -> Self {
        self.download_types.push(download);
        self
    }

    /// Sets the download page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Sets the keep-local limit.
    pub fn with_max_keep_local_cycles(mut self, cycles: u32) -> Self {
        self.max_keep_local_cycles = cycles;
        self
    }

    /// Sets the escalation policy.
    pub fn with_escalation(mut self, policy: EscalationPolicy) -> Self {
        self.escalation = policy;
        self
    }

    /// Sets the reference rewrite mode.
    pub fn with_rewrite_mode(mut self, mode: ReferenceRewriteMode) -> Self {
        self.rewrite_mode = mode;
        self
    }

    /// Sets the channel capacity between pipeline stages.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
