//! Per-type download progress.

use crate::error::{SyncError, SyncResult};
use caresync_sync_protocol::{DownloadPage, DownloadRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key prefix under which cursors are stored.
pub const CURSOR_PREFIX: &str = "cursor/";

/// Returns the metadata key of a type's cursor.
pub fn cursor_key(resource_type: &str) -> String {
    format!("{CURSOR_PREFIX}{resource_type}")
}

/// Where a type's download stands.
///
/// The cursor is persisted after every applied page, so a pass that is
/// interrupted resumes at the page it stopped on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadCursor {
    /// `updated_after` of the pass in progress.
    pub query_watermark: Option<DateTime<Utc>>,
    /// Page to fetch next in the pass in progress.
    pub next_page_token: Option<String>,
    /// Newest server timestamp covered by a completed pass.
    pub committed_watermark: Option<DateTime<Utc>>,
    /// Newest server timestamp seen on applied pages of the pass in
    /// progress.
    pub pending_watermark: Option<DateTime<Utc>>,
}

impl DownloadCursor {
    /// Builds the request for the next page.
    pub fn request(
        &self,
        resource_type: &str,
        params: &BTreeMap<String, String>,
        page_size: Option<usize>,
    ) -> DownloadRequest {
        DownloadRequest::new(resource_type, self.query_watermark)
            .with_page_token(self.next_page_token.clone())
            .with_page_size(page_size)
            .with_params(params.clone())
    }
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Download state of one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    /// Never downloaded.
    NotStarted,
    /// A pass is in progress.
    Fetching(DownloadCursor),
    /// The last pass completed.
    Done(DownloadCursor),
}

impl DownloadState {
    /// Rebuilds the state from a persisted cursor.
    pub fn from_cursor(cursor: Option<DownloadCursor>) -> Self {
        match cursor {
            None => Self::NotStarted,
            Some(cursor) if cursor.next_page_token.is_some() => Self::Fetching(cursor),
            Some(cursor) => Self::Done(cursor),
        }
    }

    /// Returns the cursor, if any.
    pub fn cursor(&self) -> Option<&DownloadCursor> {
        match self {
            Self::NotStarted => None,
            Self::Fetching(cursor) | Self::Done(cursor) => Some(cursor),
        }
    }

    /// Returns the state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Fetching(_) => "fetching",
            Self::Done(_) => "done",
        }
    }

    /// Starts or resumes a pass.
    ///
    /// A completed type starts a new pass from its committed watermark;
    /// an interrupted one resumes at its stored page.
    pub fn begin(self) -> Self {
        match self {
            Self::NotStarted => Self::Fetching(DownloadCursor::default()),
            Self::Fetching(cursor) => Self::Fetching(cursor),
            Self::Done(cursor) => Self::Fetching(DownloadCursor {
                query_watermark: cursor.committed_watermark,
                next_page_token: None,
                committed_watermark: cursor.committed_watermark,
                pending_watermark: None,
            }),
        }
    }

    /// Moves past a fully applied page.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidStateTransition`] unless a pass is in progress.
    pub fn advance(self, page: &DownloadPage) -> SyncResult<Self> {
        let from = self.name();
        let Self::Fetching(mut cursor) = self else {
            return Err(SyncError::InvalidStateTransition {
                from: from.into(),
                to: "fetching".into(),
            });
        };
        cursor.pending_watermark = later(cursor.pending_watermark, page.max_last_updated());
        match &page.next_page_token {
            Some(token) => {
                cursor.next_page_token = Some(token.clone());
                Ok(Self::Fetching(cursor))
            }
            None => {
                cursor.committed_watermark = later(cursor.committed_watermark, cursor.pending_watermark);
                cursor.query_watermark = cursor.committed_watermark;
                cursor.next_page_token = None;
                cursor.pending_watermark = None;
                Ok(Self::Done(cursor))
            }
        }
    }
}
