//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use caresync_sync_protocol::{DownloadPage, DownloadRequest, UploadRequest, UploadResponse};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport handles network communication with the server.
///
/// These are the only calls in the engine that suspend. Implementations
/// report network failures as [`SyncError::Transport`]; the engine leaves
/// every pending change in place so the call can be retried.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends an upload request.
    async fn send(&self, request: &UploadRequest) -> SyncResult<UploadResponse>;

    /// Fetches one page of remote records.
    async fn fetch(&self, request: &DownloadRequest) -> SyncResult<DownloadPage>;
}

/// A scripted transport for testing.
///
/// Upload responses and download pages are returned in the order they
/// were queued. A type with no queued pages returns an empty last page.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    upload_responses: Mutex<VecDeque<SyncResult<UploadResponse>>>,
    pages: Mutex<HashMap<String, VecDeque<SyncResult<DownloadPage>>>>,
    sent: Mutex<Vec<UploadRequest>>,
    fetched: Mutex<Vec<DownloadRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            upload_responses: Mutex::new(VecDeque::new()),
            pages: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// Queues the response to the next upload request.
    pub fn push_upload_response(&self, response: UploadResponse) {
        self.upload_responses.lock().push_back(Ok(response));
    }

    /// Queues a failure for the next upload request.
    pub fn push_upload_error(&self, error: SyncError) {
        self.upload_responses.lock().push_back(Err(error));
    }

    /// Queues a page for a type.
    pub fn push_page(&self, resource_type: &str, page: DownloadPage) {
        self.pages
            .lock()
            .entry(resource_type.to_string())
            .or_default()
            .push_back(Ok(page));
    }

    /// Queues a fetch failure for a type.
    pub fn push_fetch_error(&self, resource_type: &str, error: SyncError) {
        self.pages
            .lock()
            .entry(resource_type.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns the upload requests received so far.
    pub fn sent(&self) -> Vec<UploadRequest> {
        self.sent.lock().clone()
    }

    /// Returns the download requests received so far.
    pub fn fetched(&self) -> Vec<DownloadRequest> {
        self.fetched.lock().clone()
    }

    fn ensure_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("not connected"))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        self.ensure_connected()?;
        self.sent.lock().push(request.clone());
        self.upload_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no mock upload response set".into())))
    }

    async fn fetch(&self, request: &DownloadRequest) -> SyncResult<DownloadPage> {
        self.ensure_connected()?;
        self.fetched.lock().push(request.clone());
        self.pages
            .lock()
            .get_mut(&request.resource_type)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(DownloadPage::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caresync_sync_protocol::EntryOutcome;

    #[tokio::test]
    async fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let result = transport.send(&UploadRequest::Bundled(vec![])).await;
        assert!(matches!(result, Err(SyncError::Transport { retryable: true, .. })));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn mock_transport_replays_script() {
        let transport = MockTransport::new();
        transport.push_upload_response(UploadResponse::new(vec![EntryOutcome::Deleted]));

        let response = transport.send(&UploadRequest::Bundled(vec![])).await.unwrap();
        assert_eq!(response.outcomes, vec![EntryOutcome::Deleted]);
        assert!(transport.send(&UploadRequest::Bundled(vec![])).await.is_err());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn unscripted_type_has_an_empty_last_page() {
        let transport = MockTransport::new();
        let page = transport
            .fetch(&DownloadRequest::new("Patient", None))
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more());
    }
}
