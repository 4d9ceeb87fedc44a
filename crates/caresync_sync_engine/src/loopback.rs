//! CBOR message transport.
//!
//! [`CborTransport`] encodes every request as a [`SyncMessage`] and hands
//! the bytes to a [`MessageClient`]. The client can be a real network
//! client or a [`LoopbackClient`] routing straight into an in-process
//! server.

use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;
use async_trait::async_trait;
use caresync_sync_protocol::{
    DownloadPage, DownloadRequest, SyncMessage, UploadRequest, UploadResponse,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Byte-level client abstraction.
pub trait MessageClient: Send + Sync {
    /// Sends an encoded message and returns the encoded reply.
    fn exchange(&self, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// Transport that speaks CBOR-encoded [`SyncMessage`]s.
pub struct CborTransport<C: MessageClient> {
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: MessageClient> CborTransport<C> {
    /// Creates a new transport over `client`.
    pub fn new(client: C) -> Self {
        Self {
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true if requests can be sent.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Stops sending requests.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn roundtrip(&self, message: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::transport_retryable("not connected"));
        }

        let body = message
            .encode()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let reply = self.client.exchange(body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        SyncMessage::decode(&reply)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

#[async_trait]
impl<C: MessageClient> Transport for CborTransport<C> {
    async fn send(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        match self.roundtrip(SyncMessage::UploadRequest(request.clone()))? {
            SyncMessage::UploadResponse(response) => Ok(response),
            other => Err(SyncError::Protocol(format!(
                "expected upload response, got message type {}",
                other.type_code()
            ))),
        }
    }

    async fn fetch(&self, request: &DownloadRequest) -> SyncResult<DownloadPage> {
        match self.roundtrip(SyncMessage::DownloadRequest(request.clone()))? {
            SyncMessage::DownloadPage(page) => Ok(page),
            other => Err(SyncError::Protocol(format!(
                "expected download page, got message type {}",
                other.type_code()
            ))),
        }
    }
}

/// Trait for servers that can answer encoded messages in process.
pub trait LoopbackServer {
    /// Handles an encoded message and returns the encoded reply.
    fn handle_bytes(&self, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A client that routes messages directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the network.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer + Send + Sync> MessageClient for LoopbackClient<S> {
    fn exchange(&self, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if !self.is_healthy() {
            return Err("network unreachable".into());
        }
        self.server.handle_bytes(&body)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
