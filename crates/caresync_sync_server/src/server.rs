//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use caresync_sync_protocol::{
    DownloadPage, DownloadRequest, RemoteRecord, SyncMessage, UploadRequest, UploadResponse,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// The reference sync server.
///
/// Holds records in memory and answers upload and download requests the
/// way a resource server would: PUT creates or replaces, POST assigns an
/// id, PATCH applies a JSON patch, DELETE leaves a tombstone that later
/// downloads report.
///
/// # Example
///
/// ```
/// use caresync_sync_server::{ServerConfig, SyncServer};
/// use serde_json::json;
///
/// let server = SyncServer::new(ServerConfig::default());
/// server.put_remote("Patient", "p1", json!({"name": "Ann"}));
/// assert_eq!(server.get("Patient", "p1").unwrap().version_tag.as_deref(), Some("1"));
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles an upload request.
    pub fn handle_upload(&self, request: UploadRequest) -> ServerResult<UploadResponse> {
        self.handler.handle_upload(request)
    }

    /// Handles a download request.
    pub fn handle_download(&self, request: DownloadRequest) -> ServerResult<DownloadPage> {
        self.handler.handle_download(request)
    }

    /// Handles a sync message (dispatches to the matching handler).
    pub fn handle_message(&self, message: SyncMessage) -> ServerResult<SyncMessage> {
        match message {
            SyncMessage::UploadRequest(req) => {
                self.handle_upload(req).map(SyncMessage::UploadResponse)
            }
            SyncMessage::DownloadRequest(req) => {
                self.handle_download(req).map(SyncMessage::DownloadPage)
            }
            other => Err(ServerError::UnexpectedMessage(other.type_code())),
        }
    }

    /// Decodes a CBOR message, handles it and encodes the reply.
    pub fn handle_bytes(&self, body: &[u8]) -> Result<Vec<u8>, String> {
        let reply = SyncMessage::decode(body)
            .map_err(ServerError::from)
            .and_then(|message| self.handle_message(message))
            .and_then(|reply| reply.encode().map_err(ServerError::from));
        reply.map_err(|e| {
            warn!(error = %e, "request failed");
            e.to_string()
        })
    }

    /// Writes a record directly, as another client would. Returns the new
    /// version tag.
    pub fn put_remote(&self, resource_type: &str, resource_id: &str, mut payload: Value) -> String {
        if let Some(object) = payload.as_object_mut() {
            object.insert(
                self.context.config.id_field.clone(),
                Value::String(resource_id.to_string()),
            );
        }
        let (stored, _) = self
            .context
            .records
            .write()
            .write(resource_type, resource_id, payload);
        stored.version_tag()
    }

    /// Deletes a record directly. Returns false if it was not live.
    pub fn delete_remote(&self, resource_type: &str, resource_id: &str) -> bool {
        self.context.records.write().delete(resource_type, resource_id)
    }

    /// Returns a record, tombstones included.
    pub fn get(&self, resource_type: &str, resource_id: &str) -> Option<RemoteRecord> {
        let records = self.context.records.read();
        let stored = records.get(resource_type, resource_id)?;
        Some(RemoteRecord {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            payload: stored.payload.clone(),
            version_tag: Some(stored.version_tag()),
            last_updated: stored.last_updated,
            deleted: stored.is_deleted(),
        })
    }

    /// Returns the number of records per type, tombstones included.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.context.records.read().counts()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("config", &self.context.config)
            .field("records", &self.context.records.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caresync_sync_protocol::{EntryOutcome, UploadBody, UploadEntry, Verb};
    use serde_json::json;

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::new(ServerConfig::default());
        assert!(server.counts().is_empty());
        assert!(server.get("Patient", "p1").is_none());
    }

    #[test]
    fn message_dispatch() {
        let server = SyncServer::new(ServerConfig::default());
        let message = SyncMessage::DownloadRequest(DownloadRequest::new("Patient", None));
        let response = server.handle_message(message).unwrap();
        assert!(matches!(response, SyncMessage::DownloadPage(_)));

        let wrong = SyncMessage::UploadResponse(UploadResponse::default());
        assert!(matches!(
            server.handle_message(wrong),
            Err(ServerError::UnexpectedMessage(2))
        ));
    }

    #[test]
    fn bytes_roundtrip() {
        let server = SyncServer::new(ServerConfig::default());
        let request = SyncMessage::UploadRequest(UploadRequest::Single(UploadEntry {
            verb: Verb::Put,
            resource_type: "Patient".into(),
            resource_id: "p1".into(),
            body: Some(UploadBody::Resource(json!({"name": "Ann"}))),
            if_match: None,
        }));
        let reply = server.handle_bytes(&request.encode().unwrap()).unwrap();
        let SyncMessage::UploadResponse(response) = SyncMessage::decode(&reply).unwrap() else {
            panic!("expected an upload response");
        };
        assert!(matches!(response.outcomes[0], EntryOutcome::Created { .. }));
        assert!(server.handle_bytes(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn direct_writes_are_visible_to_downloads() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.put_remote("Patient", "p1", json!({"name": "Ann"})), "1");
        assert_eq!(server.put_remote("Patient", "p1", json!({"name": "Anna"})), "2");
        assert!(server.delete_remote("Patient", "p1"));

        let page = server
            .handle_download(DownloadRequest::new("Patient", None))
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.records[0].deleted);
        assert_eq!(page.records[0].version_tag.as_deref(), Some("3"));
    }
}
