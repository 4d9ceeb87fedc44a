//! Protocol messages and their CBOR encoding.

use crate::download::{DownloadPage, DownloadRequest};
use crate::error::{ProtocolError, ProtocolResult};
use crate::upload::{UploadRequest, UploadResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Upload request.
    UploadRequest(UploadRequest),
    /// Upload response.
    UploadResponse(UploadResponse),
    /// Download request.
    DownloadRequest(DownloadRequest),
    /// Download page.
    DownloadPage(DownloadPage),
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::UploadRequest(_) => 1,
            SyncMessage::UploadResponse(_) => 2,
            SyncMessage::DownloadRequest(_) => 3,
            SyncMessage::DownloadPage(_) => 4,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Encodes any protocol value to CBOR.
pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes any protocol value from CBOR.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::RemoteRecord;
    use crate::upload::{EntryOutcome, UploadBody, UploadEntry, Verb};
    use caresync_codec::diff;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn instant(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn bundled_upload_roundtrip() {
        let patch = diff(&json!({"name": "Ann"}), &json!({"name": "Annie"}));
        let request = UploadRequest::Bundled(vec![
            UploadEntry {
                verb: Verb::Put,
                resource_type: "Patient".into(),
                resource_id: "p1".into(),
                body: Some(UploadBody::Resource(json!({"id": "p1", "age": 40}))),
                if_match: None,
            },
            UploadEntry {
                verb: Verb::Patch,
                resource_type: "Patient".into(),
                resource_id: "p2".into(),
                body: Some(UploadBody::Patch(patch)),
                if_match: Some("W/\"3\"".into()),
            },
        ]);

        let message = SyncMessage::UploadRequest(request);
        let decoded = SyncMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn upload_response_roundtrip() {
        let response = UploadResponse::new(vec![
            EntryOutcome::Created {
                resource_type: "Patient".into(),
                resource_id: "42".into(),
                version_tag: Some("1".into()),
                last_updated: instant(100),
            },
            EntryOutcome::Conflict {
                message: "version mismatch".into(),
            },
        ]);
        let decoded: UploadResponse = decode(&encode(&response).unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn download_page_roundtrip() {
        let page = DownloadPage {
            records: vec![
                RemoteRecord {
                    resource_type: "Patient".into(),
                    resource_id: "1".into(),
                    payload: Some(json!({"id": "1", "tags": [1, 2.5, null, true]})),
                    version_tag: Some("4".into()),
                    last_updated: instant(50),
                    deleted: false,
                },
                RemoteRecord {
                    resource_type: "Patient".into(),
                    resource_id: "2".into(),
                    payload: None,
                    version_tag: None,
                    last_updated: instant(60),
                    deleted: true,
                },
            ],
            next_page_token: Some("page-2".into()),
        };
        let message = SyncMessage::DownloadPage(page);
        assert_eq!(SyncMessage::decode(&message.encode().unwrap()).unwrap(), message);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            SyncMessage::decode(&[0xff, 0x00, 0x13]),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn sync_message_type_codes() {
        assert_eq!(
            SyncMessage::UploadRequest(UploadRequest::Bundled(vec![])).type_code(),
            1
        );
        assert_eq!(
            SyncMessage::UploadResponse(UploadResponse::default()).type_code(),
            2
        );
        assert_eq!(
            SyncMessage::DownloadRequest(DownloadRequest::new("Patient", None)).type_code(),
            3
        );
        assert_eq!(
            SyncMessage::DownloadPage(DownloadPage::default()).type_code(),
            4
        );
    }
}
