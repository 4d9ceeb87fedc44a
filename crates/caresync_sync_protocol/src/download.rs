//! Download request and page types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A request for one page of changed records of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Resource type to fetch.
    pub resource_type: String,
    /// Only records modified strictly after this instant.
    #[serde(default)]
    pub updated_after: Option<DateTime<Utc>>,
    /// Continuation token from the previous page.
    #[serde(default)]
    pub page_token: Option<String>,
    /// Preferred page size.
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Extra filter parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl DownloadRequest {
    /// Creates a request for the first page after `updated_after`.
    pub fn new(resource_type: impl Into<String>, updated_after: Option<DateTime<Utc>>) -> Self {
        Self {
            resource_type: resource_type.into(),
            updated_after,
            page_token: None,
            page_size: None,
            params: BTreeMap::new(),
        }
    }

    /// Sets the continuation token.
    #[must_use]
    pub fn with_page_token(mut self, token: Option<String>) -> Self {
        self.page_token = token;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, size: Option<usize>) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the filter parameters.
    #[must_use]
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// A record as held by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Resource type.
    pub resource_type: String,
    /// Server id.
    pub resource_id: String,
    /// Current snapshot; absent for deleted records.
    #[serde(default)]
    pub payload: Option<Value>,
    /// Server version tag.
    #[serde(default)]
    pub version_tag: Option<String>,
    /// Server modification time.
    pub last_updated: DateTime<Utc>,
    /// True if the record was deleted on the server.
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteRecord {
    /// Returns `"<type>/<id>"`.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }
}

/// One page of download results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadPage {
    /// Records on this page.
    pub records: Vec<RemoteRecord>,
    /// Token for the next page, absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl DownloadPage {
    /// Returns true if more pages follow.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.next_page_token.is_some()
    }

    /// Returns the latest modification time on this page.
    #[must_use]
    pub fn max_last_updated(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|record| record.last_updated).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn remote(id: &str, secs: i64) -> RemoteRecord {
        RemoteRecord {
            resource_type: "Patient".into(),
            resource_id: id.into(),
            payload: None,
            version_tag: None,
            last_updated: Utc.timestamp_opt(secs, 0).unwrap(),
            deleted: true,
        }
    }

    #[test]
    fn page_watermark() {
        let page = DownloadPage {
            records: vec![remote("a", 30), remote("b", 10)],
            next_page_token: Some("2".into()),
        };
        assert!(page.has_more());
        assert_eq!(page.max_last_updated(), Some(Utc.timestamp_opt(30, 0).unwrap()));
        assert_eq!(DownloadPage::default().max_last_updated(), None);
    }

    #[test]
    fn request_builder() {
        let mut params = BTreeMap::new();
        params.insert("_count".to_string(), "50".to_string());
        let request = DownloadRequest::new("Patient", None)
            .with_page_token(Some("abc".into()))
            .with_params(params);
        assert_eq!(request.page_token.as_deref(), Some("abc"));
        assert_eq!(request.params["_count"], "50");
    }
}
