//! Record rows.

use crate::types::RecordUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The externally visible key of a record: its type and external id.
///
/// Displays as the reference form `"<type>/<external_id>"` that other
/// records use to point at it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Record type, e.g. `Patient`.
    pub record_type: String,
    /// External identifier (client generated or server assigned).
    pub external_id: String,
}

impl RecordKey {
    /// Creates a new key.
    pub fn new(record_type: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            external_id: external_id.into(),
        }
    }

    /// Parses a `"<type>/<id>"` reference.
    #[must_use]
    pub fn parse_reference(reference: &str) -> Option<Self> {
        let (record_type, external_id) = reference.split_once('/')?;
        if record_type.is_empty() || external_id.is_empty() || external_id.contains('/') {
            return None;
        }
        Some(Self::new(record_type, external_id))
    }

    /// Returns the reference string for this key.
    #[must_use]
    pub fn reference(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.external_id)
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    /// Immutable internal id.
    pub record_uuid: RecordUuid,
    /// Record type.
    pub record_type: String,
    /// External id, unique per type.
    pub external_id: String,
    /// Current snapshot.
    pub payload: Value,
    /// Server version tag (ETag) of the last known server state.
    pub version_tag: Option<String>,
    /// Server-side last modification time.
    pub last_updated_remote: Option<DateTime<Utc>>,
    /// Local last modification time.
    pub last_updated_local: Option<DateTime<Utc>>,
    /// Set while a local DELETE is pending; hidden from reads.
    #[serde(default)]
    pub tombstone: bool,
}

impl RecordRow {
    /// Returns the record's key.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.record_type, &self.external_id)
    }

    /// Returns the reference string other records use to point here.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.record_type, self.external_id)
    }

    /// Returns true if the row is visible to readers.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.tombstone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_round_trip() {
        let key = RecordKey::new("Patient", "p1");
        assert_eq!(key.reference(), "Patient/p1");
        assert_eq!(RecordKey::parse_reference("Patient/p1"), Some(key));
        assert_eq!(RecordKey::parse_reference("Patient"), None);
        assert_eq!(RecordKey::parse_reference("/p1"), None);
        assert_eq!(RecordKey::parse_reference("Patient/p1/_history/2"), None);
    }
}
