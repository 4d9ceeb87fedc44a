//! Upload request and response types.

use caresync_codec::Patch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The verb of one upload entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    /// Create or replace with a client-chosen id.
    Put,
    /// Create with a server-assigned id.
    Post,
    /// Apply a patch to an existing resource.
    Patch,
    /// Delete a resource.
    Delete,
}

impl Verb {
    /// Returns true for the verbs that create a resource.
    #[must_use]
    pub fn is_create(self) -> bool {
        matches!(self, Self::Put | Self::Post)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// The body of an upload entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UploadBody {
    /// A full resource snapshot (PUT and POST).
    Resource(Value),
    /// A JSON patch (PATCH).
    Patch(Patch),
}

/// One resource operation in an upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadEntry {
    /// Operation verb.
    pub verb: Verb,
    /// Resource type.
    pub resource_type: String,
    /// Resource id: the client id for PUT/PATCH/DELETE, the temporary
    /// client id for POST.
    pub resource_id: String,
    /// Request body, absent for DELETE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<UploadBody>,
    /// Version tag the change was made against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
}

impl UploadEntry {
    /// Returns `"<type>/<id>"`.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }
}

/// An upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "entries", rename_all = "snake_case")]
pub enum UploadRequest {
    /// Many entries processed as one request.
    Bundled(Vec<UploadEntry>),
    /// A single entry.
    Single(UploadEntry),
}

impl UploadRequest {
    /// Returns the entries in request order.
    #[must_use]
    pub fn entries(&self) -> &[UploadEntry] {
        match self {
            Self::Bundled(entries) => entries,
            Self::Single(entry) => std::slice::from_ref(entry),
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if the request carries no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Server outcome for one upload entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// The resource was created. `resource_id` is the id the server keeps,
    /// which differs from the request id for POST.
    Created {
        /// Resource type.
        resource_type: String,
        /// Server id.
        resource_id: String,
        /// New version tag.
        #[serde(default)]
        version_tag: Option<String>,
        /// Server modification time.
        last_updated: DateTime<Utc>,
    },
    /// The resource was updated.
    Updated {
        /// New version tag.
        #[serde(default)]
        version_tag: Option<String>,
        /// Server modification time.
        last_updated: DateTime<Utc>,
    },
    /// The resource was deleted (or was already absent).
    Deleted,
    /// The version tag did not match.
    Conflict {
        /// Server message.
        message: String,
    },
    /// The server refused the entry.
    Rejected {
        /// Server message.
        message: String,
    },
}

impl EntryOutcome {
    /// Returns true if the server applied the entry.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Updated { .. } | Self::Deleted)
    }
}

/// Response to an upload request, one outcome per entry in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Entry outcomes aligned with the request entries.
    pub outcomes: Vec<EntryOutcome>,
}

impl UploadResponse {
    /// Creates a response.
    pub fn new(outcomes: Vec<EntryOutcome>) -> Self {
        Self { outcomes }
    }
}
