//! Change log entries and tokens.

use crate::types::{ChangeId, RecordUuid};
use caresync_codec::Patch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// What a single local edit did to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    /// The record was created with this snapshot.
    Insert {
        /// Full snapshot at creation.
        snapshot: Value,
    },
    /// The record was modified by this patch.
    Update {
        /// Patch from the previous snapshot to the new one.
        patch: Patch,
    },
    /// The record was deleted.
    Delete,
}

impl ChangeKind {
    /// Short name used in logs and listings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete => "delete",
        }
    }
}

/// One local edit awaiting upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Globally increasing id.
    pub id: ChangeId,
    /// Record the change applies to.
    pub record_uuid: RecordUuid,
    /// The change itself.
    pub kind: ChangeKind,
    /// Server version tag the record had when the change was made.
    pub version_tag_at_change: Option<String>,
    /// When the change was made.
    pub timestamp: DateTime<Utc>,
}

/// The set of change ids squashed into one outgoing unit.
///
/// Discarding a token deletes exactly these ids; entries appended after
/// the token was taken survive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken {
    ids: BTreeSet<ChangeId>,
}

impl ChangeToken {
    /// Creates a token from change ids.
    pub fn new(ids: impl IntoIterator<Item = ChangeId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Returns the ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ChangeId> + '_ {
        self.ids.iter().copied()
    }

    /// Returns true if the token covers `id`.
    #[must_use]
    pub fn contains(&self, id: ChangeId) -> bool {
        self.ids.contains(&id)
    }

    /// Returns the number of ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the token is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Adds the ids of another token.
    pub fn extend(&mut self, other: &ChangeToken) {
        self.ids.extend(other.ids());
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.ids.iter().map(|id| id.as_u64().to_string()).collect();
        write!(f, "[{}]", ids.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_membership() {
        let mut token = ChangeToken::new([ChangeId::new(3), ChangeId::new(1)]);
        assert!(token.contains(ChangeId::new(1)));
        assert!(!token.contains(ChangeId::new(2)));
        token.extend(&ChangeToken::new([ChangeId::new(2)]));
        assert_eq!(token.to_string(), "[1,2,3]");
        assert_eq!(token.len(), 3);
    }

    #[test]
    fn change_kind_serde_tag() {
        let kind = ChangeKind::Delete;
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "delete"}));
        assert_eq!(kind.name(), "delete");
    }
}
