//! Journal record types.

use crate::change::ChangeLogEntry;
use crate::error::{CoreError, CoreResult};
use crate::record::RecordRow;
use crate::types::{ChangeId, RecordUuid, SequenceNumber};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single table mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreOp {
    /// Insert or replace a record row.
    PutRecord {
        /// The new row.
        row: RecordRow,
    },
    /// Physically remove a record row and its pending changes.
    RemoveRecord {
        /// Record to remove.
        record_uuid: RecordUuid,
    },
    /// Replace the pending change list of a record.
    SetChanges {
        /// Record whose list is replaced.
        record_uuid: RecordUuid,
        /// New pending list, in id order.
        entries: Vec<ChangeLogEntry>,
    },
    /// Set a metadata value.
    PutMeta {
        /// Metadata key.
        key: String,
        /// New value.
        value: Value,
    },
    /// Remove a metadata value.
    RemoveMeta {
        /// Metadata key.
        key: String,
    },
}

/// A committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit sequence number.
    pub seq: SequenceNumber,
    /// Next unused change id after this commit.
    pub next_change_id: ChangeId,
    /// Mutations in application order.
    pub ops: Vec<StoreOp>,
}

/// Full table contents, written by compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Sequence number of the last commit folded into the snapshot.
    pub seq: SequenceNumber,
    /// Next unused change id.
    pub next_change_id: ChangeId,
    /// All record rows, tombstones included.
    pub records: Vec<RecordRow>,
    /// All pending changes in id order.
    pub changes: Vec<ChangeLogEntry>,
    /// Metadata.
    pub metadata: BTreeMap<String, Value>,
}

/// A journal frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalRecord {
    /// One committed transaction.
    Commit(CommitRecord),
    /// A compacted image of the store.
    Snapshot(SnapshotRecord),
}

impl JournalRecord {
    /// Returns the sequence number the record ends at.
    #[must_use]
    pub fn seq(&self) -> SequenceNumber {
        match self {
            Self::Commit(commit) => commit.seq,
            Self::Snapshot(snapshot) => snapshot.seq,
        }
    }

    /// Short name used in listings.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Commit(_) => "commit",
            Self::Snapshot(_) => "snapshot",
        }
    }

    /// Encodes the record as CBOR.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::journal(format!("encode failed: {e}")))?;
        Ok(buf)
    }

    /// Decodes a record from CBOR.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::journal(format!("decode failed: {e}")))
    }
}
