//! Server-side record table.

use chrono::{DateTime, Duration, Utc};
use caresync_sync_protocol::RemoteRecord;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// A record as kept by the server. Deleted records stay as tombstones so
/// that downloads can report them.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Current snapshot; `None` once deleted.
    pub payload: Option<Value>,
    /// Version counter, starting at 1.
    pub version: u64,
    /// Modification time from the table clock.
    pub last_updated: DateTime<Utc>,
}

impl StoredRecord {
    /// Returns true for tombstones.
    pub fn is_deleted(&self) -> bool {
        self.payload.is_none()
    }

    /// Returns the version tag.
    pub fn version_tag(&self) -> String {
        self.version.to_string()
    }

    fn to_remote(&self, resource_type: &str, resource_id: &str) -> RemoteRecord {
        RemoteRecord {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            payload: self.payload.clone(),
            version_tag: Some(self.version_tag()),
            last_updated: self.last_updated,
            deleted: self.is_deleted(),
        }
    }
}

/// Hands out strictly increasing modification times.
///
/// Wall-clock time is used when it moved forward; otherwise the previous
/// time plus one millisecond. Download watermarks rely on no two writes
/// sharing a timestamp.
#[derive(Debug)]
pub struct LogicalClock {
    last: Option<DateTime<Utc>>,
}

impl LogicalClock {
    /// Creates a clock that has not ticked yet.
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Returns the next timestamp.
    pub fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Records keyed by `(resource_type, resource_id)`.
#[derive(Debug)]
pub struct RecordTable {
    records: BTreeMap<(String, String), StoredRecord>,
    clock: LogicalClock,
    next_id: u64,
}

impl RecordTable {
    /// Creates an empty table whose first assigned id number is `first_id`.
    pub fn new(first_id: u64) -> Self {
        Self {
            records: BTreeMap::new(),
            clock: LogicalClock::new(),
            next_id: first_id,
        }
    }

    /// Returns the record under a key, tombstones included.
    pub fn get(&self, resource_type: &str, resource_id: &str) -> Option<&StoredRecord> {
        self.records
            .get(&(resource_type.to_string(), resource_id.to_string()))
    }

    /// Returns the live record under a key.
    pub fn live(&self, resource_type: &str, resource_id: &str) -> Option<&StoredRecord> {
        self.get(resource_type, resource_id)
            .filter(|record| !record.is_deleted())
    }

    /// Returns the next server id number and reserves it.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Returns true if a live or deleted record uses this key.
    pub fn contains(&self, resource_type: &str, resource_id: &str) -> bool {
        self.get(resource_type, resource_id).is_some()
    }

    /// Writes a snapshot, bumping the version of an existing key.
    ///
    /// Returns the stored record and whether the key was live before.
    pub fn write(&mut self, resource_type: &str, resource_id: &str, payload: Value) -> (StoredRecord, bool) {
        let at = self.clock.tick();
        let key = (resource_type.to_string(), resource_id.to_string());
        let (version, existed) = match self.records.get(&key) {
            Some(previous) => (previous.version + 1, !previous.is_deleted()),
            None => (1, false),
        };
        let record = StoredRecord {
            payload: Some(payload),
            version,
            last_updated: at,
        };
        self.records.insert(key, record.clone());
        (record, existed)
    }

    /// Turns a live record into a tombstone. Returns false if there was no
    /// live record.
    pub fn delete(&mut self, resource_type: &str, resource_id: &str) -> bool {
        let key = (resource_type.to_string(), resource_id.to_string());
        match self.records.get(&key) {
            Some(record) if !record.is_deleted() => {}
            _ => return false,
        }
        let at = self.clock.tick();
        if let Some(record) = self.records.get_mut(&key) {
            record.payload = None;
            record.version += 1;
            record.last_updated = at;
        }
        true
    }

    /// Returns the records of a type modified strictly after `after` and
    /// matching every filter, ordered by `(last_updated, resource_id)`.
    ///
    /// A filter `name=value` matches when the top-level member `name` of
    /// the payload is the string `value` (or a scalar printing as it).
    /// Tombstones match every filter. Names starting with `_` are ignored.
    pub fn changed_since(
        &self,
        resource_type: &str,
        after: Option<DateTime<Utc>>,
        params: &BTreeMap<String, String>,
    ) -> Vec<RemoteRecord> {
        let mut changed: Vec<RemoteRecord> = self
            .records
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .filter(|(_, record)| after.map_or(true, |after| record.last_updated > after))
            .filter(|(_, record)| matches_params(record.payload.as_ref(), params))
            .map(|((t, id), record)| record.to_remote(t, id))
            .collect();
        changed.sort_by(|a, b| {
            a.last_updated
                .cmp(&b.last_updated)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        changed
    }

    /// Returns the number of records per type, tombstones included.
    pub fn counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for (resource_type, _) in self.records.keys() {
            *counts.entry(resource_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the table holds nothing.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn matches_params(payload: Option<&Value>, params: &BTreeMap<String, String>) -> bool {
    let Some(payload) = payload else {
        return true;
    };
    params
        .iter()
        .filter(|(name, _)| !name.starts_with('_'))
        .all(|(name, expected)| match payload.get(name) {
            Some(Value::String(actual)) => actual == expected,
            Some(Value::Number(n)) => n.to_string() == *expected,
            Some(Value::Bool(b)) => b.to_string() == *expected,
            _ => false,
        })
}
