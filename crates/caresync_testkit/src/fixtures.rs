//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores, clinical
//! payloads and common scenarios.

use caresync_core::{NamedReferenceMembers, RecordRow, RecordSchema, RecordStore, StoreConfig};
use caresync_sync_server::SyncServer;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<RecordStore>,
    /// Journal file, if file-backed.
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(RecordStore::open_in_memory().expect("Failed to open in-memory store")),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new store journaled to a temporary file.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("records.journal");
        let store = open_file_store(&path);
        Self {
            store: Arc::new(store),
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Closes and reopens a file-backed store, replaying its journal.
    ///
    /// Every other handle to the store must be dropped first; the journal
    /// file is locked while a store holds it.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            path,
            _temp_dir,
        } = self;
        drop(store);
        let path = path.expect("Only file stores can be reopened");
        let store = open_file_store(&path);
        Self {
            store: Arc::new(store),
            path: Some(path),
            _temp_dir,
        }
    }

    /// Returns the journal path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns a shared handle to the store.
    pub fn shared(&self) -> Arc<RecordStore> {
        Arc::clone(&self.store)
    }
}

impl std::ops::Deref for TestStore {
    type Target = RecordStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

fn open_file_store(path: &Path) -> RecordStore {
    RecordStore::open_file(path, StoreConfig::default(), clinical_schema())
        .expect("Failed to open file store")
}

/// Returns the schema used by the fixtures: `id` members hold ids and
/// `reference` members hold references.
pub fn clinical_schema() -> Arc<dyn RecordSchema> {
    Arc::new(NamedReferenceMembers)
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust
/// use caresync_testkit::with_temp_store;
/// use serde_json::json;
///
/// with_temp_store(|store| {
///     store.create("Patient", json!({"id": "p1"})).unwrap();
///     assert_eq!(store.list("Patient").len(), 1);
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&RecordStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&RecordStore, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store
        .path()
        .expect("File store should have a path")
        .to_path_buf();
    f(&test_store.store, &path)
}

/// A patient with one given name.
pub fn patient(id: &str, given: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"given": given}],
        "active": true,
    })
}

/// A patient without an id; the store generates one.
pub fn anonymous_patient(given: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "name": [{"given": given}],
        "active": true,
    })
}

/// An observation about `subject` (a `"<type>/<id>"` reference).
pub fn observation(id: &str, subject: &str, value: f64) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "subject": {"reference": subject},
        "valueQuantity": {"value": value, "unit": "mmHg"},
    })
}

/// An encounter of `subject`.
pub fn encounter(id: &str, subject: &str) -> Value {
    json!({
        "resourceType": "Encounter",
        "id": id,
        "status": "in-progress",
        "subject": {"reference": subject},
    })
}

/// Returns the first given name of a patient payload.
pub fn given_name(payload: &Value) -> Option<&str> {
    payload["name"][0]["given"].as_str()
}

/// Returns a copy of a patient payload with another given name.
pub fn renamed(payload: &Value, given: &str) -> Value {
    let mut next = payload.clone();
    next["name"][0]["given"] = json!(given);
    next
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a patient and `count` observations referring to it.
    pub fn patient_with_observations(store: &RecordStore, count: usize) -> (RecordRow, Vec<RecordRow>) {
        let patient_row = store
            .create("Patient", patient("p1", "Ann"))
            .expect("Failed to create patient");
        let subject = patient_row.key().reference();
        let observations = (0..count)
            .map(|i| {
                store
                    .create("Observation", observation(&format!("o{i}"), &subject, 120.0 + i as f64))
                    .expect("Failed to create observation")
            })
            .collect();
        (patient_row, observations)
    }

    /// Creates a server holding `count` patients named `p0..`.
    pub fn seeded_server(server: &SyncServer, count: usize) {
        for i in 0..count {
            let id = format!("p{i}");
            server.put_remote("Patient", &id, patient(&id, &format!("Patient {i}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caresync_sync_server::ServerConfig;

    #[test]
    fn test_memory_store() {
        let test_store = TestStore::memory();
        assert!(test_store.path().is_none());
        assert!(test_store.list("Patient").is_empty());
    }

    #[test]
    fn file_store_survives_reopen() {
        let test_store = TestStore::file();
        test_store.create("Patient", patient("p1", "Ann")).unwrap();
        let reopened = test_store.reopen();
        let row = reopened.get("Patient", "p1").unwrap();
        assert_eq!(given_name(&row.payload), Some("Ann"));
        assert_eq!(reopened.pending_records().len(), 1);
    }

    #[test]
    fn payload_helpers() {
        let ann = patient("p1", "Ann");
        assert_eq!(given_name(&renamed(&ann, "Anna")), Some("Anna"));
        assert!(anonymous_patient("Ann").get("id").is_none());
        assert_eq!(observation("o1", "Patient/p1", 1.0)["subject"]["reference"], "Patient/p1");
    }

    #[test]
    fn test_scenarios() {
        with_temp_store(|store| {
            let (patient_row, observations) = scenarios::patient_with_observations(store, 3);
            assert_eq!(observations.len(), 3);
            assert_eq!(store.referrers(&patient_row.key().reference()).len(), 3);
        });

        let server = SyncServer::new(ServerConfig::default());
        scenarios::seeded_server(&server, 4);
        assert_eq!(server.counts()["Patient"], 4);
    }
}
