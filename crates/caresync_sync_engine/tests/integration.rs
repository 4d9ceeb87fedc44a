//! Integration tests for the sync engine against the reference server.

use caresync_core::{RecordStore, SquashedOperation};
use caresync_sync_engine::{
    CborTransport, ConflictResolver, CreateMode, DownloadTypeConfig, Engine, FnResolver,
    LoopbackClient, LoopbackServer, Resolution, SyncConfig, SyncError, Transport, UploadStrategy,
};
use caresync_sync_protocol::RemoteRecord;
use caresync_sync_server::{ServerConfig, SyncServer};
use caresync_testkit::{
    anonymous_patient, given_name, observation, patient, renamed, scenarios, TestStore,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared view of the server link: the server plus call accounting.
struct LinkState {
    server: Arc<SyncServer>,
    calls: AtomicUsize,
    /// Calls with this number or later fail.
    fail_from: AtomicUsize,
}

impl LinkState {
    fn new(server: &Arc<SyncServer>) -> Arc<Self> {
        Arc::new(Self {
            server: Arc::clone(server),
            calls: AtomicUsize::new(0),
            fail_from: AtomicUsize::new(usize::MAX),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail_from_call(&self, call: usize) {
        self.fail_from.store(call, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.fail_from.store(usize::MAX, Ordering::SeqCst);
    }
}

/// Routes CBOR messages straight into the server.
struct Link(Arc<LinkState>);

impl LoopbackServer for Link {
    fn handle_bytes(&self, body: &[u8]) -> Result<Vec<u8>, String> {
        let call = self.0.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.0.fail_from.load(Ordering::SeqCst) {
            return Err("connection reset".into());
        }
        self.0.server.handle_bytes(body)
    }
}

fn server() -> Arc<SyncServer> {
    Arc::new(SyncServer::new(ServerConfig::default()))
}

fn client(link: &Arc<LinkState>, store: Arc<RecordStore>, config: SyncConfig) -> Engine {
    let transport: Arc<dyn Transport> =
        Arc::new(CborTransport::new(LoopbackClient::new(Link(Arc::clone(link)))));
    Engine::new(store, transport, config)
}

fn memory_client(link: &Arc<LinkState>, config: SyncConfig) -> Engine {
    client(link, TestStore::memory().shared(), config)
}

fn patients() -> SyncConfig {
    SyncConfig::default().with_download_type(DownloadTypeConfig::new("Patient"))
}

fn server_payload(server: &SyncServer, resource_type: &str, id: &str) -> Value {
    server
        .get(resource_type, id)
        .and_then(|record| record.payload)
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn client_server_full_sync() {
    let server = server();
    let link = LinkState::new(&server);
    let engine = memory_client(&link, patients());

    engine.create("Patient", patient("p1", "Ann")).unwrap();
    engine.create("Patient", patient("p2", "Bob")).unwrap();

    let report = engine.sync().await.unwrap();
    assert_eq!(report.upload.uploaded, 2);
    assert_eq!(report.upload.requests_sent, 1);
    assert!(report.upload.is_clean());

    assert!(engine.store().pending_records().is_empty());
    assert_eq!(engine.get("Patient", "p1").unwrap().version_tag.as_deref(), Some("1"));
    assert_eq!(given_name(&server_payload(&server, "Patient", "p2")), Some("Bob"));
}

#[tokio::test]
async fn ann_anna_annie_goes_out_as_one_patch() {
    let server = server();
    let link = LinkState::new(&server);
    let engine = memory_client(&link, SyncConfig::default());

    let ann = engine.create("Patient", patient("p1", "Ann")).unwrap();
    engine.sync_upload().await.unwrap();

    engine.update("Patient", "p1", renamed(&ann.payload, "Anna")).unwrap();
    engine.update("Patient", "p1", renamed(&ann.payload, "Annie")).unwrap();

    let squashed = engine.store().squashed(ann.record_uuid).unwrap().unwrap();
    let SquashedOperation::Update(patch) = &squashed.operation else {
        panic!("expected an update, got {:?}", squashed.operation);
    };
    assert_eq!(patch.len(), 1);
    assert_eq!(squashed.version_tag.as_deref(), Some("1"));

    let before = link.calls();
    let report = engine.sync_upload().await.unwrap();
    assert_eq!(link.calls() - before, 1);
    assert_eq!(report.uploaded, 1);

    let remote = server.get("Patient", "p1").unwrap();
    assert_eq!(given_name(remote.payload.as_ref().unwrap()), Some("Annie"));
    assert_eq!(remote.version_tag.as_deref(), Some("2"));
    assert_eq!(engine.get("Patient", "p1").unwrap().version_tag.as_deref(), Some("2"));
}

#[tokio::test]
async fn insert_then_delete_never_reaches_the_server() {
    let server = server();
    let link = LinkState::new(&server);
    let engine = memory_client(&link, SyncConfig::default());

    engine.create("Patient", patient("p1", "Ann")).unwrap();
    engine.delete("Patient", "p1").unwrap();

    let report = engine.sync_upload().await.unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.requests_sent, 0);
    assert_eq!(link.calls(), 0);
    assert!(server.counts().is_empty());
    assert!(engine.store().pending_records().is_empty());
}

#[tokio::test]
async fn renumbering_reaches_every_referrer() {
    let server = server();
    let link = LinkState::new(&server);
    let engine = memory_client(
        &link,
        SyncConfig::default()
            .with_upload_strategy(UploadStrategy::PerRecord)
            .with_create_mode(CreateMode::ServerAssigned),
    );

    let temp = engine.create("Patient", anonymous_patient("Ann")).unwrap();
    let subject = temp.reference();
    engine.create("Observation", observation("obs-a", &subject, 120.0)).unwrap();
    engine.create("Observation", observation("obs-b", &subject, 125.0)).unwrap();

    let report = engine.sync_upload().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.renumbered.len(), 3);
    let patient_renumbering = report
        .renumbered
        .iter()
        .find(|r| r.record_uuid == temp.record_uuid)
        .unwrap();
    assert_eq!(patient_renumbering.new_reference, "Patient/1");
    assert_eq!(patient_renumbering.referrers_rewritten, 2);

    assert!(engine.get("Patient", &temp.external_id).is_none());
    assert_eq!(engine.get("Patient", "1").unwrap().record_uuid, temp.record_uuid);
    assert!(engine.store().referrers(&subject).is_empty());

    let observations = engine.list("Observation");
    assert_eq!(observations.len(), 2);
    for local in &observations {
        assert_eq!(local.payload["subject"]["reference"], "Patient/1");
        let remote = server_payload(&server, "Observation", &local.external_id);
        assert_eq!(remote["subject"]["reference"], "Patient/1");
    }
    assert!(engine.store().pending_records().is_empty());
}

#[tokio::test]
async fn bundled_renumbering_agrees_with_the_server() {
    let server = server();
    let link = LinkState::new(&server);
    let engine = memory_client(
        &link,
        SyncConfig::default().with_create_mode(CreateMode::ServerAssigned),
    );

    let temp = engine.create("Patient", anonymous_patient("Ann")).unwrap();
    engine
        .create("Observation", observation("obs-a", &temp.reference(), 120.0))
        .unwrap();

    let report = engine.sync_upload().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.requests_sent, 1);

    let local = engine.list("Observation").pop().unwrap();
    let remote = server_payload(&server, "Observation", &local.external_id);
    assert_eq!(local.payload["subject"]["reference"], "Patient/1");
    assert_eq!(remote["subject"]["reference"], "Patient/1");

    // The observation went out with the temporary reference, so a
    // corrective update follows; this server already resolved it.
    assert_eq!(engine.store().pending_records(), vec![local.record_uuid]);
    let report = engine.sync_upload().await.unwrap();
    assert!(report.is_clean());
    assert!(engine.store().pending_records().is_empty());
    let remote = server_payload(&server, "Observation", &local.external_id);
    assert_eq!(remote["subject"]["reference"], "Patient/1");
}

#[tokio::test]
async fn interrupted_download_resumes_at_the_next_page() {
    let server = server();
    scenarios::seeded_server(&server, 5);
    let link = LinkState::new(&server);
    let engine = memory_client(&link, patients().with_page_size(2));

    link.fail_from_call(2);
    let result = engine.sync_download().await;
    assert!(matches!(result, Err(SyncError::Transport { .. })));
    assert_eq!(engine.list("Patient").len(), 2);
    assert_eq!(engine.download_state("Patient").unwrap().name(), "fetching");

    link.heal();
    let report = engine.sync_download().await.unwrap();
    let summary = report.for_type("Patient").unwrap();
    assert_eq!(summary.inserted, 3);
    assert!(summary.completed);
    assert_eq!(engine.list("Patient").len(), 5);
    assert_eq!(engine.download_state("Patient").unwrap().name(), "done");

    // Only changes after the watermark come back.
    server.put_remote("Patient", "p3", patient("p3", "Renamed"));
    let report = engine.sync_download().await.unwrap();
    let summary = report.for_type("Patient").unwrap();
    assert_eq!(summary.overwritten, 1);
    assert_eq!(summary.inserted, 0);
    assert_eq!(given_name(&engine.get("Patient", "p3").unwrap().payload), Some("Renamed"));
}

#[tokio::test]
async fn download_cursor_survives_a_restart() {
    let server = server();
    scenarios::seeded_server(&server, 4);
    let link = LinkState::new(&server);
    let test_store = TestStore::file();

    let engine = client(&link, test_store.shared(), patients().with_page_size(2));
    link.fail_from_call(2);
    assert!(engine.sync_download().await.is_err());
    drop(engine);

    let test_store = test_store.reopen();
    assert_eq!(test_store.list("Patient").len(), 2);

    link.heal();
    let calls_before = link.calls();
    let engine = client(&link, test_store.shared(), patients().with_page_size(2));
    let report = engine.sync_download().await.unwrap();
    assert_eq!(report.for_type("Patient").unwrap().inserted, 2);
    // The first page is not fetched again.
    assert_eq!(link.calls() - calls_before, 1);
    assert_eq!(engine.list("Patient").len(), 4);
}

#[tokio::test]
async fn remote_delete_removes_a_clean_record() {
    let server = server();
    let link = LinkState::new(&server);
    let writer = memory_client(&link, SyncConfig::default());
    let reader = memory_client(&link, patients());

    writer.create("Patient", patient("p1", "Ann")).unwrap();
    writer.sync_upload().await.unwrap();
    reader.sync_download().await.unwrap();
    assert!(reader.get("Patient", "p1").is_some());

    writer.delete("Patient", "p1").unwrap();
    writer.sync_upload().await.unwrap();
    assert!(server.get("Patient", "p1").unwrap().deleted);

    let report = reader.sync_download().await.unwrap();
    assert_eq!(report.for_type("Patient").unwrap().removed, 1);
    assert!(reader.get("Patient", "p1").is_none());
}

#[tokio::test]
async fn local_edit_recreates_a_record_deleted_on_the_server() {
    let server = server();
    let link = LinkState::new(&server);
    let engine = memory_client(&link, patients());

    server.put_remote("Patient", "p1", patient("p1", "Ann"));
    engine.sync().await.unwrap();
    let ann = engine.get("Patient", "p1").unwrap();
    engine.update("Patient", "p1", renamed(&ann.payload, "Anna")).unwrap();
    assert!(server.delete_remote("Patient", "p1"));

    let report = engine.sync().await.unwrap();
    assert!(report.upload.is_clean(), "{:?}", report.upload.failures);
    assert!(engine.store().pending_records().is_empty());
    assert_eq!(given_name(&server_payload(&server, "Patient", "p1")), Some("Anna"));
    assert!(!server.get("Patient", "p1").unwrap().deleted);

    // The next pass sees the recreated record and settles on it.
    engine.sync().await.unwrap();
    assert!(engine.store().pending_records().is_empty());
    assert_eq!(given_name(&engine.get("Patient", "p1").unwrap().payload), Some("Anna"));
}

/// Two clients edit the same patient; `resolver` settles it on the second.
/// Returns the second client's payload and the server's payload.
async fn concurrent_rename(resolver: Arc<dyn ConflictResolver>) -> (Value, Value) {
    let server = server();
    let link = LinkState::new(&server);
    let first = memory_client(&link, patients());
    let second = memory_client(&link, patients()).with_resolver(resolver);

    let ann = first.create("Patient", patient("p1", "Ann")).unwrap();
    first.sync_upload().await.unwrap();
    second.sync_download().await.unwrap();

    first.update("Patient", "p1", renamed(&ann.payload, "Anna")).unwrap();
    first.sync_upload().await.unwrap();
    second.update("Patient", "p1", renamed(&ann.payload, "Annie")).unwrap();

    let report = second.sync().await.unwrap();
    assert!(report.upload.is_clean());
    first.sync_download().await.unwrap();
    assert_eq!(
        first.get("Patient", "p1").unwrap().payload,
        second.get("Patient", "p1").unwrap().payload
    );

    (
        second.get("Patient", "p1").unwrap().payload,
        server_payload(&server, "Patient", "p1"),
    )
}

fn keep_local_name() -> Arc<dyn ConflictResolver> {
    Arc::new(FnResolver(|local: &caresync_core::RecordRow, remote: &RemoteRecord| {
        let mut merged = remote.payload.clone().unwrap_or_default();
        merged["name"] = local.payload["name"].clone();
        Resolution::Resolved(merged)
    }))
}

#[tokio::test]
async fn server_wins_conflicts_deterministically() {
    let (local, remote) = concurrent_rename(Arc::new(caresync_sync_engine::AcceptRemoteResolver)).await;
    assert_eq!(given_name(&local), Some("Anna"));
    assert_eq!(local, remote);

    let (again, _) = concurrent_rename(Arc::new(caresync_sync_engine::AcceptRemoteResolver)).await;
    assert_eq!(again, local);
}

#[tokio::test]
async fn merged_conflicts_upload_the_merge() {
    let (local, remote) = concurrent_rename(keep_local_name()).await;
    assert_eq!(given_name(&local), Some("Annie"));
    assert_eq!(local, remote);

    let (again, _) = concurrent_rename(keep_local_name()).await;
    assert_eq!(again, local);
}

#[tokio::test]
async fn stale_upload_is_a_conflict_until_downloaded() {
    let server = server();
    let link = LinkState::new(&server);
    let first = memory_client(&link, patients());
    let second = memory_client(&link, patients());

    let ann = first.create("Patient", patient("p1", "Ann")).unwrap();
    first.sync_upload().await.unwrap();
    second.sync_download().await.unwrap();
    first.update("Patient", "p1", renamed(&ann.payload, "Anna")).unwrap();
    first.sync_upload().await.unwrap();

    second.update("Patient", "p1", renamed(&ann.payload, "Annie")).unwrap();
    let report = second.sync_upload().await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].error, SyncError::Conflict { .. }));
    assert_eq!(second.store().pending_records().len(), 1);

    second.sync().await.unwrap();
    assert!(second.store().pending_records().is_empty());
    assert_eq!(given_name(&second.get("Patient", "p1").unwrap().payload), Some("Anna"));
}
