//! The upload cycle.
//!
//! Three stages run as tokio tasks joined by bounded channels:
//!
//! 1. the producer squashes pending changes, discards local no-ops,
//!    orders the rest by reference and plans request groups;
//! 2. the network stage re-reads each group, builds its request and
//!    sends it;
//! 3. the apply stage (the calling task) consolidates every response.
//!
//! With server-assigned ids the network stage waits for each response to
//! be consolidated before building the next request, so later requests
//! already carry the server ids.

use crate::config::{CreateMode, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::state::{RecordFailure, UploadReport};
use crate::transport::Transport;
use crate::upload::consolidator::{Consolidated, Consolidator};
use crate::upload::generator::{build, collect_pending, plan, refresh, PendingUpload, UploadBatch};
use crate::upload::ordering::order_by_references;
use caresync_core::{ChangeToken, RecordStore};
use caresync_sync_protocol::UploadResponse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum Planned {
    Prepared {
        discarded: usize,
        failures: Vec<RecordFailure>,
    },
    Group(Vec<PendingUpload>),
    Aborted(SyncError),
}

enum Sent {
    Prepared {
        discarded: usize,
        failures: Vec<RecordFailure>,
    },
    Skipped(RecordFailure),
    Response {
        batch: UploadBatch,
        response: UploadResponse,
        consolidated: Option<oneshot::Sender<()>>,
    },
    Aborted(SyncError),
}

/// Runs upload cycles against a transport.
pub struct UploadPipeline {
    store: Arc<RecordStore>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl UploadPipeline {
    /// Creates a pipeline. Setting `cancelled` stops the cycle at the
    /// next request boundary.
    pub fn new(
        store: Arc<RecordStore>,
        transport: Arc<dyn Transport>,
        config: SyncConfig,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            cancelled,
        }
    }

    /// Uploads every pending change once.
    ///
    /// Per-record failures are collected in the report. A transport
    /// error or cancellation ends the cycle after the responses already
    /// received have been consolidated; unsent changes keep their tokens.
    pub async fn run(&self) -> SyncResult<UploadReport> {
        let capacity = self.config.channel_capacity.max(1);
        let (planned_tx, planned_rx) = mpsc::channel(capacity);
        let (sent_tx, mut sent_rx) = mpsc::channel(capacity);

        let producer = tokio::spawn(produce(
            Arc::clone(&self.store),
            self.config.clone(),
            planned_tx,
        ));
        let network = tokio::spawn(send_groups(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.config.clone(),
            Arc::clone(&self.cancelled),
            planned_rx,
            sent_tx,
        ));

        let consolidator = Consolidator::new(Arc::clone(&self.store), self.config.rewrite_mode);
        let mut report = UploadReport::default();
        let mut aborted = None;
        while let Some(message) = sent_rx.recv().await {
            match message {
                Sent::Prepared {
                    discarded,
                    failures,
                } => {
                    report.discarded += discarded;
                    report.failures.extend(failures);
                }
                Sent::Skipped(failure) => report.failures.push(failure),
                Sent::Response {
                    batch,
                    response,
                    consolidated,
                } => {
                    report.requests_sent += 1;
                    apply_response(&consolidator, batch, &response, &mut report)?;
                    if let Some(done) = consolidated {
                        let _ = done.send(());
                    }
                }
                Sent::Aborted(e) => aborted = Some(e),
            }
        }

        for stage in [producer, network] {
            stage
                .await
                .map_err(|e| SyncError::Protocol(format!("upload stage failed: {e}")))?;
        }

        if let Some(e) = aborted {
            info!(
                uploaded = report.uploaded,
                failures = report.failures.len(),
                error = %e,
                "upload cycle aborted"
            );
            return Err(e);
        }
        info!(
            requests = report.requests_sent,
            uploaded = report.uploaded,
            discarded = report.discarded,
            renumbered = report.renumbered.len(),
            failures = report.failures.len(),
            "upload cycle finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for UploadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn produce(store: Arc<RecordStore>, config: SyncConfig, planned: mpsc::Sender<Planned>) {
    let pending = match collect_pending(&store) {
        Ok(pending) => pending,
        Err(e) => {
            let _ = planned.send(Planned::Aborted(e)).await;
            return;
        }
    };

    let mut failures = pending.failures;
    let mut discarded = 0;
    for discard in &pending.discards {
        match discard_locally(&store, discard) {
            Ok(()) => discarded += 1,
            Err(e) => failures.push(RecordFailure {
                record_uuid: Some(discard.record_uuid),
                reference: discard.reference(),
                error: e,
            }),
        }
    }
    if planned
        .send(Planned::Prepared {
            discarded,
            failures,
        })
        .await
        .is_err()
    {
        return;
    }

    let uploads = if config.order_by_references {
        order_by_references(&store, pending.uploads)
    } else {
        pending.uploads
    };
    for group in plan(uploads, config.upload_strategy, config.upload_batch_size) {
        if planned.send(Planned::Group(group)).await.is_err() {
            return;
        }
    }
}

fn discard_locally(store: &RecordStore, discard: &PendingUpload) -> SyncResult<()> {
    let record_uuid = discard.record_uuid;
    store.transaction(&[record_uuid], |txn| {
        txn.discard_token(record_uuid, &discard.token)?;
        if txn.changes(record_uuid).is_empty() {
            txn.remove_record(record_uuid)?;
        }
        Ok(())
    })?;
    debug!(reference = %discard.reference(), "insert and delete cancelled out locally");
    Ok(())
}

async fn send_groups(
    store: Arc<RecordStore>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
    mut planned: mpsc::Receiver<Planned>,
    sent: mpsc::Sender<Sent>,
) {
    let wait_for_apply = config.create_mode == CreateMode::ServerAssigned;
    while let Some(message) = planned.recv().await {
        let group = match message {
            Planned::Group(group) => group,
            Planned::Prepared {
                discarded,
                failures,
            } => {
                if sent
                    .send(Sent::Prepared {
                        discarded,
                        failures,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }
            Planned::Aborted(e) => {
                let _ = sent.send(Sent::Aborted(e)).await;
                return;
            }
        };

        if cancelled.load(Ordering::SeqCst) {
            let _ = sent.send(Sent::Aborted(SyncError::Cancelled)).await;
            return;
        }

        let mut members = Vec::with_capacity(group.len());
        for planned in group {
            match refresh(&store, &planned) {
                Ok(Some(fresh)) => members.push(fresh),
                Ok(None) => debug!(reference = %planned.reference(), "change superseded before sending"),
                Err(e) if e.is_fatal() => {
                    let _ = sent.send(Sent::Aborted(e)).await;
                    return;
                }
                Err(e) => {
                    let failure = RecordFailure {
                        record_uuid: Some(planned.record_uuid),
                        reference: planned.reference(),
                        error: e,
                    };
                    if sent.send(Sent::Skipped(failure)).await.is_err() {
                        return;
                    }
                }
            }
        }
        let Some(batch) = build(members, config.upload_strategy, config.create_mode) else {
            continue;
        };

        debug!(entries = batch.request.len(), "sending upload request");
        let response = match transport.send(&batch.request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "upload request failed");
                let _ = sent.send(Sent::Aborted(e)).await;
                return;
            }
        };

        let (done_tx, done_rx) = if wait_for_apply {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let message = Sent::Response {
            batch,
            response,
            consolidated: done_tx,
        };
        if sent.send(message).await.is_err() {
            return;
        }
        if let Some(done) = done_rx {
            if done.await.is_err() {
                return;
            }
        }
    }
}

fn apply_response(
    consolidator: &Consolidator,
    batch: UploadBatch,
    response: &UploadResponse,
    report: &mut UploadReport,
) -> SyncResult<()> {
    let entries = batch.request.entries();
    if response.outcomes.len() != entries.len() {
        warn!(
            expected = entries.len(),
            received = response.outcomes.len(),
            "upload response does not match its request"
        );
        for member in &batch.members {
            report.failures.push(RecordFailure {
                record_uuid: Some(member.record_uuid),
                reference: member.reference(),
                error: SyncError::Protocol(format!(
                    "expected {} outcomes, got {}",
                    entries.len(),
                    response.outcomes.len()
                )),
            });
        }
        return Ok(());
    }

    let mut in_flight = ChangeToken::default();
    for member in &batch.members {
        in_flight.extend(&member.token);
    }
    for ((member, entry), outcome) in batch.members.iter().zip(entries).zip(&response.outcomes) {
        match consolidator.consolidate_in_batch(member, entry, outcome, &in_flight) {
            Ok(Consolidated::Renumbered(renumbering)) => {
                report.uploaded += 1;
                report.renumbered.push(renumbering);
            }
            Ok(_) => report.uploaded += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(reference = %member.reference(), error = %e, "upload entry not applied");
                report.failures.push(RecordFailure {
                    record_uuid: Some(member.record_uuid),
                    reference: member.reference(),
                    error: e,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadStrategy;
    use crate::transport::MockTransport;
    use caresync_core::SquashedOperation;
    use caresync_sync_protocol::{EntryOutcome, UploadBody};
    use chrono::Utc;
    use serde_json::json;

    fn created(resource_type: &str, id: &str) -> EntryOutcome {
        EntryOutcome::Created {
            resource_type: resource_type.into(),
            resource_id: id.into(),
            version_tag: Some("1".into()),
            last_updated: Utc::now(),
        }
    }

    fn pipeline(store: &Arc<RecordStore>, transport: &Arc<MockTransport>, config: SyncConfig) -> UploadPipeline {
        UploadPipeline::new(
            Arc::clone(store),
            Arc::clone(transport) as Arc<dyn Transport>,
            config,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn bundled_creates_are_acknowledged() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        store.create("Patient", json!({"id": "p2"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_upload_response(UploadResponse::new(vec![
            created("Patient", "p1"),
            created("Patient", "p2"),
        ]));

        let report = pipeline(&store, &transport, SyncConfig::default()).run().await.unwrap();
        assert_eq!(report.requests_sent, 1);
        assert_eq!(report.uploaded, 2);
        assert!(report.is_clean());
        assert!(store.pending_records().is_empty());
        assert_eq!(store.get("Patient", "p1").unwrap().version_tag.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn zero_channel_capacity_still_uploads() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        store.create("Patient", json!({"id": "p2"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_upload_response(UploadResponse::new(vec![created("Patient", "p1")]));
        transport.push_upload_response(UploadResponse::new(vec![created("Patient", "p2")]));

        let mut config = SyncConfig::default().with_upload_strategy(UploadStrategy::PerRecord);
        config.channel_capacity = 0;
        let report = pipeline(&store, &transport, config).run().await.unwrap();
        assert_eq!(report.requests_sent, 2);
        assert_eq!(report.uploaded, 2);
        assert!(store.pending_records().is_empty());
    }

    #[tokio::test]
    async fn server_ids_reach_later_requests() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store
            .create("Observation", json!({"id": "o-tmp", "subject": {"reference": "Patient/p-tmp"}}))
            .unwrap();
        store.create("Patient", json!({"id": "p-tmp"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_upload_response(UploadResponse::new(vec![created("Patient", "42")]));
        transport.push_upload_response(UploadResponse::new(vec![created("Observation", "7")]));

        let config = SyncConfig::default()
            .with_upload_strategy(UploadStrategy::PerRecord)
            .with_create_mode(CreateMode::ServerAssigned);
        let report = pipeline(&store, &transport, config).run().await.unwrap();
        assert_eq!(report.renumbered.len(), 2);

        let sent = transport.sent();
        assert_eq!(sent[0].entries()[0].resource_type, "Patient");
        let Some(UploadBody::Resource(body)) = &sent[1].entries()[0].body else {
            panic!("expected a resource body");
        };
        assert_eq!(body["subject"]["reference"], "Patient/42");
        assert_eq!(
            store.get("Observation", "7").unwrap().payload["subject"]["reference"],
            "Patient/42"
        );
    }

    #[tokio::test]
    async fn bundled_referrer_sent_with_a_temporary_id_is_corrected() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let obs = store
            .create("Observation", json!({"id": "o-tmp", "subject": {"reference": "Patient/p-tmp"}}))
            .unwrap();
        store.create("Patient", json!({"id": "p-tmp"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_upload_response(UploadResponse::new(vec![
            created("Patient", "42"),
            created("Observation", "7"),
        ]));

        let config = SyncConfig::default().with_create_mode(CreateMode::ServerAssigned);
        let report = pipeline(&store, &transport, config).run().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.requests_sent, 1);

        let sent = transport.sent();
        let Some(UploadBody::Resource(body)) = &sent[0].entries()[1].body else {
            panic!("expected a resource body");
        };
        assert_eq!(body["subject"]["reference"], "Patient/p-tmp");

        let local = store.get("Observation", "7").unwrap();
        assert_eq!(local.payload["subject"]["reference"], "Patient/42");
        assert_eq!(store.pending_records(), vec![obs.record_uuid]);
        let squashed = store.squashed(obs.record_uuid).unwrap().unwrap();
        assert_eq!(squashed.version_tag.as_deref(), Some("1"));
        let SquashedOperation::Update(patch) = squashed.operation else {
            panic!("expected a corrective update");
        };
        assert_eq!(
            patch.to_json(),
            json!([{"op": "replace", "path": "/subject/reference", "value": "Patient/42"}])
        );
    }

    #[tokio::test]
    async fn transport_failure_keeps_tokens() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_upload_error(SyncError::transport_retryable("offline"));

        let result = pipeline(&store, &transport, SyncConfig::default()).run().await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
        assert_eq!(store.pending_records().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_cycle_sends_nothing() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        let cancelled = Arc::new(AtomicBool::new(true));
        let pipeline = UploadPipeline::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn Transport>,
            SyncConfig::default(),
            cancelled,
        );

        assert!(matches!(pipeline.run().await, Err(SyncError::Cancelled)));
        assert!(transport.sent().is_empty());
        assert_eq!(store.pending_records().len(), 1);
    }

    #[tokio::test]
    async fn local_discards_never_reach_the_network() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let row = store.create("Patient", json!({"id": "p1"})).unwrap();
        store.delete("Patient", "p1").unwrap();
        let transport = Arc::new(MockTransport::new());

        let report = pipeline(&store, &transport, SyncConfig::default()).run().await.unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(report.requests_sent, 0);
        assert!(transport.sent().is_empty());
        assert!(store.get_by_uuid(row.record_uuid).is_none());
    }

    #[tokio::test]
    async fn short_response_fails_every_member() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        store.create("Patient", json!({"id": "p2"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_upload_response(UploadResponse::new(vec![created("Patient", "p1")]));

        let report = pipeline(&store, &transport, SyncConfig::default()).run().await.unwrap();
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.uploaded, 0);
        assert_eq!(store.pending_records().len(), 2);
    }

    #[tokio::test]
    async fn rejected_entries_are_reported_without_stopping_the_batch() {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        store.create("Patient", json!({"id": "p1"})).unwrap();
        store.create("Patient", json!({"id": "p2"})).unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.push_upload_response(UploadResponse::new(vec![
            EntryOutcome::Rejected {
                message: "invalid".into(),
            },
            created("Patient", "p2"),
        ]));

        let report = pipeline(&store, &transport, SyncConfig::default()).run().await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, SyncError::Rejected { .. }));
        assert_eq!(store.pending_records().len(), 1);
    }
}
