//! Conflict resolution between pending local changes and remote records.

use caresync_core::RecordRow;
use caresync_sync_protocol::RemoteRecord;
use serde_json::Value;

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Take the remote snapshot and drop the local changes.
    KeepRemote,
    /// Ignore the remote snapshot this cycle.
    KeepLocal,
    /// Store this merged snapshot; the difference to the remote snapshot
    /// is uploaded next.
    Resolved(Value),
}

/// Decides what happens when a remote record arrives for a local record
/// with pending changes.
///
/// Resolvers must be deterministic: the same local and remote input gives
/// the same resolution.
pub trait ConflictResolver: Send + Sync {
    /// Resolves one conflict. `remote.payload` is always present.
    fn resolve(&self, local: &RecordRow, remote: &RemoteRecord) -> Resolution;
}

/// The server copy always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptRemoteResolver;

impl ConflictResolver for AcceptRemoteResolver {
    fn resolve(&self, _local: &RecordRow, _remote: &RemoteRecord) -> Resolution {
        Resolution::KeepRemote
    }
}

/// The local copy always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptLocalResolver;

impl ConflictResolver for AcceptLocalResolver {
    fn resolve(&self, _local: &RecordRow, _remote: &RemoteRecord) -> Resolution {
        Resolution::KeepLocal
    }
}

/// The copy modified last wins; ties go to the server.
///
/// A local record that was never edited locally loses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastUpdatedWinsResolver;

impl ConflictResolver for LastUpdatedWinsResolver {
    fn resolve(&self, local: &RecordRow, remote: &RemoteRecord) -> Resolution {
        match local.last_updated_local {
            Some(local_time) if local_time > remote.last_updated => Resolution::KeepLocal,
            _ => Resolution::KeepRemote,
        }
    }
}

/// Adapts a closure into a resolver.
pub struct FnResolver<F>(pub F);

impl<F> ConflictResolver for FnResolver<F>
where
    F: Fn(&RecordRow, &RemoteRecord) -> Resolution + Send + Sync,
{
    fn resolve(&self, local: &RecordRow, remote: &RemoteRecord) -> Resolution {
        (self.0)(local, remote)
    }
}

impl<F> std::fmt::Debug for FnResolver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caresync_core::RecordUuid;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn local(edited: Option<chrono::DateTime<Utc>>) -> RecordRow {
        RecordRow {
            record_uuid: RecordUuid::new(),
            record_type: "Patient".into(),
            external_id: "p1".into(),
            payload: json!({"id": "p1", "name": "Anna"}),
            version_tag: Some("1".into()),
            last_updated_remote: None,
            last_updated_local: edited,
            tombstone: false,
        }
    }

    fn remote(at: chrono::DateTime<Utc>) -> RemoteRecord {
        RemoteRecord {
            resource_type: "Patient".into(),
            resource_id: "p1".into(),
            payload: Some(json!({"id": "p1", "name": "Annie"})),
            version_tag: Some("2".into()),
            last_updated: at,
            deleted: false,
        }
    }

    #[test]
    fn last_updated_wins_prefers_the_newer_copy() {
        let now = Utc::now();
        let resolver = LastUpdatedWinsResolver;
        assert_eq!(
            resolver.resolve(&local(Some(now)), &remote(now - Duration::seconds(5))),
            Resolution::KeepLocal
        );
        assert_eq!(
            resolver.resolve(&local(Some(now)), &remote(now + Duration::seconds(5))),
            Resolution::KeepRemote
        );
        assert_eq!(resolver.resolve(&local(Some(now)), &remote(now)), Resolution::KeepRemote);
        assert_eq!(resolver.resolve(&local(None), &remote(now)), Resolution::KeepRemote);
    }

    #[test]
    fn closures_can_merge() {
        let resolver = FnResolver(|local: &RecordRow, remote: &RemoteRecord| {
            let mut merged = remote.payload.clone().unwrap_or_default();
            merged["local_name"] = local.payload["name"].clone();
            Resolution::Resolved(merged)
        });
        let now = Utc::now();
        let Resolution::Resolved(merged) = resolver.resolve(&local(Some(now)), &remote(now)) else {
            panic!("expected a merge");
        };
        assert_eq!(merged["name"], "Annie");
        assert_eq!(merged["local_name"], "Anna");
    }

    #[test]
    fn fixed_resolvers() {
        let now = Utc::now();
        assert_eq!(
            AcceptRemoteResolver.resolve(&local(Some(now)), &remote(now)),
            Resolution::KeepRemote
        );
        assert_eq!(
            AcceptLocalResolver.resolve(&local(Some(now)), &remote(now)),
            Resolution::KeepLocal
        );
    }
}
