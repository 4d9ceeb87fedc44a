//! Reference index: which records point at which `"<type>/<id>"`.

use crate::types::RecordUuid;
use caresync_codec::JsonPointer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One reference held by a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceIndexEntry {
    /// The record holding the reference.
    pub referrer_uuid: RecordUuid,
    /// Where in the referrer's payload the reference lives.
    pub referrer_field: JsonPointer,
    /// The reference value at index time.
    pub target_reference: String,
}

/// Index from reference targets to referrers.
///
/// Derived state: recomputed from the payload whenever a record row is
/// written and rebuilt on journal replay.
#[derive(Debug, Default, Clone)]
pub struct ReferenceIndex {
    by_target: HashMap<String, BTreeSet<(RecordUuid, JsonPointer)>>,
    by_referrer: HashMap<RecordUuid, Vec<(JsonPointer, String)>>,
}

impl ReferenceIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the references held by `referrer`.
    pub fn reindex(&mut self, referrer: RecordUuid, references: Vec<(JsonPointer, String)>) {
        self.remove(referrer);
        if references.is_empty() {
            return;
        }
        for (field, target) in &references {
            self.by_target
                .entry(target.clone())
                .or_default()
                .insert((referrer, field.clone()));
        }
        self.by_referrer.insert(referrer, references);
    }

    /// Drops every reference held by `referrer`.
    pub fn remove(&mut self, referrer: RecordUuid) {
        let Some(old) = self.by_referrer.remove(&referrer) else {
            return;
        };
        for (field, target) in old {
            if let Some(set) = self.by_target.get_mut(&target) {
                set.remove(&(referrer, field));
                if set.is_empty() {
                    self.by_target.remove(&target);
                }
            }
        }
    }

    /// Returns every reference to `target`, ordered by referrer.
    #[must_use]
    pub fn referrers(&self, target: &str) -> Vec<ReferenceIndexEntry> {
        self.by_target
            .get(target)
            .map(|set| {
                set.iter()
                    .map(|(uuid, field)| ReferenceIndexEntry {
                        referrer_uuid: *uuid,
                        referrer_field: field.clone(),
                        target_reference: target.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the references held by `referrer`.
    #[must_use]
    pub fn references_of(&self, referrer: RecordUuid) -> &[(JsonPointer, String)] {
        self.by_referrer
            .get(&referrer)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the number of indexed references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_referrer.values().map(Vec::len).sum()
    }

    /// Returns true if no references are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_referrer.is_empty()
    }
}
