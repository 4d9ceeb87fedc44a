//! Property-based test generators using proptest.
//!
//! Provides strategies for payloads and local edit sequences that keep
//! the invariants the store relies on (object payloads, stable ids).

use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Strategy for given names, including the usual Ann family.
pub fn given_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => prop::sample::select(vec!["Ann", "Anna", "Annie", "Hannah"]).prop_map(str::to_string),
        1 => "[A-Z][a-z]{1,8}",
    ]
}

/// Strategy for arbitrary JSON values of bounded depth.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-100i64..100).prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(Value::String),
        prop::sample::select(vec!["Patient/p1", "Patient/p2", "Encounter/e1"])
            .prop_map(|s| json!(s)),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-e]", inner, 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Strategy for record payloads: JSON objects carrying `id`.
pub fn payload_strategy(id: &'static str) -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-e]", json_value_strategy(), 0..5).prop_map(move |entries| {
        let mut object: Map<String, Value> = entries.into_iter().collect();
        object.insert("id".into(), json!(id));
        Value::Object(object)
    })
}

/// Strategy for patient payloads with a fixed id.
pub fn patient_strategy(id: &'static str) -> impl Strategy<Value = Value> {
    (given_name_strategy(), any::<bool>(), prop::option::of(1900i32..2024)).prop_map(
        move |(given, active, born)| {
            let mut payload = json!({
                "resourceType": "Patient",
                "id": id,
                "name": [{"given": given}],
                "active": active,
            });
            if let Some(year) = born {
                payload["birthDate"] = json!(format!("{year}-01-01"));
            }
            payload
        },
    )
}

/// A local edit applied to one record.
#[derive(Debug, Clone)]
pub enum EditOperation {
    /// Replace the payload.
    Update(Value),
    /// Delete the record.
    Delete,
}

/// Strategy for one edit; deletes are rare.
pub fn edit_operation_strategy(id: &'static str) -> impl Strategy<Value = EditOperation> {
    prop_oneof![
        6 => payload_strategy(id).prop_map(EditOperation::Update),
        1 => Just(EditOperation::Delete),
    ]
}

/// Strategy for a sequence of edits. Nothing follows a delete.
pub fn edit_sequence_strategy(
    id: &'static str,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<EditOperation>> {
    prop::collection::vec(edit_operation_strategy(id), min_ops..max_ops).prop_map(|mut ops| {
        if let Some(first_delete) = ops.iter().position(|op| matches!(op, EditOperation::Delete)) {
            ops.truncate(first_delete + 1);
        }
        ops
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::with_temp_store;
    use caresync_codec::apply;
    use caresync_core::SquashedOperation;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn payloads_keep_their_id(payload in payload_strategy("p1")) {
            prop_assert_eq!(&payload["id"], &json!("p1"));
        }

        #[test]
        fn sequences_end_at_the_first_delete(ops in edit_sequence_strategy("p1", 1, 8)) {
            let deletes = ops.iter().filter(|op| matches!(op, EditOperation::Delete)).count();
            prop_assert!(deletes <= 1);
            if deletes == 1 {
                prop_assert!(matches!(ops.last(), Some(EditOperation::Delete)));
            }
        }

        #[test]
        fn squashed_insert_is_the_final_snapshot(
            initial in patient_strategy("p1"),
            ops in edit_sequence_strategy("p1", 0, 6),
        ) {
            with_temp_store(|store| {
                let row = store.create("Patient", initial.clone()).unwrap();
                let mut last = Some(initial.clone());
                for op in &ops {
                    match op {
                        EditOperation::Update(payload) => {
                            store.update("Patient", "p1", payload.clone()).unwrap();
                            last = Some(payload.clone());
                        }
                        EditOperation::Delete => {
                            store.delete("Patient", "p1").unwrap();
                            last = None;
                        }
                    }
                }
                let squashed = store.squashed(row.record_uuid).unwrap();
                match (last, squashed.map(|change| change.operation)) {
                    (Some(expected), Some(SquashedOperation::Insert(snapshot))) => {
                        assert_eq!(snapshot, expected);
                    }
                    (None, None | Some(SquashedOperation::Discard)) => {}
                    (last, other) => panic!("unexpected squash {other:?} for {last:?}"),
                }
            });
        }

        #[test]
        fn update_patches_reproduce_the_edit(a in payload_strategy("p1"), b in payload_strategy("p1")) {
            prop_assert_eq!(apply(&caresync_codec::diff(&a, &b), &a).unwrap(), b);
        }
    }
}
