//! # CareSync Codec
//!
//! JSON patch support for CareSync record snapshots.
//!
//! Records are stored as JSON documents. Local edits are recorded as
//! RFC 6902 patches (`add`, `remove` and `replace`, addressed by RFC 6901
//! pointers) so that a sequence of edits can be squashed into one change
//! and shipped to the server.
//!
//! - [`diff`] computes a patch between two snapshots
//! - [`apply`] applies a patch to a snapshot
//! - [`merge`] composes two patches into one
//! - [`rewrite`] rewrites reference strings in documents and patches
//!
//! ## Usage
//!
//! ```
//! use caresync_codec::{apply, diff, merge};
//! use serde_json::json;
//!
//! let ann = json!({"name": [{"given": "Ann"}]});
//! let anna = json!({"name": [{"given": "Anna"}]});
//! let annie = json!({"name": [{"given": "Annie"}]});
//!
//! let squashed = merge(&diff(&ann, &anna), &diff(&anna, &annie)).unwrap();
//! assert_eq!(squashed.len(), 1);
//! assert_eq!(apply(&squashed, &ann).unwrap(), annie);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod diff;
mod error;
mod merge;
mod patch;
mod pointer;
pub mod rewrite;

pub use apply::{apply, apply_in_place, apply_operation};
pub use diff::diff;
pub use error::{CodecError, CodecResult};
pub use merge::merge;
pub use patch::{OpKind, Patch, PatchOperation};
pub use pointer::JsonPointer;
pub use rewrite::{PointerPattern, ReferenceRewriteMode};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map, Value};

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (0i64..4).prop_map(|n| json!(n)),
            prop::sample::select(vec!["Ann", "Anna", "Annie", "Patient/1"]).prop_map(|s| json!(s)),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(
                    prop::sample::select(vec!["a", "b", "c", "d"]),
                    inner,
                    0..4
                )
                .prop_map(|entries| {
                    Value::Object(
                        entries
                            .into_iter()
                            .map(|(k, v)| (k.to_string(), v))
                            .collect::<Map<String, Value>>(),
                    )
                }),
            ]
        })
    }

    fn no_prefix_paths(patch: &Patch) -> bool {
        let ops = patch.operations();
        ops.iter().enumerate().all(|(i, a)| {
            ops.iter()
                .enumerate()
                .all(|(j, b)| i == j || !a.path().is_prefix_of(b.path()))
        })
    }

    proptest! {
        #[test]
        fn diff_then_apply_reproduces_target(a in arb_json(), b in arb_json()) {
            let patch = diff(&a, &b);
            prop_assert_eq!(apply(&patch, &a).unwrap(), b);
            prop_assert!(no_prefix_paths(&patch));
        }

        #[test]
        fn patch_json_form_is_stable(a in arb_json(), b in arb_json()) {
            let patch = diff(&a, &b);
            let decoded = Patch::from_json(&patch.to_json()).unwrap();
            prop_assert_eq!(decoded, patch);
        }

        #[test]
        fn merge_equals_sequential_application(a in arb_json(), b in arb_json(), c in arb_json()) {
            let p1 = diff(&a, &b);
            let p2 = diff(&b, &c);
            let merged = merge(&p1, &p2).unwrap();
            prop_assert_eq!(apply(&merged, &a).unwrap(), c);
            prop_assert!(no_prefix_paths(&merged));
        }

        #[test]
        fn merge_is_associative_under_application(
            a in arb_json(),
            b in arb_json(),
            c in arb_json(),
            d in arb_json(),
        ) {
            let p1 = diff(&a, &b);
            let p2 = diff(&b, &c);
            let p3 = diff(&c, &d);
            let left = merge(&merge(&p1, &p2).unwrap(), &p3).unwrap();
            let right = merge(&p1, &merge(&p2, &p3).unwrap()).unwrap();
            prop_assert_eq!(apply(&left, &a).unwrap(), d.clone());
            prop_assert_eq!(apply(&right, &a).unwrap(), d);
        }
    }
}
