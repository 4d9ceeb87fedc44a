//! Structural diff between two snapshots.
//!
//! The produced patches have two properties the merge relies on:
//!
//! - No operation path is a prefix of another operation path in the same
//!   patch (the paths form an antichain).
//! - Array elements are never inserted or removed by index. Arrays of
//!   equal length are diffed element-wise; arrays whose length changes are
//!   replaced as a whole. Paths therefore stay stable across operations.

use crate::patch::{Patch, PatchOperation};
use crate::pointer::JsonPointer;
use serde_json::Value;

/// Computes a patch that transforms `source` into `target`.
///
/// Returns an empty patch if the documents are structurally equal.
#[must_use]
pub fn diff(source: &Value, target: &Value) -> Patch {
    let mut patch = Patch::new();
    diff_into(&JsonPointer::root(), source, target, &mut patch);
    patch
}

fn diff_into(path: &JsonPointer, source: &Value, target: &Value, out: &mut Patch) {
    if source == target {
        return;
    }

    match (source, target) {
        (Value::Object(src), Value::Object(tgt)) => {
            for key in src.keys() {
                if !tgt.contains_key(key) {
                    out.push(PatchOperation::remove(path.child(key.as_str())));
                }
            }
            for (key, tgt_value) in tgt {
                match src.get(key) {
                    Some(src_value) => {
                        diff_into(&path.child(key.as_str()), src_value, tgt_value, out);
                    }
                    None => {
                        out.push(PatchOperation::add(
                            path.child(key.as_str()),
                            tgt_value.clone(),
                        ));
                    }
                }
            }
        }
        (Value::Array(src), Value::Array(tgt)) if src.len() == tgt.len() => {
            for (index, (s, t)) in src.iter().zip(tgt).enumerate() {
                diff_into(&path.child(index.to_string()), s, t, out);
            }
        }
        _ => out.push(PatchOperation::replace(path.clone(), target.clone())),
    }
}
