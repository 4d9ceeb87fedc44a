//! Patch application.

use crate::error::{CodecError, CodecResult};
use crate::patch::{Patch, PatchOperation};
use crate::pointer::{parse_index, JsonPointer};
use serde_json::Value;

/// Applies a patch to a document, returning the patched copy.
///
/// The input document is left untouched; on error no partial result is
/// returned.
pub fn apply(patch: &Patch, doc: &Value) -> CodecResult<Value> {
    let mut out = doc.clone();
    apply_in_place(patch, &mut out)?;
    Ok(out)
}

/// Applies a patch to a document in place.
///
/// If an operation fails the document may be partially modified; callers
/// that need atomicity should use [`apply`].
pub fn apply_in_place(patch: &Patch, doc: &mut Value) -> CodecResult<()> {
    for op in patch {
        apply_operation(op, doc)?;
    }
    Ok(())
}

/// Applies a single operation in place.
pub fn apply_operation(op: &PatchOperation, doc: &mut Value) -> CodecResult<()> {
    match op {
        PatchOperation::Add { path, value } => add(doc, path, value.clone()),
        PatchOperation::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOperation::Replace { path, value } => replace(doc, path, value.clone()),
    }
}

fn add(doc: &mut Value, path: &JsonPointer, value: Value) -> CodecResult<()> {
    let Some((parent_path, last)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };
    let parent = parent_path
        .get_mut(doc)
        .ok_or_else(|| CodecError::invalid_parent(path.to_string(), "parent does not exist"))?;

    match parent {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(last)
                .ok_or_else(|| CodecError::invalid_pointer(path.to_string(), "bad array index"))?;
            if index > items.len() {
                return Err(CodecError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(CodecError::invalid_parent(
            path.to_string(),
            "parent is not a container",
        )),
    }
}

fn remove(doc: &mut Value, path: &JsonPointer) -> CodecResult<Value> {
    let Some((parent_path, last)) = path.split_last() else {
        return Err(CodecError::invalid_operation(
            "",
            "cannot remove the document root",
        ));
    };
    let parent = parent_path
        .get_mut(doc)
        .ok_or_else(|| CodecError::path_not_found(path.to_string()))?;

    match parent {
        Value::Object(map) => map
            .remove(last)
            .ok_or_else(|| CodecError::path_not_found(path.to_string())),
        Value::Array(items) => {
            let index = parse_index(last)
                .ok_or_else(|| CodecError::path_not_found(path.to_string()))?;
            if index >= items.len() {
                return Err(CodecError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len: items.len(),
                });
            }
            Ok(items.remove(index))
        }
        _ => Err(CodecError::path_not_found(path.to_string())),
    }
}

fn replace(doc: &mut Value, path: &JsonPointer, value: Value) -> CodecResult<()> {
    let target = path
        .get_mut(doc)
        .ok_or_else(|| CodecError::path_not_found(path.to_string()))?;
    *target = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ptr(s: &str) -> JsonPointer {
        JsonPointer::parse(s).unwrap()
    }

    #[test]
    fn add_replace_remove_on_objects() {
        let doc = json!({"id": "p1", "name": "Ann"});
        let patch: Patch = vec![
            PatchOperation::replace(ptr("/name"), json!("Anna")),
            PatchOperation::add(ptr("/gender"), json!("female")),
            PatchOperation::remove(ptr("/id")),
        ]
        .into();

        let out = apply(&patch, &doc).unwrap();
        assert_eq!(out, json!({"name": "Anna", "gender": "female"}));
        // Input untouched.
        assert_eq!(doc["id"], "p1");
    }

    #[test]
    fn array_insert_and_append() {
        let doc = json!({"tags": ["a", "c"]});
        let patch: Patch = vec![
            PatchOperation::add(ptr("/tags/1"), json!("b")),
            PatchOperation::add(ptr("/tags/-"), json!("d")),
            PatchOperation::remove(ptr("/tags/0")),
        ]
        .into();
        let out = apply(&patch, &doc).unwrap();
        assert_eq!(out, json!({"tags": ["b", "c", "d"]}));
    }

    #[test]
    fn root_replace() {
        let doc = json!({"a": 1});
        let patch: Patch = vec![PatchOperation::replace(JsonPointer::root(), json!([1]))].into();
        assert_eq!(apply(&patch, &doc).unwrap(), json!([1]));
    }

    #[test]
    fn errors_on_missing_targets() {
        let doc = json!({"a": {"b": 1}});
        let missing = Patch::from(vec![PatchOperation::replace(ptr("/x"), json!(1))]);
        assert!(matches!(
            apply(&missing, &doc),
            Err(CodecError::PathNotFound { .. })
        ));

        let orphan = Patch::from(vec![PatchOperation::add(ptr("/x/y"), json!(1))]);
        assert!(matches!(
            apply(&orphan, &doc),
            Err(CodecError::InvalidParent { .. })
        ));

        let oob = Patch::from(vec![PatchOperation::add(ptr("/a/b/0"), json!(1))]);
        assert!(apply(&oob, &doc).is_err());

        let root = Patch::from(vec![PatchOperation::remove(JsonPointer::root())]);
        assert!(apply(&root, &doc).is_err());
    }
}
