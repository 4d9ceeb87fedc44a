//! Patch composition.
//!
//! [`merge`] combines two patches into one whose effect equals applying
//! them in sequence. The result keeps the shape [`crate::diff`] produces:
//! no operation path is a prefix of another.

use crate::apply::apply_operation;
use crate::error::{CodecError, CodecResult};
use crate::patch::{OpKind, Patch, PatchOperation};
use crate::pointer::JsonPointer;

/// Composes `first` and `second` into a single patch.
///
/// For patches produced by [`crate::diff`] (and for results of previous
/// merges) the guarantee is
/// `apply(merge(p1, p2), a) == apply(p2, apply(p1, a))`.
///
/// # Errors
///
/// Returns an error if `second` addresses a location that `first` has
/// removed, or if folding an operation into an earlier value fails.
pub fn merge(first: &Patch, second: &Patch) -> CodecResult<Patch> {
    let mut merged: Vec<PatchOperation> = Vec::with_capacity(first.len() + second.len());
    for op in first.operations().iter().chain(second.operations()) {
        fold(&mut merged, op.clone())?;
    }
    Ok(merged.into())
}

fn fold(merged: &mut Vec<PatchOperation>, op: PatchOperation) -> CodecResult<()> {
    let path = op.path().clone();

    // An earlier op wrote a whole subtree containing this path.
    if let Some(ancestor) = merged
        .iter_mut()
        .find(|earlier| earlier.path().is_ancestor_of(&path))
    {
        let relative = path
            .strip_prefix(ancestor.path())
            .unwrap_or_else(JsonPointer::root);
        let Some(value) = ancestor.value_mut() else {
            return Err(CodecError::invalid_operation(
                path.to_string(),
                "parent was removed by an earlier operation",
            ));
        };
        return apply_operation(&with_path(op, relative), value);
    }

    // This op overwrites anything written below it.
    merged.retain(|earlier| !path.is_ancestor_of(earlier.path()));

    let Some(pos) = merged.iter().position(|earlier| earlier.path() == &path) else {
        merged.push(op);
        return Ok(());
    };

    let combined = match (merged[pos].kind(), op) {
        (OpKind::Add, PatchOperation::Remove { .. }) => None,
        (OpKind::Add, PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. }) => {
            Some(PatchOperation::add(path, value))
        }
        (OpKind::Replace, PatchOperation::Remove { .. }) => Some(PatchOperation::remove(path)),
        (
            OpKind::Replace,
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. },
        ) => Some(PatchOperation::replace(path, value)),
        (OpKind::Remove, PatchOperation::Add { value, .. }) => {
            Some(PatchOperation::replace(path, value))
        }
        (OpKind::Remove, _) => {
            return Err(CodecError::invalid_operation(
                path.to_string(),
                "target was removed by an earlier operation",
            ));
        }
    };

    match combined {
        Some(op) => merged[pos] = op,
        None => {
            merged.remove(pos);
        }
    }
    Ok(())
}

fn with_path(op: PatchOperation, path: JsonPointer) -> PatchOperation {
    match op {
        PatchOperation::Add { value, .. } => PatchOperation::add(path, value),
        PatchOperation::Remove { .. } => PatchOperation::remove(path),
        PatchOperation::Replace { value, .. } => PatchOperation::replace(path, value),
    }
}
