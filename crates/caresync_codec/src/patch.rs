//! Patch document types (RFC 6902 subset).

use crate::error::{CodecError, CodecResult};
use crate::pointer::JsonPointer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a patch operation, without its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// `add`
    Add,
    /// `remove`
    Remove,
    /// `replace`
    Replace,
}

/// A single patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Adds a value (inserting into arrays, setting object members).
    Add {
        /// Target location.
        path: JsonPointer,
        /// Value to add.
        value: Value,
    },
    /// Removes the value at the target location.
    Remove {
        /// Target location.
        path: JsonPointer,
    },
    /// Replaces the value at the target location.
    Replace {
        /// Target location.
        path: JsonPointer,
        /// Replacement value.
        value: Value,
    },
}

impl PatchOperation {
    /// Creates an `add` operation.
    pub fn add(path: JsonPointer, value: Value) -> Self {
        Self::Add { path, value }
    }

    /// Creates a `remove` operation.
    pub fn remove(path: JsonPointer) -> Self {
        Self::Remove { path }
    }

    /// Creates a `replace` operation.
    pub fn replace(path: JsonPointer, value: Value) -> Self {
        Self::Replace { path, value }
    }

    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &JsonPointer {
        match self {
            Self::Add { path, .. } | Self::Remove { path } | Self::Replace { path, .. } => path,
        }
    }

    /// Returns the operand value, if the operation carries one.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Add { value, .. } | Self::Replace { value, .. } => Some(value),
            Self::Remove { .. } => None,
        }
    }

    /// Returns a mutable reference to the operand value.
    pub fn value_mut(&mut self) -> Option<&mut Value> {
        match self {
            Self::Add { value, .. } | Self::Replace { value, .. } => Some(value),
            Self::Remove { .. } => None,
        }
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Add { .. } => OpKind::Add,
            Self::Remove { .. } => OpKind::Remove,
            Self::Replace { .. } => OpKind::Replace,
        }
    }
}

/// An ordered list of patch operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Vec<PatchOperation>);

impl Patch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the operations in order.
    #[must_use]
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    /// Returns the operations mutably.
    pub fn operations_mut(&mut self) -> &mut Vec<PatchOperation> {
        &mut self.0
    }

    /// Consumes the patch, returning its operations.
    #[must_use]
    pub fn into_operations(self) -> Vec<PatchOperation> {
        self.0
    }

    /// Appends an operation.
    pub fn push(&mut self, op: PatchOperation) {
        self.0.push(op);
    }

    /// Returns the number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the patch has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes a patch from its JSON representation.
    pub fn from_json(value: &Value) -> CodecResult<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CodecError::malformed_patch(e.to_string()))
    }

    /// Encodes the patch to its JSON representation.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|op| {
                    let mut obj = serde_json::Map::new();
                    let name = match op.kind() {
                        OpKind::Add => "add",
                        OpKind::Remove => "remove",
                        OpKind::Replace => "replace",
                    };
                    obj.insert("op".into(), Value::String(name.into()));
                    obj.insert("path".into(), Value::String(op.path().to_string()));
                    if let Some(value) = op.value() {
                        obj.insert("value".into(), value.clone());
                    }
                    Value::Object(obj)
                })
                .collect(),
        )
    }
}

impl From<Vec<PatchOperation>> for Patch {
    fn from(ops: Vec<PatchOperation>) -> Self {
        Self(ops)
    }
}

impl FromIterator<PatchOperation> for Patch {
    fn from_iter<T: IntoIterator<Item = PatchOperation>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Patch {
    type Item = PatchOperation;
    type IntoIter = std::vec::IntoIter<PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = &'a PatchOperation;
    type IntoIter = std::slice::Iter<'a, PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
