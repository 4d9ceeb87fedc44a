//! Record schema hook.
//!
//! The store does not understand record contents. Whatever it needs to
//! know (where the id lives, which fields hold references, how to compare
//! two snapshots) it asks a [`RecordSchema`].

use crate::error::{CoreError, CoreResult};
use crate::record::RecordKey;
use caresync_codec::rewrite::visit_strings;
use caresync_codec::{JsonPointer, PointerPattern};
use serde_json::Value;
use std::collections::HashMap;

/// Domain knowledge about record payloads.
pub trait RecordSchema: Send + Sync {
    /// Location of the record's own id inside its payload.
    fn id_pointer(&self, _record_type: &str) -> JsonPointer {
        JsonPointer::from_tokens(["id"])
    }

    /// Returns true if a string at `pointer` in a record of `record_type`
    /// is a reference to another record.
    fn is_reference_field(&self, record_type: &str, pointer: &JsonPointer) -> bool;

    /// Lists the references held by a payload as `(field, "<type>/<id>")`.
    fn references(&self, record_type: &str, payload: &Value) -> Vec<(JsonPointer, String)> {
        let mut found = Vec::new();
        visit_strings(payload, &JsonPointer::root(), &mut |pointer: &JsonPointer, value: &str| {
            if RecordKey::parse_reference(value).is_some()
                && self.is_reference_field(record_type, pointer)
            {
                found.push((pointer.clone(), value.to_string()));
            }
        });
        found
    }

    /// Normalizes a snapshot before diffing. The default is identity, so
    /// equality is structural.
    fn normalize(&self, _record_type: &str, payload: &Value) -> Value {
        payload.clone()
    }
}

/// Reads the id from a payload.
pub fn read_id(schema: &dyn RecordSchema, record_type: &str, payload: &Value) -> Option<String> {
    schema
        .id_pointer(record_type)
        .get(payload)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Writes the id into a payload.
pub fn write_id(
    schema: &dyn RecordSchema,
    record_type: &str,
    payload: &mut Value,
    external_id: &str,
) -> CoreResult<()> {
    let pointer = schema.id_pointer(record_type);
    let Some((parent, last)) = pointer.split_last() else {
        return Err(CoreError::invalid_operation("id pointer addresses the payload root"));
    };
    match parent.get_mut(payload) {
        Some(Value::Object(map)) => {
            map.insert(last.to_string(), Value::String(external_id.to_string()));
            Ok(())
        }
        _ => Err(CoreError::invalid_operation(format!(
            "{record_type} payload has no object at {parent}"
        ))),
    }
}

/// Treats every object member named `reference` as a reference field.
///
/// This matches payloads where references are written as
/// `{"reference": "Patient/123"}`.
#[derive(Debug, Clone, Default)]
pub struct NamedReferenceMembers;

impl RecordSchema for NamedReferenceMembers {
    fn is_reference_field(&self, _record_type: &str, pointer: &JsonPointer) -> bool {
        pointer
            .tokens()
            .last()
            .is_some_and(|token| token == "reference")
    }
}

/// Reference fields declared per record type as pointer patterns.
///
/// ```
/// use caresync_core::{DeclaredReferenceFields, RecordSchema};
/// use caresync_codec::JsonPointer;
///
/// let schema = DeclaredReferenceFields::new()
///     .with_field("Observation", "/subject/reference")
///     .unwrap()
///     .with_field("Observation", "/performer/*/reference")
///     .unwrap();
///
/// let ptr = JsonPointer::parse("/performer/1/reference").unwrap();
/// assert!(schema.is_reference_field("Observation", &ptr));
/// assert!(!schema.is_reference_field("Patient", &ptr));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeclaredReferenceFields {
    fields: HashMap<String, Vec<PointerPattern>>,
    id_pointers: HashMap<String, JsonPointer>,
}

impl DeclaredReferenceFields {
    /// Creates a schema with no reference fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a reference field pattern for a record type.
    pub fn with_field(mut self, record_type: &str, pattern: &str) -> CoreResult<Self> {
        let pattern = PointerPattern::parse(pattern)?;
        self.fields
            .entry(record_type.to_string())
            .or_default()
            .push(pattern);
        Ok(self)
    }

    /// Overrides the id location for a record type.
    pub fn with_id_pointer(mut self, record_type: &str, pointer: &str) -> CoreResult<Self> {
        self.id_pointers
            .insert(record_type.to_string(), JsonPointer::parse(pointer)?);
        Ok(self)
    }
}

impl RecordSchema for DeclaredReferenceFields {
    fn id_pointer(&self, record_type: &str) -> JsonPointer {
        self.id_pointers
            .get(record_type)
            .cloned()
            .unwrap_or_else(|| JsonPointer::from_tokens(["id"]))
    }

    fn is_reference_field(&self, record_type: &str, pointer: &JsonPointer) -> bool {
        self.fields
            .get(record_type)
            .is_some_and(|patterns| patterns.iter().any(|pattern| pattern.matches(pointer)))
    }
}
