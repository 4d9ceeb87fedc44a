//! Reference rewriting inside documents and patches.
//!
//! When a server assigns a new identifier to a record, every string that
//! referred to the old identifier has to change. The functions here walk
//! the string leaves of a document (or of a patch's operand values),
//! compute each leaf's absolute pointer, and replace the leaf when it
//! equals the old reference and the caller's filter accepts the location.

use crate::error::{CodecError, CodecResult};
use crate::patch::Patch;
use crate::pointer::JsonPointer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which string values a reference rewrite may touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceRewriteMode {
    /// Only values at fields the schema declares as references.
    #[default]
    IndexedFields,
    /// Any string value equal to the old reference, wherever it occurs.
    AnyMatchingValue,
}

impl ReferenceRewriteMode {
    /// Returns true if a value at `pointer` may be rewritten.
    ///
    /// `is_reference_field` is consulted only in
    /// [`ReferenceRewriteMode::IndexedFields`].
    pub fn accepts(self, pointer: &JsonPointer, is_reference_field: impl Fn(&JsonPointer) -> bool) -> bool {
        match self {
            Self::IndexedFields => is_reference_field(pointer),
            Self::AnyMatchingValue => true,
        }
    }
}

/// A pointer pattern in which a `*` token matches any single token.
///
/// `/subject/reference` matches only itself; `/performer/*/reference`
/// matches `/performer/0/reference`, `/performer/1/reference` and so on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointerPattern {
    tokens: Vec<String>,
}

impl PointerPattern {
    /// Wildcard token.
    pub const WILDCARD: &'static str = "*";

    /// Parses a pattern using pointer syntax.
    pub fn parse(text: &str) -> CodecResult<Self> {
        let pointer = JsonPointer::parse(text)?;
        if pointer.is_root() {
            return Err(CodecError::invalid_pointer(
                text,
                "a reference pattern cannot address the document root",
            ));
        }
        Ok(Self {
            tokens: pointer.tokens().to_vec(),
        })
    }

    /// Returns true if `pointer` matches this pattern.
    #[must_use]
    pub fn matches(&self, pointer: &JsonPointer) -> bool {
        let tokens = pointer.tokens();
        tokens.len() == self.tokens.len()
            && self
                .tokens
                .iter()
                .zip(tokens)
                .all(|(pat, tok)| pat == Self::WILDCARD || pat == tok)
    }
}

impl fmt::Display for PointerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", JsonPointer::from_tokens(self.tokens.iter().cloned()))
    }
}

/// Visits every string leaf of `value`, whose own location is `base`.
pub fn visit_strings<F>(value: &Value, base: &JsonPointer, visit: &mut F)
where
    F: FnMut(&JsonPointer, &str),
{
    match value {
        Value::String(s) => visit(base, s),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                visit_strings(item, &base.child(index.to_string()), visit);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                visit_strings(item, &base.child(key.as_str()), visit);
            }
        }
        _ => {}
    }
}

/// Replaces string leaves equal to `old` with `new`.
///
/// `base` is the absolute location of `value` and `accept` decides, per
/// absolute leaf pointer, whether the leaf may change. Returns the number
/// of leaves rewritten.
pub fn rewrite_value<F>(value: &mut Value, base: &JsonPointer, old: &str, new: &str, accept: &F) -> usize
where
    F: Fn(&JsonPointer) -> bool,
{
    match value {
        Value::String(s) => {
            if s == old && accept(base) {
                *s = new.to_string();
                1
            } else {
                0
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .enumerate()
            .map(|(index, item)| rewrite_value(item, &base.child(index.to_string()), old, new, accept))
            .sum(),
        Value::Object(map) => map
            .iter_mut()
            .map(|(key, item)| rewrite_value(item, &base.child(key.as_str()), old, new, accept))
            .sum(),
        _ => 0,
    }
}

/// Rewrites references inside a whole document.
pub fn rewrite_document<F>(doc: &mut Value, old: &str, new: &str, accept: &F) -> usize
where
    F: Fn(&JsonPointer) -> bool,
{
    rewrite_value(doc, &JsonPointer::root(), old, new, accept)
}

/// Rewrites references inside the operand values of a patch.
///
/// Each operand is walked with the operation's path as its base, so the
/// filter sees the same absolute pointers it would see on the patched
/// document.
pub fn rewrite_patch<F>(patch: &mut Patch, old: &str, new: &str, accept: &F) -> usize
where
    F: Fn(&JsonPointer) -> bool,
{
    let mut count = 0;
    for op in patch.operations_mut() {
        let base = op.path().clone();
        if let Some(value) = op.value_mut() {
            count += rewrite_value(value, &base, old, new, accept);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchOperation;
    use serde_json::json;

    fn patterns(list: &[&str]) -> Vec<PointerPattern> {
        list.iter().map(|p| PointerPattern::parse(p).unwrap()).collect()
    }

    #[test]
    fn pattern_matching() {
        let pat = PointerPattern::parse("/performer/*/reference").unwrap();
        assert!(pat.matches(&JsonPointer::parse("/performer/3/reference").unwrap()));
        assert!(!pat.matches(&JsonPointer::parse("/performer/3/display").unwrap()));
        assert!(!pat.matches(&JsonPointer::parse("/performer/reference").unwrap()));
        assert_eq!(pat.to_string(), "/performer/*/reference");
        assert!(PointerPattern::parse("").is_err());
    }

    #[test]
    fn rewrites_only_declared_fields() {
        let pats = patterns(&["/subject/reference"]);
        let accept = |p: &JsonPointer| {
            ReferenceRewriteMode::IndexedFields.accepts(p, |p| pats.iter().any(|pat| pat.matches(p)))
        };
        let mut doc = json!({
            "subject": {"reference": "Patient/tmp-1"},
            "note": "Patient/tmp-1"
        });
        let n = rewrite_document(&mut doc, "Patient/tmp-1", "Patient/42", &accept);
        assert_eq!(n, 1);
        assert_eq!(doc["subject"]["reference"], "Patient/42");
        assert_eq!(doc["note"], "Patient/tmp-1");
    }

    #[test]
    fn any_matching_value_mode() {
        let accept = |p: &JsonPointer| ReferenceRewriteMode::AnyMatchingValue.accepts(p, |_| false);
        let mut doc = json!({"a": ["Patient/tmp-1", {"b": "Patient/tmp-1"}], "c": "x"});
        assert_eq!(rewrite_document(&mut doc, "Patient/tmp-1", "Patient/42", &accept), 2);
        assert_eq!(doc, json!({"a": ["Patient/42", {"b": "Patient/42"}], "c": "x"}));
    }

    #[test]
    fn rewrites_patch_operands_with_absolute_paths() {
        let pats = patterns(&["/performer/*/reference"]);
        let accept = |p: &JsonPointer| pats.iter().any(|pat| pat.matches(p));
        let mut patch = Patch::from(vec![
            PatchOperation::add(
                JsonPointer::parse("/performer").unwrap(),
                json!([{"reference": "Practitioner/tmp"}]),
            ),
            PatchOperation::replace(
                JsonPointer::parse("/performer/0/display").unwrap(),
                json!("Practitioner/tmp"),
            ),
        ]);
        assert_eq!(rewrite_patch(&mut patch, "Practitioner/tmp", "Practitioner/9", &accept), 1);
        assert_eq!(
            patch.operations()[0].value(),
            Some(&json!([{"reference": "Practitioner/9"}]))
        );
    }

    #[test]
    fn visits_all_strings() {
        let doc = json!({"a": {"b": "x"}, "c": [1, "y"]});
        let mut seen = Vec::new();
        visit_strings(&doc, &JsonPointer::root(), &mut |p: &JsonPointer, s: &str| seen.push((p.to_string(), s.to_string())));
        seen.sort();
        assert_eq!(
            seen,
            vec![("/a/b".to_string(), "x".to_string()), ("/c/1".to_string(), "y".to_string())]
        );
    }
}
