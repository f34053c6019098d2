//! Slash-separated document paths.
//!
//! A [`DocPath`] addresses a value inside a nested document: each segment is
//! either a map key or a decimal sequence index (`"a/b/0/c"`). Empty segments
//! produced by leading, trailing or doubled slashes are dropped.
//!
//! Navigation and assignment here operate on the native [`Value`] form. The
//! document store materializes the CRDT into a `Value`, edits it with these
//! helpers, and writes the result back inside a single CRDT transaction.

use std::fmt;

use serde_json::{Map as JsonMap, Value};

use crate::error::{Result, TelepathyError};

/// A parsed, non-empty document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    /// Parse a path string, rejecting paths with no segments.
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        if segments.is_empty() {
            return Err(TelepathyError::EmptyPath);
        }
        Ok(Self { segments })
    }

    /// All segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The top-level key this path lives under.
    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    /// The final segment (the key or index being addressed).
    pub fn last(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    /// The path of the containing value, or `None` for top-level paths.
    pub fn parent(&self) -> Option<DocPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(DocPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Look up the value at this path.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(parse_index(segment)?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Assign `value` at this path, creating intermediate maps as needed.
    ///
    /// Fails with [`TelepathyError::PathConflict`] when an intermediate segment
    /// holds a scalar, or a sequence is addressed with a non-index segment.
    /// On error `root` is left untouched.
    pub fn assign(&self, root: &mut Value, value: Value) -> Result<()> {
        self.check_assignable(root)?;

        let mut current = root;
        let Some((last, intermediate)) = self.segments.split_last() else {
            return Err(TelepathyError::EmptyPath);
        };

        for segment in intermediate {
            current = match current {
                Value::Object(map) => {
                    let slot = map.entry(segment.clone()).or_insert(Value::Null);
                    if slot.is_null() {
                        *slot = Value::Object(JsonMap::new());
                    }
                    slot
                }
                Value::Array(items) => {
                    let index = self.index(segment)?;
                    if index >= items.len() {
                        items.resize(index + 1, Value::Null);
                    }
                    let slot = &mut items[index];
                    if slot.is_null() {
                        *slot = Value::Object(JsonMap::new());
                    }
                    slot
                }
                _ => return Err(self.conflict(segment)),
            };
        }

        match current {
            Value::Object(map) => {
                map.insert(last.clone(), value);
            }
            Value::Array(items) => {
                let index = self.index(last)?;
                if index >= items.len() {
                    items.resize(index, Value::Null);
                    items.push(value);
                } else {
                    items[index] = value;
                }
            }
            _ => return Err(self.conflict(last)),
        }
        Ok(())
    }

    /// The minimal nested object that holds `value` at this path.
    pub fn scaffold(&self, value: Value) -> Value {
        self.segments.iter().rev().fold(value, |inner, segment| {
            let mut map = JsonMap::new();
            map.insert(segment.clone(), inner);
            Value::Object(map)
        })
    }

    /// Walk the path without mutating, so a conflict is reported before any write.
    fn check_assignable(&self, root: &Value) -> Result<()> {
        let mut current = Some(root);
        for segment in &self.segments {
            let Some(node) = current else {
                // Missing intermediates are created as maps.
                return Ok(());
            };
            current = match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => items.get(self.index(segment)?),
                Value::Null => None,
                _ => return Err(self.conflict(segment)),
            };
        }
        Ok(())
    }

    fn index(&self, segment: &str) -> Result<usize> {
        parse_index(segment).ok_or_else(|| self.conflict(segment))
    }

    fn conflict(&self, segment: &str) -> TelepathyError {
        TelepathyError::PathConflict {
            path: self.to_string(),
            segment: segment.to_string(),
        }
    }
}

/// Parse a sequence index. Only plain decimal digits without a leading zero qualify.
pub(crate) fn parse_index(segment: &str) -> Option<usize> {
    let digits_only = !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
    if !digits_only || (segment.len() > 1 && segment.starts_with('0')) {
        return None;
    }
    segment.parse().ok()
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl std::str::FromStr for DocPath {
    type Err = TelepathyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_drops_empty_segments() {
        let path = DocPath::parse("/a//b/").unwrap();
        assert_eq!(path.segments(), &["a".to_string(), "b".to_string()]);
        assert_eq!(path.to_string(), "a/b");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(DocPath::parse(""), Err(TelepathyError::EmptyPath)));
        assert!(matches!(DocPath::parse("///"), Err(TelepathyError::EmptyPath)));
    }

    #[test]
    fn test_parent_and_last() {
        let path = DocPath::parse("a/b/c").unwrap();
        assert_eq!(path.first(), "a");
        assert_eq!(path.last(), "c");
        assert_eq!(path.parent().unwrap().to_string(), "a/b");
        assert!(DocPath::parse("a").unwrap().parent().is_none());
    }

    #[test]
    fn test_get_through_maps_and_arrays() {
        let doc = json!({"a": {"b": [10, {"c": "deep"}]}});
        let path = DocPath::parse("a/b/1/c").unwrap();
        assert_eq!(path.get(&doc), Some(&json!("deep")));

        assert_eq!(DocPath::parse("a/b/7").unwrap().get(&doc), None);
        assert_eq!(DocPath::parse("a/b/x").unwrap().get(&doc), None);
        assert_eq!(DocPath::parse("a/missing").unwrap().get(&doc), None);
    }

    #[test]
    fn test_assign_creates_intermediate_maps() {
        let mut doc = json!({});
        DocPath::parse("x/y/z")
            .unwrap()
            .assign(&mut doc, json!(1))
            .unwrap();
        assert_eq!(doc, json!({"x": {"y": {"z": 1}}}));
    }

    #[test]
    fn test_assign_into_array() {
        let mut doc = json!({"list": [1, 2]});
        let path = DocPath::parse("list/1").unwrap();
        path.assign(&mut doc, json!("two")).unwrap();
        assert_eq!(doc, json!({"list": [1, "two"]}));

        DocPath::parse("list/2")
            .unwrap()
            .assign(&mut doc, json!(3))
            .unwrap();
        assert_eq!(doc, json!({"list": [1, "two", 3]}));

        DocPath::parse("list/5")
            .unwrap()
            .assign(&mut doc, json!(6))
            .unwrap();
        assert_eq!(doc, json!({"list": [1, "two", 3, null, null, 6]}));
    }

    #[test]
    fn test_assign_through_scalar_conflicts() {
        let mut doc = json!({"name": "scalar"});
        let err = DocPath::parse("name/inner")
            .unwrap()
            .assign(&mut doc, json!(1))
            .unwrap_err();
        match err {
            TelepathyError::PathConflict { segment, .. } => assert_eq!(segment, "inner"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(doc, json!({"name": "scalar"}));
    }

    #[test]
    fn test_assign_non_index_into_array_conflicts() {
        let mut doc = json!({"list": [1, 2]});
        let result = DocPath::parse("list/key")
            .unwrap()
            .assign(&mut doc, json!(1));
        assert!(matches!(result, Err(TelepathyError::PathConflict { .. })));
        assert_eq!(doc, json!({"list": [1, 2]}));
    }

    #[test]
    fn test_index_segments_are_plain_digits() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("12"), Some(12));
        for segment in ["+1", "01", "-0", " 1", "1e0", ""] {
            assert_eq!(parse_index(segment), None, "segment {segment:?}");
        }

        let mut doc = json!({"list": [1, 2]});
        assert_eq!(DocPath::parse("list/+1").unwrap().get(&doc), None);
        assert_eq!(DocPath::parse("list/01").unwrap().get(&doc), None);

        let result = DocPath::parse("list/+1")
            .unwrap()
            .assign(&mut doc, json!(9));
        assert!(matches!(result, Err(TelepathyError::PathConflict { .. })));
        assert_eq!(doc, json!({"list": [1, 2]}));
    }

    #[test]
    fn test_scaffold() {
        let path = DocPath::parse("a/b").unwrap();
        assert_eq!(path.scaffold(json!([1])), json!({"a": {"b": [1]}}));
    }
}
