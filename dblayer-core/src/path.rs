//! Dotted attribute paths and nested-document navigation.
//!
//! Paths address nested document members with dots (`"a.b.c"`). Array indexing
//! (`"a[0]"`) is not supported: array membership goes through the array-element
//! conditions and the array mutation operations instead. The reserved form `size(path)`
//! is parsed by [`AttributeRef`] and evaluates to the length of the array at `path`.

use serde_json::{Map, Value};
use std::fmt;

use crate::error::{DatabaseError, DatabaseResult};

/// A validated, non-empty sequence of attribute names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath {
    raw: String,
    segments: Vec<String>,
}

fn invalid(raw: &str, reason: &str) -> DatabaseError {
    DatabaseError::BadRequest(format!("invalid attribute path {raw:?}: {reason}"))
}

fn validate_segment(raw: &str, segment: &str) -> DatabaseResult<()> {
    if segment.is_empty() {
        return Err(invalid(
            raw,
            "empty segment (leading, trailing or consecutive dots)",
        ));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| c.is_control() || matches!(c, '"' | '\'' | '`'))
    {
        return Err(invalid(raw, &format!("segment {segment:?} contains {c:?}")));
    }
    Ok(())
}

impl AttributePath {
    /// Parses and validates a dotted path.
    pub fn parse(raw: &str) -> DatabaseResult<Self> {
        if raw.contains('[') || raw.contains(']') {
            return Err(invalid(
                raw,
                "array indexing is not supported, use the array element conditions \
                 (array_element_exists / array_element_not_exists) or the array element \
                 operations instead",
            ));
        }

        let segments = raw
            .split('.')
            .map(|segment| {
                validate_segment(raw, segment)?;
                Ok(segment.to_string())
            })
            .collect::<DatabaseResult<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Parses a top-level attribute name, which must be a single segment.
    pub fn parse_top_level(raw: &str) -> DatabaseResult<Self> {
        let path = Self::parse(raw)?;
        if path.is_nested() {
            return Err(invalid(raw, "a top-level attribute name cannot contain dots"));
        }
        Ok(path)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// The terminal segment.
    pub fn leaf(&self) -> &str {
        // Parsing guarantees at least one segment.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent_segments(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// Reads the value at this path. Missing members and non-object intermediates are
    /// reported as `None`.
    pub fn get<'a>(&self, document: &'a Map<String, Value>) -> Option<&'a Value> {
        fn descend<'a>(container: &'a Map<String, Value>, segments: &[String]) -> Option<&'a Value> {
            let (head, rest) = segments.split_first()?;
            let value = container.get(head)?;
            if rest.is_empty() {
                Some(value)
            } else {
                descend(value.as_object()?, rest)
            }
        }

        descend(document, &self.segments)
    }

    /// Mutable access to the value at this path, without creating structure.
    pub fn get_mut<'a>(&self, document: &'a mut Map<String, Value>) -> Option<&'a mut Value> {
        let (leaf, parents) = self.segments.split_last()?;
        let mut current = document;
        for segment in parents {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.get_mut(leaf)
    }

    /// Returns the object that directly contains the terminal segment, if it exists.
    pub fn container<'a>(&self, document: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
        self.parent_segments()
            .iter()
            .try_fold(document, |current, segment| current.get(segment)?.as_object())
    }

    /// Returns the object that directly contains the terminal segment, creating empty
    /// objects for missing intermediates.
    ///
    /// Fails with `BadRequest` when an existing intermediate is not an object.
    pub fn container_mut<'a>(
        &self,
        document: &'a mut Map<String, Value>,
    ) -> DatabaseResult<&'a mut Map<String, Value>> {
        let mut current = document;
        for segment in self.parent_segments() {
            current = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .ok_or_else(|| {
                    invalid(
                        &self.raw,
                        &format!("intermediate attribute {segment:?} is not an object"),
                    )
                })?;
        }
        Ok(current)
    }

    /// Sets or replaces the value at this path, creating intermediates as needed.
    pub fn set(&self, document: &mut Map<String, Value>, value: Value) -> DatabaseResult<()> {
        self.container_mut(document)?
            .insert(self.leaf().to_string(), value);
        Ok(())
    }

    /// Number of leading segments that resolve to existing objects, usable as parents.
    ///
    /// A result equal to `parent_segments().len()` means the container already exists.
    pub fn existing_depth(&self, document: &Map<String, Value>) -> usize {
        let mut current = document;
        let mut depth = 0;
        for segment in self.parent_segments() {
            match current.get(segment).and_then(Value::as_object) {
                Some(next) => {
                    current = next;
                    depth += 1;
                }
                None => break,
            }
        }
        depth
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// An attribute reference inside a condition: a plain path or `size(path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeRef {
    Path(AttributePath),
    Size(AttributePath),
}

impl AttributeRef {
    pub fn parse(raw: &str) -> DatabaseResult<Self> {
        let trimmed = raw.trim();
        match trimmed
            .strip_prefix("size(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(inner) => Ok(AttributeRef::Size(AttributePath::parse(inner.trim())?)),
            None => Ok(AttributeRef::Path(AttributePath::parse(raw)?)),
        }
    }

    pub fn path(&self) -> &AttributePath {
        match self {
            AttributeRef::Path(path) | AttributeRef::Size(path) => path,
        }
    }

    pub fn is_size(&self) -> bool {
        matches!(self, AttributeRef::Size(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[rstest]
    #[case::single("a", &["a"])]
    #[case::nested("a.b.c", &["a", "b", "c"])]
    #[case::unicode("größe.wert", &["größe", "wert"])]
    #[case::parentheses("fn(x)", &["fn(x)"])]
    fn parses_valid_paths(#[case] raw: &str, #[case] segments: &[&str]) {
        let path = AttributePath::parse(raw).unwrap();
        assert_eq!(path.segments(), segments);
        assert_eq!(path.as_str(), raw);
    }

    #[rstest]
    #[case::empty("")]
    #[case::leading_dot(".a")]
    #[case::trailing_dot("a.")]
    #[case::double_dot("a..b")]
    #[case::indexing("a[0]")]
    #[case::closing_bracket("a]")]
    #[case::quote("a.\"b\"")]
    #[case::single_quote("a'b")]
    #[case::backtick("a`b")]
    #[case::control("a\nb")]
    fn rejects_invalid_paths(#[case] raw: &str) {
        let err = AttributePath::parse(raw).unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[test]
    fn indexing_error_points_to_array_conditions() {
        let err = AttributePath::parse("tags[1]").unwrap_err();
        assert!(err.message().contains("tags[1]"));
        assert!(err.message().contains("array_element_exists"));
    }

    #[test]
    fn reads_nested_values_without_creating_structure() {
        let document = doc(json!({ "a": { "b": { "c": 1 } }, "x": 5 }));

        assert_eq!(AttributePath::parse("a.b.c").unwrap().get(&document), Some(&json!(1)));
        assert_eq!(AttributePath::parse("a.z.c").unwrap().get(&document), None);
        assert_eq!(AttributePath::parse("x.y").unwrap().get(&document), None);
    }

    #[test]
    fn writes_create_missing_intermediates() {
        let mut document = doc(json!({ "a": { "keep": true } }));
        AttributePath::parse("a.b.c")
            .unwrap()
            .set(&mut document, json!([1]))
            .unwrap();

        assert_eq!(
            Value::Object(document),
            json!({ "a": { "keep": true, "b": { "c": [1] } } })
        );
    }

    #[test]
    fn writes_through_scalars_are_rejected() {
        let mut document = doc(json!({ "a": 3 }));
        let err = AttributePath::parse("a.b")
            .unwrap()
            .set(&mut document, json!(1))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::BadRequest(_)));
    }

    #[test]
    fn existing_depth_counts_object_ancestors() {
        let document = doc(json!({ "a": { "b": 1 } }));
        assert_eq!(AttributePath::parse("a.b.c.d").unwrap().existing_depth(&document), 1);
        assert_eq!(AttributePath::parse("a.x").unwrap().existing_depth(&document), 1);
        assert_eq!(AttributePath::parse("z").unwrap().existing_depth(&document), 0);
    }

    #[test]
    fn parses_size_references() {
        assert_eq!(
            AttributeRef::parse("size(a.list)").unwrap(),
            AttributeRef::Size(AttributePath::parse("a.list").unwrap())
        );
        assert!(!AttributeRef::parse("sizes").unwrap().is_size());
        assert!(AttributeRef::parse("size()").is_err());
    }
}
