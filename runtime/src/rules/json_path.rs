//! A small JSONPath subset used by source mappings.
//!
//! Supported: `$`, `.key`, `['key']`, `[n]`, `[*]`, `.*` and `..key`.
//! Matches are reported as JSON pointers in document order so that callers
//! can collect first and mutate afterwards.

use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DppError, DppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Index(usize),
    Wildcard,
    Descendant(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(raw: &str) -> DppResult<Self> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| DppError::config(format!("invalid json_path `{raw}`: {reason}"));

        let mut chars = trimmed.chars().peekable();
        if chars.next() != Some('$') {
            return Err(invalid("must start with `$`"));
        }

        let mut segments = Vec::new();
        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if chars.peek() == Some(&'.') {
                        chars.next();
                        let name = take_name(&mut chars);
                        if name.is_empty() {
                            return Err(invalid("`..` must be followed by a key"));
                        }
                        segments.push(Segment::Descendant(name));
                    } else if chars.peek() == Some(&'*') {
                        chars.next();
                        segments.push(Segment::Wildcard);
                    } else {
                        let name = take_name(&mut chars);
                        if name.is_empty() {
                            return Err(invalid("`.` must be followed by a key"));
                        }
                        segments.push(Segment::Child(name));
                    }
                }
                '[' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(invalid("unterminated `[`"));
                    }
                    segments.push(parse_bracket(inner.trim()).ok_or_else(|| {
                        invalid(&format!("unsupported selector `[{inner}]`"))
                    })?);
                }
                other => return Err(invalid(&format!("unexpected character `{other}`"))),
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// JSON pointers of every node the path selects, in document order,
    /// without duplicates.
    pub fn find_pointers(&self, root: &Value) -> Vec<String> {
        let mut found = Vec::new();
        walk(&self.segments, root, String::new(), &mut found);
        let mut seen = HashSet::new();
        found.retain(|pointer| seen.insert(pointer.clone()));
        found
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = DppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.raw
    }
}

fn take_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            name.push(c);
            chars.next();
        } else {
            break;
        }
    }
    name
}

fn parse_bracket(inner: &str) -> Option<Segment> {
    if inner == "*" {
        return Some(Segment::Wildcard);
    }
    if let Ok(index) = inner.parse::<usize>() {
        return Some(Segment::Index(index));
    }
    let quoted = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
    if quoted.is_empty() {
        return None;
    }
    Some(Segment::Child(quoted.to_string()))
}

pub(crate) fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn walk(segments: &[Segment], node: &Value, pointer: String, found: &mut Vec<String>) {
    let Some((segment, rest)) = segments.split_first() else {
        found.push(pointer);
        return;
    };

    match segment {
        Segment::Child(name) => {
            if let Some(child) = node.as_object().and_then(|map| map.get(name)) {
                walk(rest, child, format!("{pointer}/{}", escape_token(name)), found);
            }
        }
        Segment::Index(index) => {
            if let Some(child) = node.as_array().and_then(|items| items.get(*index)) {
                walk(rest, child, format!("{pointer}/{index}"), found);
            }
        }
        Segment::Wildcard => match node {
            Value::Object(map) => {
                for (key, child) in map {
                    walk(rest, child, format!("{pointer}/{}", escape_token(key)), found);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    walk(rest, child, format!("{pointer}/{index}"), found);
                }
            }
            _ => {}
        },
        Segment::Descendant(name) => {
            if let Some(child) = node.as_object().and_then(|map| map.get(name)) {
                walk(rest, child, format!("{pointer}/{}", escape_token(name)), found);
            }
            match node {
                Value::Object(map) => {
                    for (key, child) in map {
                        walk(segments, child, format!("{pointer}/{}", escape_token(key)), found);
                    }
                }
                Value::Array(items) => {
                    for (index, child) in items.iter().enumerate() {
                        walk(segments, child, format!("{pointer}/{index}"), found);
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Value {
        json!({
            "document_data": {
                "raw_data": {
                    "other_data": [
                        {"content": "a", "content_bbox": [1, 2, 3, 4]},
                        {"content": "b"},
                        {"content": "c", "content_bbox": [5, 6, 7, 8]}
                    ],
                    "table_data": [
                        {"cells": [{"bbox": [0, 0, 1, 1]}]}
                    ]
                }
            }
        })
    }

    #[test]
    fn child_and_wildcard_segments() {
        let path = JsonPath::parse("$.document_data.raw_data.other_data[*]").unwrap();
        assert_eq!(
            path.find_pointers(&sample()),
            vec![
                "/document_data/raw_data/other_data/0",
                "/document_data/raw_data/other_data/1",
                "/document_data/raw_data/other_data/2",
            ]
        );
    }

    #[test]
    fn index_and_quoted_segments() {
        let path = JsonPath::parse("$['document_data'].raw_data.other_data[2].content_bbox").unwrap();
        assert_eq!(
            path.find_pointers(&sample()),
            vec!["/document_data/raw_data/other_data/2/content_bbox"]
        );
    }

    #[test]
    fn descendant_finds_nested_keys() {
        let path = JsonPath::parse("$..bbox").unwrap();
        assert_eq!(
            path.find_pointers(&sample()),
            vec!["/document_data/raw_data/table_data/0/cells/0/bbox"]
        );
    }

    #[test]
    fn missing_paths_match_nothing() {
        let path = JsonPath::parse("$.document_data.segments[*]").unwrap();
        assert!(path.find_pointers(&sample()).is_empty());
    }

    #[test]
    fn malformed_paths_are_configuration_errors() {
        for raw in ["document_data", "$.", "$[", "$[-1]", "$..", "$.a!"] {
            let err = JsonPath::parse(raw).unwrap_err();
            assert!(matches!(err, DppError::Configuration(_)), "{raw}: {err}");
        }
    }
}
