// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Path expressions over JSON documents
//!
//! A small JMESPath-like language used by column definitions:
//!
//! ```text
//! .metadata.name                         field access
//! metadata.labels."app.kubernetes.io/name"   quoted key
//! .metadata.labels["team"]              bracketed key
//! .spec.containers[0].image             index (negative counts from the end)
//! .spec.containers[].name               wildcard, one value per element
//! .status.conditions[?type=='Ready'].status   filter by equality
//! .spec.taints[?effect]                 filter by existence
//! .metadata.labels{}                    object entries as {"key": k, "value": v}
//! @.image                               relative to the current expansion element
//! ```
//!
//! Evaluation never fails: a missing field yields no values and a type
//! mismatch (indexing an object, accessing a field on a string) yields no
//! values plus a [`Mismatch`] diagnostic. Explicit JSON `null` is treated as
//! absent.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde_json::{Value, json};

use crate::error::ConfigurationError;

/// One step of a path.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Index(i64),
    Wildcard,
    Filter(Filter),
    Entries,
}

/// `[?steps]`, `[?steps == literal]` or `[?steps != literal]`
#[derive(Debug, Clone, PartialEq)]
struct Filter {
    steps: Vec<Segment>,
    comparison: Option<(CompareOp, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    source: String,
    relative: bool,
    segments: Vec<Segment>,
}

/// A type mismatch encountered during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Path prefix at which the mismatch happened
    pub at: String,
    pub expected: &'static str,
    pub found: &'static str,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {} at `{}`, found {}",
            self.expected, self.at, self.found
        )
    }
}

/// Result of evaluating a path against a document. Matches borrow from the
/// document except for values built by `{}`.
#[derive(Debug, Default)]
pub struct Evaluation<'a> {
    pub matches: Vec<Cow<'a, Value>>,
    pub mismatches: Vec<Mismatch>,
}

impl JsonPath {
    pub fn parse(source: &str) -> Result<Self, ConfigurationError> {
        PathParser::new(source).parse()
    }

    /// Whether the path starts with `@` and is evaluated against an
    /// expansion element rather than the document
    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the path can yield more than one value
    pub fn is_multi_valued(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Wildcard | Segment::Filter(_) | Segment::Entries))
    }

    /// Evaluate against `root`, which is the document for absolute paths and
    /// the expansion element for relative ones
    pub fn evaluate<'a>(&self, root: &'a Value) -> Evaluation<'a> {
        let mut eval = Evaluation::default();
        if root.is_null() {
            return eval;
        }

        let mut current = vec![Cow::Borrowed(root)];
        let mut prefix = if self.relative { "@".to_string() } else { String::new() };

        for segment in &self.segments {
            prefix.push_str(&segment.to_string());
            let mut next = Vec::new();
            for value in current {
                match value {
                    Cow::Borrowed(value) => {
                        step(segment, value, &prefix, &mut next, &mut eval.mismatches)
                    }
                    Cow::Owned(value) => {
                        let mut derived = Vec::new();
                        step(segment, &value, &prefix, &mut derived, &mut eval.mismatches);
                        next.extend(derived.into_iter().map(|v| Cow::Owned(v.into_owned())));
                    }
                }
            }
            if next.is_empty() {
                return eval;
            }
            current = next;
        }

        eval.matches = current;
        eval
    }
}

/// Apply one segment to one value
fn step<'a>(
    segment: &Segment,
    value: &'a Value,
    prefix: &str,
    out: &mut Vec<Cow<'a, Value>>,
    mismatches: &mut Vec<Mismatch>,
) {
    let mut mismatch = |expected: &'static str| {
        mismatches.push(Mismatch {
            at: prefix.to_string(),
            expected,
            found: type_name(value),
        })
    };

    match segment {
        Segment::Field(name) => match value {
            Value::Object(map) => {
                out.extend(map.get(name).filter(|v| !v.is_null()).map(Cow::Borrowed))
            }
            _ => mismatch("object"),
        },
        Segment::Index(index) => match value {
            Value::Array(items) => {
                out.extend(
                    resolve_index(items, *index)
                        .filter(|v| !v.is_null())
                        .map(Cow::Borrowed),
                );
            }
            _ => mismatch("array"),
        },
        Segment::Wildcard => match value {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Array(inner) => out.extend(
                            inner.iter().filter(|v| !v.is_null()).map(Cow::Borrowed),
                        ),
                        Value::Null => {}
                        other => out.push(Cow::Borrowed(other)),
                    }
                }
            }
            _ => mismatch("array"),
        },
        // Only objects have fields to test
        Segment::Filter(filter) => match value {
            Value::Array(items) => out.extend(
                items
                    .iter()
                    .filter(|item| item.is_object() && filter.matches(item))
                    .map(Cow::Borrowed),
            ),
            _ => mismatch("array"),
        },
        Segment::Entries => match value {
            Value::Object(map) => out.extend(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(key, value)| Cow::Owned(json!({"key": key, "value": value}))),
            ),
            _ => mismatch("object"),
        },
    }
}

fn resolve_index(items: &[Value], index: i64) -> Option<&Value> {
    let len = items.len() as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 {
        return None;
    }
    items.get(idx as usize)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Filter {
    fn matches(&self, element: &Value) -> bool {
        let mut current = Some(element);
        for segment in &self.steps {
            current = current.and_then(|v| match (segment, v) {
                (Segment::Field(name), Value::Object(map)) => map.get(name),
                (Segment::Index(i), Value::Array(items)) => resolve_index(items, *i),
                _ => None,
            });
        }
        let found = current.filter(|v| !v.is_null());

        match &self.comparison {
            None => found.is_some(),
            Some((op, literal)) => {
                let equal = match found {
                    Some(v) => values_equal(v, literal),
                    None => literal.is_null(),
                };
                match op {
                    CompareOp::Eq => equal,
                    CompareOp::Ne => !equal,
                }
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) if is_plain_identifier(name) => write!(f, ".{}", name),
            Segment::Field(name) => write!(f, ".{:?}", name),
            Segment::Index(i) => write!(f, "[{}]", i),
            Segment::Wildcard => f.write_str("[]"),
            Segment::Entries => f.write_str("{}"),
            Segment::Filter(filter) => {
                f.write_str("[?")?;
                for (n, s) in filter.steps.iter().enumerate() {
                    match s {
                        Segment::Field(name) if n == 0 => f.write_str(name)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                if let Some((op, literal)) = &filter.comparison {
                    let op = match op {
                        CompareOp::Eq => "==",
                        CompareOp::Ne => "!=",
                    };
                    write!(f, " {} {}", op, literal)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for JsonPath {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonPath::parse(s)
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_identifier_char)
}

struct PathParser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> PathParser<'a> {
    fn new(source: &'a str) -> Self {
        let source = source.trim();
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidPath {
            path: self.source.to_string(),
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ConfigurationError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", c)))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse(mut self) -> Result<JsonPath, ConfigurationError> {
        if self.chars.is_empty() {
            return Err(self.error("empty path"));
        }

        let relative = self.eat('@');
        if !relative {
            self.eat('$');
        }

        let mut segments = Vec::new();
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.pos += 1;
                    match self.peek() {
                        Some('[') => continue,
                        Some('"') | Some('\'') => segments.push(Segment::Field(self.quoted()?)),
                        _ => segments.push(Segment::Field(self.identifier()?)),
                    }
                }
                '[' => segments.push(self.bracket()?),
                '{' => {
                    self.pos += 1;
                    self.skip_whitespace();
                    self.expect('}')?;
                    segments.push(Segment::Entries);
                }
                c if self.pos == start && is_identifier_char(c) => {
                    segments.push(Segment::Field(self.identifier()?))
                }
                _ => return Err(self.error(format!("unexpected character `{}`", c))),
            }
        }

        Ok(JsonPath {
            source: self.source.to_string(),
            relative,
            segments,
        })
    }

    fn identifier(&mut self) -> Result<String, ConfigurationError> {
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_char) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a field name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// A single- or double-quoted string; the quote is doubled or
    /// backslash-escaped to include it literally
    fn quoted(&mut self) -> Result<String, ConfigurationError> {
        let Some(quote) = self.peek() else {
            return Err(self.error("expected a quoted string"));
        };
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => out.push(c),
                        None => return Err(self.error("unterminated string")),
                    }
                    self.pos += 1;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    if self.peek() == Some(quote) {
                        out.push(quote);
                        self.pos += 1;
                    } else {
                        return Ok(out);
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn bracket(&mut self) -> Result<Segment, ConfigurationError> {
        self.expect('[')?;
        self.skip_whitespace();
        let segment = match self.peek() {
            Some(']') => Segment::Wildcard,
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some('?') => {
                self.pos += 1;
                Segment::Filter(self.filter()?)
            }
            Some('"') | Some('\'') => Segment::Field(self.quoted()?),
            Some(c) if c == '-' || c.is_ascii_digit() => Segment::Index(self.integer()?),
            _ => return Err(self.error("expected index, key, `*` or `?` in brackets")),
        };
        self.skip_whitespace();
        self.expect(']')?;
        Ok(segment)
    }

    fn integer(&mut self) -> Result<i64, ConfigurationError> {
        let start = self.pos;
        self.eat('-');
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map_err(|_| self.error(format!("invalid index `{}`", text)))
    }

    fn filter(&mut self) -> Result<Filter, ConfigurationError> {
        self.skip_whitespace();
        if self.eat('@') {
            self.eat('.');
        }

        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some('"') | Some('\'') if steps.is_empty() => {
                    steps.push(Segment::Field(self.quoted()?))
                }
                Some('.') if !steps.is_empty() => {
                    self.pos += 1;
                    match self.peek() {
                        Some('"') | Some('\'') => steps.push(Segment::Field(self.quoted()?)),
                        _ => steps.push(Segment::Field(self.identifier()?)),
                    }
                }
                Some('[') if !steps.is_empty() => {
                    self.pos += 1;
                    self.skip_whitespace();
                    let segment = match self.peek() {
                        Some('"') | Some('\'') => Segment::Field(self.quoted()?),
                        _ => Segment::Index(self.integer()?),
                    };
                    self.skip_whitespace();
                    self.expect(']')?;
                    steps.push(segment);
                }
                Some(c) if steps.is_empty() && is_identifier_char(c) => {
                    steps.push(Segment::Field(self.identifier()?))
                }
                _ => break,
            }
        }
        if steps.is_empty() {
            return Err(self.error("filter needs a field to test"));
        }

        self.skip_whitespace();
        let op = if self.eat('!') {
            self.expect('=')?;
            Some(CompareOp::Ne)
        } else if self.eat('=') {
            self.eat('=');
            Some(CompareOp::Eq)
        } else {
            None
        };

        let comparison = match op {
            Some(op) => {
                self.skip_whitespace();
                Some((op, self.literal()?))
            }
            None => None,
        };

        Ok(Filter { steps, comparison })
    }

    fn literal(&mut self) -> Result<Value, ConfigurationError> {
        if matches!(self.peek(), Some('"') | Some('\'')) {
            return Ok(Value::String(self.quoted()?));
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !c.is_whitespace() && c != ']')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        match serde_json::from_str::<Value>(&text) {
            Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => Ok(value),
            _ => Err(self.error(format!("invalid literal `{}`", text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(path: &str, doc: &Value) -> Vec<Value> {
        JsonPath::parse(path)
            .unwrap()
            .evaluate(doc)
            .matches
            .into_iter()
            .map(Cow::into_owned)
            .collect()
    }

    fn pod() -> Value {
        json!({
            "metadata": {
                "name": "web-1",
                "labels": {"app.kubernetes.io/name": "web", "team": "core"}
            },
            "spec": {
                "containers": [
                    {"name": "app", "image": "nginx"},
                    {"name": "sidecar", "image": "envoy"}
                ]
            },
            "status": {
                "phase": "Running",
                "conditions": [
                    {"type": "Ready", "status": "True"},
                    {"type": "Initialized", "status": "True"}
                ]
            }
        })
    }

    #[test]
    fn test_field_access() {
        assert_eq!(eval(".metadata.name", &pod()), vec![json!("web-1")]);
        assert_eq!(eval("metadata.name", &pod()), vec![json!("web-1")]);
        assert_eq!(eval("$.metadata.name", &pod()), vec![json!("web-1")]);
    }

    #[test]
    fn test_missing_field_is_empty() {
        let doc = pod();
        let result = JsonPath::parse(".metadata.namespace").unwrap().evaluate(&doc);
        assert!(result.matches.is_empty());
        assert!(result.mismatches.is_empty());
    }

    #[test]
    fn test_null_field_is_absent() {
        let doc = json!({"spec": {"nodeName": null}});
        assert!(eval(".spec.nodeName", &doc).is_empty());
    }

    #[test]
    fn test_quoted_keys() {
        assert_eq!(
            eval(r#".metadata.labels."app.kubernetes.io/name""#, &pod()),
            vec![json!("web")]
        );
        assert_eq!(eval(".metadata.labels['team']", &pod()), vec![json!("core")]);
        assert_eq!(eval(r#".metadata.labels["team"]"#, &pod()), vec![json!("core")]);
    }

    #[test]
    fn test_index() {
        assert_eq!(eval(".spec.containers[0].image", &pod()), vec![json!("nginx")]);
        assert_eq!(eval(".spec.containers[-1].image", &pod()), vec![json!("envoy")]);
        assert!(eval(".spec.containers[5].image", &pod()).is_empty());
        assert!(eval(".spec.containers[-3]", &pod()).is_empty());
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(
            eval(".spec.containers[].name", &pod()),
            vec![json!("app"), json!("sidecar")]
        );
        assert_eq!(
            eval(".spec.containers[*].image", &pod()),
            vec![json!("nginx"), json!("envoy")]
        );
    }

    #[test]
    fn test_wildcard_flattens_one_level() {
        let doc = json!({"groups": [[1, 2], [3], 4]});
        assert_eq!(eval(".groups[]", &doc), vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_wildcard_empty_array() {
        let doc = json!({"spec": {"containers": []}});
        assert!(eval(".spec.containers[]", &doc).is_empty());
    }

    #[test]
    fn test_filter_equality() {
        assert_eq!(
            eval(".status.conditions[?type=='Ready'].status", &pod()),
            vec![json!("True")]
        );
        assert_eq!(
            eval(r#".status.conditions[?type == "Initialized"].type"#, &pod()),
            vec![json!("Initialized")]
        );
        assert_eq!(
            eval(".status.conditions[?@.type != 'Ready'].type", &pod()),
            vec![json!("Initialized")]
        );
    }

    #[test]
    fn test_filter_number_and_existence() {
        let doc = json!({"ports": [
            {"port": 80, "name": "http"},
            {"port": 443},
            {"port": 8080.0, "name": "alt"}
        ]});
        assert_eq!(eval(".ports[?port==443].port", &doc), vec![json!(443)]);
        assert_eq!(eval(".ports[?port==8080].name", &doc), vec![json!("alt")]);
        assert_eq!(eval(".ports[?name].port", &doc), vec![json!(80), json!(8080.0)]);
    }

    #[test]
    fn test_filter_skips_non_objects() {
        let doc = json!({"items": [null, "Ready", 3, {"type": "Ready"}, {"type": "Synced"}]});
        assert_eq!(
            eval(".items[?type != 'Ready']", &doc),
            vec![json!({"type": "Synced"})]
        );
        assert_eq!(eval(".items[?type]", &doc).len(), 2);
    }

    #[test]
    fn test_object_entries() {
        let doc = json!({"metadata": {"labels": {"app": "web", "tier": "front", "gone": null}}});
        let path = JsonPath::parse(".metadata.labels{}").unwrap();
        assert!(path.is_multi_valued());
        assert_eq!(path.to_string(), ".metadata.labels{}");
        assert_eq!(
            eval(".metadata.labels{}", &doc),
            vec![
                json!({"key": "app", "value": "web"}),
                json!({"key": "tier", "value": "front"}),
            ]
        );
        assert_eq!(
            eval(".metadata.labels{}.key", &doc),
            vec![json!("app"), json!("tier")]
        );
        assert!(eval(".metadata.missing{}", &doc).is_empty());

        let result = JsonPath::parse(".metadata{}.value[0]").unwrap().evaluate(&doc);
        assert!(result.matches.is_empty());
        assert_eq!(result.mismatches[0].expected, "array");
    }

    #[test]
    fn test_entries_on_non_object_is_mismatch() {
        let doc = json!({"spec": {"containers": []}});
        let result = JsonPath::parse(".spec.containers{}").unwrap().evaluate(&doc);
        assert!(result.matches.is_empty());
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].expected, "object");
        assert_eq!(result.mismatches[0].at, ".spec.containers{}");
    }

    #[test]
    fn test_type_mismatch_reports_diagnostic() {
        let doc = pod();
        let result = JsonPath::parse(".metadata.name[0]").unwrap().evaluate(&doc);
        assert!(result.matches.is_empty());
        assert_eq!(
            result.mismatches,
            vec![Mismatch {
                at: ".metadata.name[0]".to_string(),
                expected: "array",
                found: "string",
            }]
        );
    }

    #[test]
    fn test_field_on_array_is_mismatch() {
        let doc = pod();
        let result = JsonPath::parse(".spec.containers.name").unwrap().evaluate(&doc);
        assert!(result.matches.is_empty());
        assert_eq!(result.mismatches.len(), 1);
        assert_eq!(result.mismatches[0].expected, "object");
    }

    #[test]
    fn test_relative_path() {
        let path = JsonPath::parse("@.image").unwrap();
        assert!(path.is_relative());
        let element = json!({"image": "nginx"});
        assert_eq!(eval("@.image", &element), vec![json!("nginx")]);

        let itself = JsonPath::parse("@").unwrap();
        assert!(itself.is_relative());
        assert_eq!(eval("@", &json!("x")), vec![json!("x")]);
    }

    #[test]
    fn test_multi_valued() {
        assert!(JsonPath::parse(".a[].b").unwrap().is_multi_valued());
        assert!(JsonPath::parse(".a[?b]").unwrap().is_multi_valued());
        assert!(!JsonPath::parse(".a[0].b").unwrap().is_multi_valued());
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", ".", ".a[", ".a[x]", ".a['unterminated]", "a b", ".a[?]", ".a[?b==bogus]", ".a{", ".a{b}"] {
            let err = JsonPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, ConfigurationError::InvalidPath { .. }),
                "expected InvalidPath for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_display_roundtrips_source() {
        let path = JsonPath::parse(" .spec.containers[].image ").unwrap();
        assert_eq!(path.to_string(), ".spec.containers[].image");
    }
}
