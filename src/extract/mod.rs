// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Row extraction: turning JSON documents into typed rows
//!
//! For each document every column path is evaluated:
//! - `single` columns need at most one match; zero matches is null, more
//!   than one skips the whole document with a diagnostic
//! - the `expand` column (if any) seeds one row per matched value, and
//!   element-relative (`@`) columns are evaluated against that value
//! - `sum` columns add up every value their path matches
//! - values are coerced to the declared type; a failed coercion nulls the
//!   cell and is reported, it never drops the row
//!
//! Rows come out in document order, then expansion order.

mod coerce;
mod path;

pub use coerce::{CellValue, coerce, format_age, format_size, format_utc, parse_age};
pub use path::{Evaluation, JsonPath, Mismatch};

use std::borrow::Cow;

use serde_json::Value;

use crate::debug::{Channel, Debugger};
use crate::error::ExtractionError;
use crate::schema::{ColumnSpec, Multiplicity, TableSchema};

/// One output row, aligned with the schema's columns.
pub type ExtractedRow = Vec<CellValue>;

/// A document that produced no rows because of an extraction error.
#[derive(Debug)]
pub struct SkippedDocument {
    pub index: usize,
    pub label: String,
    pub error: ExtractionError,
}

/// Result of extracting one table's rows.
#[derive(Debug, Default)]
pub struct Extraction {
    pub rows: Vec<ExtractedRow>,
    pub skipped: Vec<SkippedDocument>,
    /// Cells nulled because their value could not be coerced
    pub coercion_failures: usize,
}

/// Split a payload into documents: a `{"items": [...]}` list, a bare
/// array, or a single object.
pub fn split_documents(payload: Value) -> Vec<Value> {
    match payload {
        Value::Object(mut map) if matches!(map.get("items"), Some(Value::Array(_))) => {
            match map.remove("items") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// `#3 default/web-1` style label for diagnostics
fn document_label(index: usize, doc: &Value) -> String {
    let meta = &doc["metadata"];
    match (meta["namespace"].as_str(), meta["name"].as_str()) {
        (Some(ns), Some(name)) => format!("#{} {}/{}", index, ns, name),
        (None, Some(name)) => format!("#{} {}", index, name),
        _ => format!("#{}", index),
    }
}

/// Extracts rows for one schema, reporting to the `itemize` and `extract`
/// channels.
pub struct RowExtractor<'a> {
    schema: &'a TableSchema,
    debug: &'a Debugger,
}

impl<'a> RowExtractor<'a> {
    pub fn new(schema: &'a TableSchema, debug: &'a Debugger) -> Self {
        Self { schema, debug }
    }

    pub fn extract(&self, documents: &[Value]) -> Extraction {
        let table = self.schema.name();
        let mut out = Extraction::default();

        for (index, doc) in documents.iter().enumerate() {
            let label = document_label(index, doc);
            match self.extract_document(doc, &label, &mut out.coercion_failures) {
                Ok(rows) => {
                    self.debug.emit(
                        Channel::Itemize,
                        "document",
                        &[("table", &table), ("doc", &label), ("rows", &rows.len())],
                    );
                    out.rows.extend(rows);
                }
                Err(error) => {
                    self.debug.emit(
                        Channel::Extract,
                        "skipping document",
                        &[("table", &table), ("doc", &label), ("error", &error)],
                    );
                    tracing::debug!(table = %table, doc = %label, error = %error, "Skipping document");
                    out.skipped.push(SkippedDocument { index, label, error });
                }
            }
        }

        self.debug.emit(
            Channel::Itemize,
            "table",
            &[
                ("table", &table),
                ("documents", &documents.len()),
                ("rows", &out.rows.len()),
                ("skipped", &out.skipped.len()),
            ],
        );
        out
    }

    fn extract_document(
        &self,
        doc: &Value,
        label: &str,
        coercion_failures: &mut usize,
    ) -> Result<Vec<ExtractedRow>, ExtractionError> {
        if !doc.is_object() {
            return Err(ExtractionError::MalformedDocument);
        }

        let columns = self.schema.columns();

        // Document-level columns are shared by every row of this document
        let mut shared: Vec<Option<CellValue>> = Vec::with_capacity(columns.len());
        for col in columns {
            if col.is_expand() || col.path.is_relative() {
                shared.push(None);
            } else {
                shared.push(Some(self.column_cell(col, doc, label, coercion_failures)?));
            }
        }

        let Some(expand) = self.schema.expand_column() else {
            let row: ExtractedRow = shared
                .into_iter()
                .map(|cell| cell.unwrap_or(CellValue::Null))
                .collect();
            self.report_row(&row, label, 0);
            return Ok(vec![row]);
        };

        let elements = self.evaluate(expand, doc, label).matches;
        let mut rows = Vec::with_capacity(elements.len());
        for element in &elements {
            let mut row = Vec::with_capacity(columns.len());
            for (col, doc_cell) in columns.iter().zip(&shared) {
                let cell = if col.is_expand() {
                    self.coerce_cell(col, Some(&**element), label, coercion_failures)
                } else if col.path.is_relative() {
                    self.column_cell(col, element, label, coercion_failures)?
                } else {
                    doc_cell.clone().unwrap_or(CellValue::Null)
                };
                row.push(cell);
            }
            self.report_row(&row, label, rows.len());
            rows.push(row);
        }
        Ok(rows)
    }

    fn evaluate<'v>(&self, col: &ColumnSpec, root: &'v Value, label: &str) -> Evaluation<'v> {
        let eval = col.path.evaluate(root);
        for mismatch in &eval.mismatches {
            self.debug.emit(
                Channel::Extract,
                "type mismatch",
                &[
                    ("table", &self.schema.name()),
                    ("doc", &label),
                    ("column", &col.name),
                    ("detail", mismatch),
                ],
            );
        }
        eval
    }

    /// Cell of a `single` or `sum` column evaluated against `root`. A single
    /// column matching more than one value is an error for the document.
    fn column_cell(
        &self,
        col: &ColumnSpec,
        root: &Value,
        label: &str,
        coercion_failures: &mut usize,
    ) -> Result<CellValue, ExtractionError> {
        let mut matches = self.evaluate(col, root, label).matches;
        if col.multiplicity == Multiplicity::Sum {
            return Ok(self.sum_cell(col, &matches, label, coercion_failures));
        }
        match matches.len() {
            0 | 1 => Ok(self.coerce_cell(col, matches.pop().as_deref(), label, coercion_failures)),
            count => Err(ExtractionError::MultipleMatches {
                column: col.name.clone(),
                count,
            }),
        }
    }

    /// Sum of the values that coerce; null when none do
    fn sum_cell(
        &self,
        col: &ColumnSpec,
        values: &[Cow<'_, Value>],
        label: &str,
        coercion_failures: &mut usize,
    ) -> CellValue {
        let mut total: Option<CellValue> = None;
        for value in values {
            let cell = self.coerce_cell(col, Some(&**value), label, coercion_failures);
            total = match (total, cell) {
                (total, CellValue::Null) => total,
                (None, cell) => Some(cell),
                (Some(CellValue::Integer(a)), CellValue::Integer(b)) => {
                    Some(CellValue::Integer(a.saturating_add(b)))
                }
                (Some(CellValue::Real(a)), CellValue::Real(b)) => Some(CellValue::Real(a + b)),
                (Some(total), _) => Some(total),
            };
        }
        total.unwrap_or(CellValue::Null)
    }

    fn coerce_cell(
        &self,
        col: &ColumnSpec,
        value: Option<&Value>,
        label: &str,
        coercion_failures: &mut usize,
    ) -> CellValue {
        match value.map(|v| coerce(v, col.data_type)) {
            None => CellValue::Null,
            Some(Ok(cell)) => cell,
            Some(Err(e)) => {
                *coercion_failures += 1;
                self.debug.emit(
                    Channel::Extract,
                    "coercion failed",
                    &[
                        ("table", &self.schema.name()),
                        ("doc", &label),
                        ("column", &col.name),
                        ("error", &e),
                    ],
                );
                CellValue::Null
            }
        }
    }

    fn report_row(&self, row: &[CellValue], label: &str, row_index: usize) {
        if !self.debug.is_enabled(Channel::Extract) {
            return;
        }
        for (col, cell) in self.schema.columns().iter().zip(row) {
            self.debug.emit(
                Channel::Extract,
                "value",
                &[
                    ("table", &self.schema.name()),
                    ("doc", &label),
                    ("row", &row_index),
                    ("column", &col.name),
                    ("path", &col.path),
                    ("value", cell),
                ],
            );
        }
    }
}

/// Extract rows for `schema` from `documents`
pub fn extract(documents: &[Value], schema: &TableSchema, debug: &Debugger) -> Extraction {
    RowExtractor::new(schema, debug).extract(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::MemorySink;
    use crate::kubernetes::ResourceKind;
    use crate::schema::{ColumnType, ScopePolicy};
    use serde_json::json;
    use std::sync::Arc;

    fn text(name: &str, path: &str) -> ColumnSpec {
        ColumnSpec::new(name, path, ColumnType::Text).unwrap()
    }

    fn schema(columns: Vec<ColumnSpec>) -> TableSchema {
        TableSchema::new("pods", ResourceKind::new("pods"), ScopePolicy::Namespaced, columns).unwrap()
    }

    fn pods_schema() -> TableSchema {
        schema(vec![
            text("name", ".metadata.name"),
            text("phase", ".status.phase"),
            text("containerNames", ".spec.containers[].name").expanded(),
        ])
    }

    fn pod(name: &str, phase: Option<&str>, containers: &[&str]) -> Value {
        let mut doc = json!({
            "metadata": {"name": name, "namespace": "default"},
            "spec": {"containers": containers.iter().map(|c| json!({"name": c})).collect::<Vec<_>>()}
        });
        if let Some(phase) = phase {
            doc["status"] = json!({"phase": phase});
        }
        doc
    }

    fn t(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn recording_debugger(channels: &[Channel]) -> (Debugger, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let debug = Debugger::new(channels.iter().copied().collect(), sink.clone());
        (debug, sink)
    }

    #[test]
    fn test_expand_yields_one_row_per_match() {
        let docs = vec![pod("web-1", Some("Running"), &["app", "sidecar"])];
        let result = extract(&docs, &pods_schema(), &Debugger::disabled());
        assert_eq!(
            result.rows,
            vec![
                vec![t("web-1"), t("Running"), t("app")],
                vec![t("web-1"), t("Running"), t("sidecar")],
            ]
        );
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_missing_single_value_is_null() {
        let schema = schema(vec![text("name", ".metadata.name"), text("phase", ".status.phase")]);
        let docs = vec![pod("web-1", None, &[])];
        let result = extract(&docs, &schema, &Debugger::disabled());
        assert_eq!(result.rows, vec![vec![t("web-1"), CellValue::Null]]);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_multiple_matches_skip_only_that_document() {
        let schema = schema(vec![
            text("name", ".metadata.name"),
            text("container", ".spec.containers[].name"),
        ]);
        let docs = vec![pod("one", None, &["app"]), pod("two", None, &["app", "sidecar"])];
        let (debug, sink) = recording_debugger(&[Channel::Extract]);

        let result = extract(&docs, &schema, &debug);
        assert_eq!(result.rows, vec![vec![t("one"), t("app")]]);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].index, 1);
        assert!(matches!(
            result.skipped[0].error,
            ExtractionError::MultipleMatches { count: 2, .. }
        ));
        assert!(
            sink.channel_lines(Channel::Extract)
                .iter()
                .any(|l| l.starts_with("skipping document table=pods doc=#1 default/two"))
        );
    }

    #[test]
    fn test_expand_with_zero_matches_contributes_no_rows() {
        let docs = vec![pod("empty", Some("Pending"), &[]), pod("web", Some("Running"), &["app"])];
        let result = extract(&docs, &pods_schema(), &Debugger::disabled());
        assert_eq!(result.rows, vec![vec![t("web"), t("Running"), t("app")]]);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_row_order_follows_documents_then_expansion() {
        let docs = vec![
            pod("a", None, &["a1", "a2"]),
            pod("b", None, &["b1"]),
            pod("c", None, &["c1", "c2", "c3"]),
        ];
        let result = extract(&docs, &pods_schema(), &Debugger::disabled());
        let order: Vec<CellValue> = result.rows.into_iter().map(|r| r[2].clone()).collect();
        assert_eq!(order, vec![t("a1"), t("a2"), t("b1"), t("c1"), t("c2"), t("c3")]);
    }

    #[test]
    fn test_relative_columns_use_expansion_element() {
        let schema = schema(vec![
            text("pod", ".metadata.name"),
            text("container", ".spec.containers[]").expanded(),
            text("name", "@.name"),
            ColumnSpec::new("mem", "@.resources.requests.memory", ColumnType::Size).unwrap(),
        ]);
        let docs = vec![json!({
            "metadata": {"name": "web"},
            "spec": {"containers": [
                {"name": "app", "resources": {"requests": {"memory": "10Ki"}}},
                {"name": "sidecar"}
            ]}
        })];
        let result = extract(&docs, &schema, &Debugger::disabled());
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][2], t("app"));
        assert_eq!(result.rows[0][3], CellValue::Integer(10240));
        assert_eq!(result.rows[1][2], t("sidecar"));
        assert_eq!(result.rows[1][3], CellValue::Null);
        assert_eq!(result.rows[0][1], t(r#"{"name":"app","resources":{"requests":{"memory":"10Ki"}}}"#));
    }

    #[test]
    fn test_coercion_failure_nulls_cell() {
        let schema = schema(vec![
            text("name", ".metadata.name"),
            ColumnSpec::new("replicas", ".spec.replicas", ColumnType::Integer).unwrap(),
        ]);
        let docs = vec![json!({"metadata": {"name": "x"}, "spec": {"replicas": "many"}})];
        let (debug, sink) = recording_debugger(&[Channel::Extract]);

        let result = extract(&docs, &schema, &debug);
        assert_eq!(result.rows, vec![vec![t("x"), CellValue::Null]]);
        assert_eq!(result.coercion_failures, 1);
        assert!(
            sink.channel_lines(Channel::Extract)
                .iter()
                .any(|l| l.starts_with("coercion failed") && l.contains("column=replicas"))
        );
    }

    #[test]
    fn test_sum_columns_add_all_matches() {
        let schema = schema(vec![
            text("name", ".metadata.name"),
            ColumnSpec::new("cpu_req", ".spec.containers[].resources.requests.cpu", ColumnType::Cpu)
                .unwrap()
                .summed(),
            ColumnSpec::new("mem_req", ".spec.containers[].resources.requests.memory", ColumnType::Size)
                .unwrap()
                .summed(),
        ]);
        let docs = vec![
            json!({"metadata": {"name": "web"}, "spec": {"containers": [
                {"resources": {"requests": {"cpu": "250m", "memory": "1Ki"}}},
                {"resources": {"requests": {"cpu": "1", "memory": "bogus"}}},
                {"resources": {}}
            ]}}),
            json!({"metadata": {"name": "idle"}, "spec": {"containers": [{"name": "x"}]}}),
        ];
        let (debug, sink) = recording_debugger(&[Channel::Extract]);

        let result = extract(&docs, &schema, &debug);
        assert_eq!(
            result.rows,
            vec![
                vec![t("web"), CellValue::Real(1.25), CellValue::Integer(1024)],
                vec![t("idle"), CellValue::Null, CellValue::Null],
            ]
        );
        assert!(result.skipped.is_empty());
        assert_eq!(result.coercion_failures, 1);
        assert!(
            sink.channel_lines(Channel::Extract)
                .iter()
                .any(|l| l.starts_with("coercion failed") && l.contains("column=mem_req"))
        );
    }

    #[test]
    fn test_label_entries_expand() {
        let schema = schema(vec![
            text("pod_uid", ".metadata.uid"),
            text("label", ".metadata.labels{}").expanded(),
            text("key", "@.key"),
            text("value", "@.value"),
        ]);
        let docs = vec![json!({
            "metadata": {"uid": "u1", "labels": {"app": "web", "tier": "front"}}
        })];
        let result = extract(&docs, &schema, &Debugger::disabled());
        assert_eq!(
            result.rows,
            vec![
                vec![t("u1"), t(r#"{"key":"app","value":"web"}"#), t("app"), t("web")],
                vec![t("u1"), t(r#"{"key":"tier","value":"front"}"#), t("tier"), t("front")],
            ]
        );
    }

    #[test]
    fn test_non_object_documents_skipped() {
        let schema = schema(vec![text("name", ".metadata.name")]);
        let docs = vec![json!("garbage"), json!({"metadata": {"name": "ok"}}), json!(42)];
        let result = extract(&docs, &schema, &Debugger::disabled());
        assert_eq!(result.rows, vec![vec![t("ok")]]);
        assert_eq!(result.skipped.len(), 2);
        assert!(matches!(result.skipped[0].error, ExtractionError::MalformedDocument));
    }

    #[test]
    fn test_type_mismatch_reported_and_null() {
        let schema = schema(vec![text("first", ".metadata.name[0]")]);
        let docs = vec![json!({"metadata": {"name": "web"}})];
        let (debug, sink) = recording_debugger(&[Channel::Extract]);

        let result = extract(&docs, &schema, &debug);
        assert_eq!(result.rows, vec![vec![CellValue::Null]]);
        assert!(
            sink.channel_lines(Channel::Extract)
                .iter()
                .any(|l| l.contains("type mismatch") && l.contains("expected array"))
        );
    }

    #[test]
    fn test_itemize_and_extract_reporting() {
        let docs = vec![pod("web-1", Some("Running"), &["app", "sidecar"])];
        let (debug, sink) = recording_debugger(&[Channel::Itemize, Channel::Extract]);
        extract(&docs, &pods_schema(), &debug);

        assert_eq!(
            sink.channel_lines(Channel::Itemize),
            vec![
                "document table=pods doc=#0 default/web-1 rows=2",
                "table table=pods documents=1 rows=2 skipped=0",
            ]
        );
        let values = sink.channel_lines(Channel::Extract);
        assert_eq!(values.len(), 6);
        assert_eq!(
            values[5],
            "value table=pods doc=#0 default/web-1 row=1 column=containernames path=.spec.containers[].name value=\"sidecar\""
        );
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let docs = vec![
            pod("a", Some("Running"), &["x", "y"]),
            pod("b", None, &["z"]),
        ];
        let first = extract(&docs, &pods_schema(), &Debugger::disabled());
        let second = extract(&docs, &pods_schema(), &Debugger::disabled());
        assert_eq!(first.rows, second.rows);
    }

    #[test]
    fn test_split_documents() {
        assert_eq!(split_documents(json!({"kind": "List", "items": [{"a": 1}, {"a": 2}]})).len(), 2);
        assert_eq!(split_documents(json!([{"a": 1}])).len(), 1);
        assert_eq!(split_documents(json!({"metadata": {"name": "solo"}})).len(), 1);
        assert!(split_documents(json!({"items": []})).is_empty());
        assert!(split_documents(Value::Null).is_empty());
    }
}
