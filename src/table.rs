// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Materialized tables and the relational engine seam

use std::sync::Arc;

use async_trait::async_trait;

use crate::debug::{Channel, Debugger};
use crate::error::EngineError;
use crate::extract::ExtractedRow;
use crate::output::QueryResult;
use crate::schema::TableSchema;

/// A fully extracted table, ready to load into the engine. Lives for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedTable {
    schema: Arc<TableSchema>,
    rows: Vec<ExtractedRow>,
}

impl MaterializedTable {
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn rows(&self) -> &[ExtractedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Assembles extracted rows into a [`MaterializedTable`].
pub struct TableBuilder<'a> {
    debug: &'a Debugger,
}

impl<'a> TableBuilder<'a> {
    pub fn new(debug: &'a Debugger) -> Self {
        Self { debug }
    }

    pub fn build(&self, schema: Arc<TableSchema>, rows: Vec<ExtractedRow>) -> MaterializedTable {
        debug_assert!(rows.iter().all(|r| r.len() == schema.columns().len()));

        if self.debug.is_enabled(Channel::Schema) {
            let columns: Vec<String> = schema
                .columns()
                .iter()
                .map(|c| {
                    let expand = if c.is_expand() { " expand" } else { "" };
                    format!("{} {}{} <- {}", c.name, c.data_type, expand, c.path)
                })
                .collect();
            self.debug.emit(
                Channel::Schema,
                "table",
                &[
                    ("name", &schema.name()),
                    ("resource", schema.resource()),
                    ("rows", &rows.len()),
                ],
            );
            for column in &columns {
                self.debug.emit(Channel::Schema, "column", &[("def", column)]);
            }
        }

        MaterializedTable { schema, rows }
    }
}

/// The embedded SQL engine queries run against.
#[async_trait]
pub trait RelationalEngine: Send {
    /// Create (or replace) an empty table with the schema's columns
    async fn create_table(&mut self, schema: &TableSchema) -> Result<(), EngineError>;

    /// Append rows to a previously created table
    async fn insert_rows(&mut self, table: &str, rows: &[ExtractedRow]) -> Result<(), EngineError>;

    /// Run a query and return its result set
    async fn execute(&self, sql: &str) -> Result<QueryResult, EngineError>;

    /// Create a table and load a materialized table into it
    async fn load(&mut self, table: &MaterializedTable) -> Result<(), EngineError> {
        self.create_table(table.schema()).await?;
        self.insert_rows(table.name(), table.rows()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::MemorySink;
    use crate::extract::CellValue;
    use crate::kubernetes::ResourceKind;
    use crate::schema::{ColumnSpec, ColumnType, ScopePolicy};

    fn schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchema::new(
                "pods",
                ResourceKind::new("pods"),
                ScopePolicy::Namespaced,
                vec![
                    ColumnSpec::new("name", ".metadata.name", ColumnType::Text).unwrap(),
                    ColumnSpec::new("created", ".metadata.creationTimestamp", ColumnType::Timestamp)
                        .unwrap(),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_build_reports_schema() {
        let sink = Arc::new(MemorySink::new());
        let debug = Debugger::new([Channel::Schema].into(), sink.clone());
        let rows = vec![vec![CellValue::Text("a".into()), CellValue::Null]];

        let table = TableBuilder::new(&debug).build(schema(), rows);
        assert_eq!(table.name(), "pods");
        assert_eq!(table.len(), 1);
        assert_eq!(
            sink.channel_lines(Channel::Schema),
            vec![
                "table name=pods resource=pods rows=1",
                "column def=name text <- .metadata.name",
                "column def=created timestamp <- .metadata.creationTimestamp",
            ]
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let rows = vec![
            vec![CellValue::Text("a".into()), CellValue::Timestamp(0)],
            vec![CellValue::Text("b".into()), CellValue::Null],
        ];
        let debug = Debugger::disabled();
        let first = TableBuilder::new(&debug).build(schema(), rows.clone());
        let second = TableBuilder::new(&debug).build(schema(), rows);
        assert_eq!(first, second);
    }
}
