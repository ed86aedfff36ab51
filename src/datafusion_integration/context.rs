// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! DataFusion SessionContext setup for kubetab

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::array::{ArrayRef, RecordBatch};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::datasource::MemTable;
use datafusion::execution::context::SessionContext;
use datafusion::prelude::SessionConfig;

use crate::error::EngineError;
use crate::extract::ExtractedRow;
use crate::output::QueryResult;
use crate::schema::TableSchema;
use crate::table::RelationalEngine;

use super::convert::{arrow_schema, rows_to_record_batch};
use super::functions::register_helpers;

/// Rows loaded into one table so far
struct LoadedTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

/// An in-memory DataFusion engine holding the tables of one query session
pub struct DataFusionEngine {
    ctx: SessionContext,
    tables: HashMap<String, LoadedTable>,
}

impl DataFusionEngine {
    pub fn new() -> Result<Self, EngineError> {
        // Tables live in kubetab.public; `public.pods` resolves as well as `pods`
        let config = SessionConfig::new()
            .with_information_schema(true)
            .with_default_catalog_and_schema("kubetab", "public");
        let mut ctx = SessionContext::new_with_config(config);

        // JSON functions for querying JSON text columns such as labels
        datafusion_functions_json::register_all(&mut ctx)?;
        register_helpers(&ctx);

        Ok(Self {
            ctx,
            tables: HashMap::new(),
        })
    }

    /// Names of the tables created so far
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Swap the registered MemTable for one holding the current batches
    fn publish(&self, name: &str) -> Result<(), EngineError> {
        let table = self
            .tables
            .get(name)
            .ok_or_else(|| EngineError::MissingTable(name.to_string()))?;
        let provider = MemTable::try_new(table.schema.clone(), vec![table.batches.clone()])?;

        self.ctx.deregister_table(name)?;
        self.ctx.register_table(name, Arc::new(provider))?;
        Ok(())
    }
}

#[async_trait]
impl RelationalEngine for DataFusionEngine {
    async fn create_table(&mut self, schema: &TableSchema) -> Result<(), EngineError> {
        let name = schema.name().to_string();
        tracing::debug!(table = %name, columns = schema.columns().len(), "Creating table");
        self.tables.insert(
            name.clone(),
            LoadedTable {
                schema: arrow_schema(schema),
                batches: Vec::new(),
            },
        );
        self.publish(&name)
    }

    async fn insert_rows(&mut self, table: &str, rows: &[ExtractedRow]) -> Result<(), EngineError> {
        let loaded = self
            .tables
            .get_mut(table)
            .ok_or_else(|| EngineError::MissingTable(table.to_string()))?;
        if rows.is_empty() {
            return Ok(());
        }

        let batch = rows_to_record_batch(loaded.schema.clone(), rows)?;
        loaded.batches.push(batch);
        self.publish(table)
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, EngineError> {
        let df = self.ctx.sql(sql).await?;
        let columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let batches = df.collect().await?;

        // Convert batches to rows of strings, keeping NULL apart from ""
        let mut rows = Vec::new();
        for batch in &batches {
            for row_idx in 0..batch.num_rows() {
                let mut row = Vec::with_capacity(batch.num_columns());
                for col_idx in 0..batch.num_columns() {
                    row.push(array_value_to_string(batch.column(col_idx), row_idx));
                }
                rows.push(row);
            }
        }

        Ok(QueryResult { columns, rows })
    }
}

/// Convert an Arrow array value at a given index to a string, `None` for NULL
fn array_value_to_string(array: &ArrayRef, idx: usize) -> Option<String> {
    use datafusion::arrow::array::*;
    use datafusion::arrow::datatypes::{DataType, TimeUnit};

    // Downcast-and-format, falling back to Arrow's display on a type mismatch
    macro_rules! downcast_format {
        ($arr_type:ty) => {
            array
                .as_any()
                .downcast_ref::<$arr_type>()
                .map(|arr| arr.value(idx).to_string())
        };
    }

    if array.is_null(idx) {
        return None;
    }

    let formatted = match array.data_type() {
        DataType::Utf8 => downcast_format!(StringArray),
        DataType::LargeUtf8 => downcast_format!(LargeStringArray),
        DataType::Utf8View => downcast_format!(StringViewArray),
        DataType::Int8 => downcast_format!(Int8Array),
        DataType::Int16 => downcast_format!(Int16Array),
        DataType::Int32 => downcast_format!(Int32Array),
        DataType::Int64 => downcast_format!(Int64Array),
        DataType::UInt8 => downcast_format!(UInt8Array),
        DataType::UInt16 => downcast_format!(UInt16Array),
        DataType::UInt32 => downcast_format!(UInt32Array),
        DataType::UInt64 => downcast_format!(UInt64Array),
        DataType::Float32 => downcast_format!(Float32Array),
        DataType::Float64 => downcast_format!(Float64Array),
        DataType::Boolean => downcast_format!(BooleanArray),
        DataType::Timestamp(TimeUnit::Millisecond, _) => array
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .and_then(|arr| chrono::DateTime::from_timestamp_millis(arr.value(idx)))
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        _ => None,
    };

    Some(formatted.unwrap_or_else(|| {
        datafusion::arrow::util::display::array_value_to_string(array, idx)
            .unwrap_or_else(|_| format!("{:?}", array.slice(idx, 1)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::CellValue;
    use crate::kubernetes::ResourceKind;
    use crate::schema::{ColumnSpec, ColumnType, ScopePolicy};
    use crate::table::{MaterializedTable, TableBuilder};
    use crate::debug::Debugger;

    fn pods_schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchema::new(
                "pods",
                ResourceKind::new("pods"),
                ScopePolicy::Namespaced,
                vec![
                    ColumnSpec::new("name", ".metadata.name", ColumnType::Text).unwrap(),
                    ColumnSpec::new("node", ".spec.nodeName", ColumnType::Text).unwrap(),
                    ColumnSpec::new("restarts", ".status.restarts", ColumnType::Integer).unwrap(),
                    ColumnSpec::new("labels", ".metadata.labels", ColumnType::Text).unwrap(),
                    ColumnSpec::new("created", ".metadata.creationTimestamp", ColumnType::Timestamp)
                        .unwrap(),
                ],
            )
            .unwrap(),
        )
    }

    fn nodes_schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchema::new(
                "nodes",
                ResourceKind::new("nodes"),
                ScopePolicy::Cluster,
                vec![
                    ColumnSpec::new("name", ".metadata.name", ColumnType::Text).unwrap(),
                    ColumnSpec::new("cpu", ".status.capacity.cpu", ColumnType::Cpu).unwrap(),
                ],
            )
            .unwrap(),
        )
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn pods_table() -> MaterializedTable {
        let rows = vec![
            vec![
                text("web-1"),
                text("node-a"),
                CellValue::Integer(0),
                text(r#"{"app":"web"}"#),
                CellValue::Timestamp(1_609_459_200_000),
            ],
            vec![
                text("web-2"),
                text("node-b"),
                CellValue::Integer(3),
                text(r#"{"app":"web"}"#),
                CellValue::Null,
            ],
            vec![
                text("db-1"),
                text("node-a"),
                CellValue::Null,
                text(r#"{"app":"db"}"#),
                CellValue::Null,
            ],
        ];
        TableBuilder::new(&Debugger::disabled()).build(pods_schema(), rows)
    }

    fn nodes_table() -> MaterializedTable {
        let rows = vec![
            vec![text("node-a"), CellValue::Real(4.0)],
            vec![text("node-b"), CellValue::Real(0.5)],
        ];
        TableBuilder::new(&Debugger::disabled()).build(nodes_schema(), rows)
    }

    async fn engine() -> DataFusionEngine {
        let mut engine = DataFusionEngine::new().unwrap();
        engine.load(&pods_table()).await.unwrap();
        engine.load(&nodes_table()).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_select_with_filter() {
        let engine = engine().await;
        let result = engine
            .execute("SELECT name, restarts FROM pods WHERE restarts > 0")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["name", "restarts"]);
        assert_eq!(result.text_rows(), vec![vec!["web-2".to_string(), "3".to_string()]]);
    }

    #[tokio::test]
    async fn test_join_and_aggregate() {
        let engine = engine().await;
        let result = engine
            .execute(
                "SELECT n.name, n.cpu, COUNT(*) AS pods FROM pods p \
                 JOIN nodes n ON p.node = n.name GROUP BY n.name, n.cpu ORDER BY n.name",
            )
            .await
            .unwrap();
        assert_eq!(
            result.text_rows(),
            vec![
                vec!["node-a".to_string(), "4".to_string(), "2".to_string()],
                vec!["node-b".to_string(), "0.5".to_string(), "1".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_nulls_and_timestamps() {
        let engine = engine().await;
        let result = engine
            .execute("SELECT created, restarts FROM pods ORDER BY name")
            .await
            .unwrap();
        // db-1, web-1, web-2
        assert_eq!(result.rows[0], vec![None, None]);
        assert_eq!(result.rows[1][0].as_deref(), Some("2021-01-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_empty_string_is_not_null() {
        let engine = engine().await;
        let result = engine
            .execute("SELECT '' AS blank, CAST(NULL AS VARCHAR) AS missing")
            .await
            .unwrap();
        assert_eq!(result.rows, vec![vec![Some(String::new()), None]]);
        let json = result.format(&crate::cli::OutputFormat::Json, false);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["blank"], "");
        assert!(parsed[0]["missing"].is_null());
    }

    #[tokio::test]
    async fn test_json_functions_registered() {
        let engine = engine().await;
        let result = engine
            .execute("SELECT name FROM pods WHERE json_get_str(labels, 'app') = 'db'")
            .await
            .unwrap();
        assert_eq!(result.text_rows(), vec![vec!["db-1".to_string()]]);
    }

    #[tokio::test]
    async fn test_helper_functions_registered() {
        let engine = DataFusionEngine::new().unwrap();
        let result = engine
            .execute("SELECT to_size(1610612736) AS s, to_age(172800) AS a")
            .await
            .unwrap();
        assert_eq!(result.text_rows(), vec![vec!["1.5Gi".to_string(), "2d".to_string()]]);
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let engine = engine().await;
        let result = engine
            .execute("SELECT name FROM pods WHERE name = 'missing'")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["name"]);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_case_column_names() {
        let schema = Arc::new(
            TableSchema::new(
                "pod_containers",
                ResourceKind::new("pods"),
                ScopePolicy::Namespaced,
                vec![
                    ColumnSpec::new("podName", ".metadata.name", ColumnType::Text).unwrap(),
                    ColumnSpec::new("containerNames", ".spec.containers[].name", ColumnType::Text)
                        .unwrap()
                        .expanded(),
                ],
            )
            .unwrap(),
        );
        let table = TableBuilder::new(&Debugger::disabled())
            .build(schema, vec![vec![text("web-1"), text("app")], vec![text("web-1"), text("sidecar")]]);
        let mut engine = DataFusionEngine::new().unwrap();
        engine.load(&table).await.unwrap();

        let result = engine
            .execute("SELECT containerNames FROM pod_containers WHERE PodName = 'web-1' ORDER BY containernames")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["containernames"]);
        assert_eq!(
            result.text_rows(),
            vec![vec!["app".to_string()], vec!["sidecar".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_qualified_table_names() {
        let engine = engine().await;
        for sql in [
            "SELECT COUNT(*) FROM public.nodes",
            "SELECT COUNT(*) FROM kubetab.public.nodes",
        ] {
            let result = engine.execute(sql).await.unwrap();
            assert_eq!(result.text_rows(), vec![vec!["2".to_string()]]);
        }
    }

    #[tokio::test]
    async fn test_empty_table_is_queryable() {
        let mut engine = DataFusionEngine::new().unwrap();
        let empty = TableBuilder::new(&Debugger::disabled()).build(pods_schema(), vec![]);
        engine.load(&empty).await.unwrap();
        let result = engine.execute("SELECT COUNT(*) FROM pods").await.unwrap();
        assert_eq!(result.text_rows(), vec![vec!["0".to_string()]]);
    }

    #[tokio::test]
    async fn test_insert_without_create_fails() {
        let mut engine = DataFusionEngine::new().unwrap();
        let err = engine.insert_rows("pods", &[]).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingTable(ref t) if t == "pods"));
    }

    #[tokio::test]
    async fn test_incremental_inserts() {
        let mut engine = DataFusionEngine::new().unwrap();
        engine.create_table(&nodes_schema()).await.unwrap();
        engine
            .insert_rows("nodes", &[vec![text("a"), CellValue::Real(1.0)]])
            .await
            .unwrap();
        engine
            .insert_rows("nodes", &[vec![text("b"), CellValue::Real(2.0)]])
            .await
            .unwrap();
        let result = engine.execute("SELECT SUM(cpu) FROM nodes").await.unwrap();
        assert_eq!(result.text_rows(), vec![vec!["3".to_string()]]);
        assert_eq!(engine.table_names(), vec!["nodes"]);
    }

    #[tokio::test]
    async fn test_unknown_table_is_engine_error() {
        let engine = DataFusionEngine::new().unwrap();
        assert!(engine.execute("SELECT * FROM nope").await.is_err());
    }
}
