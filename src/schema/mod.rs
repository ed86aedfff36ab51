// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Table schemas
//!
//! A schema maps one Kubernetes resource kind to a relational table: each
//! column is a path into the resource JSON plus a type. At most one column
//! is marked `expand`, which turns every value its path matches into its own
//! row; element-relative (`@`) columns are then evaluated against that value.
//! A `sum` column adds up every numeric value its path matches.

mod builtin;
mod registry;

pub use builtin::builtin_schemas;
pub use registry::SchemaRegistry;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::extract::JsonPath;
use crate::kubernetes::ResourceKind;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    #[serde(alias = "string", alias = "str")]
    Text,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "float")]
    Real,
    #[serde(alias = "boolean")]
    Bool,
    #[serde(alias = "date")]
    Timestamp,
    /// Memory quantity, stored as integer bytes
    Size,
    /// CPU quantity, stored as real cores
    Cpu,
    /// Duration, stored as integer seconds
    Age,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Real | ColumnType::Size | ColumnType::Cpu | ColumnType::Age
        )
    }

    /// SQL type name used in DDL rendering
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer | ColumnType::Size | ColumnType::Age => "BIGINT",
            ColumnType::Real | ColumnType::Cpu => "DOUBLE",
            ColumnType::Bool => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Size => "size",
            ColumnType::Cpu => "cpu",
            ColumnType::Age => "age",
        };
        f.write_str(name)
    }
}

/// How many values a column contributes per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiplicity {
    /// Zero or one value per row
    #[default]
    Single,
    /// Each matched value becomes its own row
    Expand,
    /// All matched values are added up; no match is null
    Sum,
}

/// Whether a resource kind is fetched per namespace or cluster-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopePolicy {
    #[default]
    Namespaced,
    Cluster,
}

/// One column of a table. Names are stored lowercase, the form unquoted
/// SQL identifiers resolve to.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub path: JsonPath,
    pub data_type: ColumnType,
    pub multiplicity: Multiplicity,
}

impl ColumnSpec {
    pub fn new(
        name: &str,
        path: &str,
        data_type: ColumnType,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            name: name.to_lowercase(),
            path: JsonPath::parse(path)?,
            data_type,
            multiplicity: Multiplicity::Single,
        })
    }

    /// Mark this column as the expansion column
    pub fn expanded(mut self) -> Self {
        self.multiplicity = Multiplicity::Expand;
        self
    }

    /// Mark this column as the sum of every value its path matches
    pub fn summed(mut self) -> Self {
        self.multiplicity = Multiplicity::Sum;
        self
    }

    pub fn is_expand(&self) -> bool {
        self.multiplicity == Multiplicity::Expand
    }
}

/// A validated table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    resource: ResourceKind,
    scope: ScopePolicy,
    columns: Vec<ColumnSpec>,
}

impl TableSchema {
    /// Build a schema, rejecting duplicate columns, more than one expand
    /// column, and relative paths without an expand column.
    pub fn new(
        name: &str,
        resource: ResourceKind,
        scope: ScopePolicy,
        columns: Vec<ColumnSpec>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.to_lowercase();
        if columns.is_empty() {
            return Err(ConfigurationError::EmptySchema(name));
        }

        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(ConfigurationError::DuplicateColumn {
                    table: name,
                    column: col.name.clone(),
                });
            }
            if col.multiplicity == Multiplicity::Sum && !col.data_type.is_numeric() {
                return Err(ConfigurationError::SumNotNumeric {
                    table: name,
                    column: col.name.clone(),
                    data_type: col.data_type,
                });
            }
        }

        let expand: Vec<String> = columns
            .iter()
            .filter(|c| c.is_expand())
            .map(|c| c.name.clone())
            .collect();
        if expand.len() > 1 {
            return Err(ConfigurationError::MultipleExpandColumns {
                table: name,
                columns: expand,
            });
        }
        if expand.is_empty()
            && let Some(col) = columns.iter().find(|c| c.path.is_relative())
        {
            return Err(ConfigurationError::RelativePathWithoutExpand {
                table: name,
                column: col.name.clone(),
            });
        }

        Ok(Self {
            name,
            resource,
            scope,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &ResourceKind {
        &self.resource
    }

    pub fn scope(&self) -> ScopePolicy {
        self.scope
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// The expansion column, if any
    pub fn expand_column(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.is_expand())
    }

    /// `CREATE TABLE` statement describing this schema
    pub fn ddl(&self) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type.sql_name()))
            .collect();
        format!("CREATE TABLE {} ({})", self.name, cols.join(", "))
    }
}

/// User-supplied table definition, as found in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Resource kind passed to the inventory command, e.g. `pods`
    pub resource: String,
    #[serde(default = "default_namespaced")]
    pub namespaced: bool,
    pub columns: Vec<ColumnDef>,
}

fn default_namespaced() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub path: String,
    #[serde(default, rename = "type")]
    pub data_type: ColumnType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expand: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sum: bool,
}

impl TryFrom<&TableDef> for TableSchema {
    type Error = ConfigurationError;

    fn try_from(def: &TableDef) -> Result<Self, Self::Error> {
        let columns = def
            .columns
            .iter()
            .map(|c| {
                let col = ColumnSpec::new(&c.name, &c.path, c.data_type)?;
                match (c.expand, c.sum) {
                    (true, true) => Err(ConfigurationError::ExpandAndSum {
                        table: def.name.clone(),
                        column: col.name,
                    }),
                    (true, false) => Ok(col.expanded()),
                    (false, true) => Ok(col.summed()),
                    (false, false) => Ok(col),
                }
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;
        let scope = if def.namespaced {
            ScopePolicy::Namespaced
        } else {
            ScopePolicy::Cluster
        };
        TableSchema::new(&def.name, ResourceKind::new(&def.resource), scope, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, path: &str) -> ColumnSpec {
        ColumnSpec::new(name, path, ColumnType::Text).unwrap()
    }

    #[test]
    fn test_valid_schema() {
        let schema = TableSchema::new(
            "Pods",
            ResourceKind::new("pods"),
            ScopePolicy::Namespaced,
            vec![col("name", ".metadata.name"), col("phase", ".status.phase")],
        )
        .unwrap();
        assert_eq!(schema.name(), "pods");
        assert_eq!(schema.column_names(), vec!["name", "phase"]);
        assert!(schema.expand_column().is_none());
    }

    #[test]
    fn test_column_names_lowercased() {
        let err = TableSchema::new(
            "pods",
            ResourceKind::new("pods"),
            ScopePolicy::Namespaced,
            vec![col("nodeName", ".spec.nodeName"), col("NODENAME", ".spec.nodeName")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateColumn { ref column, .. } if column == "nodename"));
        assert_eq!(col("containerNames", ".spec.containers[].name").name, "containernames");
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = TableSchema::new(
            "pods",
            ResourceKind::new("pods"),
            ScopePolicy::Namespaced,
            vec![col("name", ".metadata.name"), col("name", ".spec.nodeName")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateColumn { ref column, .. } if column == "name"));
    }

    #[test]
    fn test_multiple_expand_columns_rejected() {
        let err = TableSchema::new(
            "pods",
            ResourceKind::new("pods"),
            ScopePolicy::Namespaced,
            vec![
                col("containers", ".spec.containers[]").expanded(),
                col("volumes", ".spec.volumes[]").expanded(),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::MultipleExpandColumns { .. }));
    }

    #[test]
    fn test_relative_path_needs_expand() {
        let err = TableSchema::new(
            "pods",
            ResourceKind::new("pods"),
            ScopePolicy::Namespaced,
            vec![col("image", "@.image")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::RelativePathWithoutExpand { .. }));
    }

    #[test]
    fn test_empty_schema_rejected() {
        let err = TableSchema::new("x", ResourceKind::new("x"), ScopePolicy::Cluster, vec![])
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptySchema(_)));
    }

    #[test]
    fn test_ddl() {
        let schema = TableSchema::new(
            "nodes",
            ResourceKind::new("nodes"),
            ScopePolicy::Cluster,
            vec![
                col("name", ".metadata.name"),
                ColumnSpec::new("cpu", ".status.capacity.cpu", ColumnType::Cpu).unwrap(),
                ColumnSpec::new("mem", ".status.capacity.memory", ColumnType::Size).unwrap(),
            ],
        )
        .unwrap();
        assert_eq!(
            schema.ddl(),
            "CREATE TABLE nodes (name TEXT, cpu DOUBLE, mem BIGINT)"
        );
    }

    #[test]
    fn test_table_def_from_json() {
        let json = r#"{
            "name": "containers",
            "resource": "pods",
            "columns": [
                {"name": "pod", "path": ".metadata.name"},
                {"name": "container", "path": ".spec.containers[]", "expand": true},
                {"name": "image", "path": "@.image", "type": "string"},
                {"name": "restarts", "path": ".status.restartCount", "type": "int"}
            ]
        }"#;
        let def: TableDef = serde_json::from_str(json).unwrap();
        assert!(def.namespaced);
        let schema = TableSchema::try_from(&def).unwrap();
        assert_eq!(schema.expand_column().map(|c| c.name.as_str()), Some("container"));
        assert_eq!(schema.columns()[2].data_type, ColumnType::Text);
        assert_eq!(schema.columns()[3].data_type, ColumnType::Integer);
        assert_eq!(schema.scope(), ScopePolicy::Namespaced);
    }

    #[test]
    fn test_sum_columns() {
        let def: TableDef = serde_json::from_str(
            r#"{"name": "p", "resource": "pods", "columns": [
                {"name": "cpu_req", "path": ".spec.containers[].resources.requests.cpu", "type": "cpu", "sum": true}
            ]}"#,
        )
        .unwrap();
        let schema = TableSchema::try_from(&def).unwrap();
        assert_eq!(schema.columns()[0].multiplicity, Multiplicity::Sum);

        let def: TableDef = serde_json::from_str(
            r#"{"name": "p", "resource": "pods", "columns": [
                {"name": "images", "path": ".spec.containers[].image", "sum": true}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            TableSchema::try_from(&def),
            Err(ConfigurationError::SumNotNumeric { data_type: ColumnType::Text, .. })
        ));

        let def: TableDef = serde_json::from_str(
            r#"{"name": "p", "resource": "pods", "columns": [
                {"name": "c", "path": ".spec.containers[]", "type": "int", "expand": true, "sum": true}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            TableSchema::try_from(&def),
            Err(ConfigurationError::ExpandAndSum { .. })
        ));
    }

    #[test]
    fn test_table_def_bad_path() {
        let def = TableDef {
            name: "t".to_string(),
            resource: "pods".to_string(),
            namespaced: false,
            columns: vec![ColumnDef {
                name: "x".to_string(),
                path: ".a[".to_string(),
                data_type: ColumnType::Text,
                expand: false,
                sum: false,
            }],
        };
        assert!(matches!(
            TableSchema::try_from(&def),
            Err(ConfigurationError::InvalidPath { .. })
        ));
    }
}
