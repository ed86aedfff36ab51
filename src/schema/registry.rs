// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{TableDef, TableSchema, builtin_schemas};
use crate::error::ConfigurationError;

/// Table name → schema. Populated once at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, Arc<TableSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing the built-in Kubernetes tables
    pub fn with_builtins() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for schema in builtin_schemas()? {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Add user-defined tables; a name clash with an existing table is an error
    pub fn register_defs(&mut self, defs: &[TableDef]) -> Result<(), ConfigurationError> {
        for def in defs {
            self.register(TableSchema::try_from(def)?)?;
        }
        Ok(())
    }

    pub fn register(&mut self, schema: TableSchema) -> Result<(), ConfigurationError> {
        let name = schema.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(ConfigurationError::DuplicateSchema(name));
        }
        tracing::debug!(table = %name, columns = schema.columns().len(), "Registered table");
        self.tables.insert(name, Arc::new(schema));
        Ok(())
    }

    /// Look up a table by name (case-insensitive)
    pub fn lookup(&self, name: &str) -> Result<Arc<TableSchema>, ConfigurationError> {
        self.tables
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| ConfigurationError::UnknownTable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    /// Registered table names in sorted order
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
