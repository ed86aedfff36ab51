// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error types for kubetab
//!
//! Each pipeline stage has its own error type. Only `SessionError` reaches
//! the caller of a query; the others are either absorbed (extraction and
//! coercion problems become diagnostics) or wrapped with the table name.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::schema::ColumnType;

/// Failure to obtain a payload from the inventory command.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The command ran and exited unsuccessfully.
    #[error("`{command}` failed (exit code {}): {}", exit_code_display(.exit_code), .stderr.trim())]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The command did not finish within the fetch timeout.
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// The command succeeded but did not print a JSON document.
    #[error("`{command}` returned malformed JSON: {source}")]
    MalformedPayload {
        command: String,
        source: serde_json::Error,
    },

    /// The command printed bytes that are not valid UTF-8.
    #[error("`{command}` returned non-UTF-8 output: {source}")]
    InvalidUtf8 {
        command: String,
        source: std::string::FromUtf8Error,
    },
}

fn exit_code_display(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

/// Failure reading or writing a cache entry.
#[derive(Debug, Error)]
#[error("cache I/O error at {}: {source}", .path.display())]
pub struct CacheIoError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Anything the cache manager can fail with.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Io(#[from] CacheIoError),
}

/// Per-document extraction failure. The document is skipped.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document is not a JSON object")]
    MalformedDocument,

    #[error("column `{column}` is single-valued but its path matched {count} values")]
    MultipleMatches { column: String, count: usize },
}

/// A value could not be converted to its column type. The cell becomes null.
#[derive(Debug, Error)]
#[error("cannot convert {value} to {expected}")]
pub struct CoercionError {
    pub expected: ColumnType,
    pub value: String,
}

/// Invalid schemas, paths, table references or debug settings.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("table `{0}` is already defined")]
    DuplicateSchema(String),

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("table `{table}` defines column `{column}` more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table `{table}` has more than one expand column: {}", .columns.join(", "))]
    MultipleExpandColumns { table: String, columns: Vec<String> },

    #[error("column `{column}` of table `{table}` uses an element-relative path but the table has no expand column")]
    RelativePathWithoutExpand { table: String, column: String },

    #[error("table `{0}` has no columns")]
    EmptySchema(String),

    #[error("column `{column}` of table `{table}` is summed but has non-numeric type {data_type}")]
    SumNotNumeric {
        table: String,
        column: String,
        data_type: ColumnType,
    },

    #[error("column `{column}` of table `{table}` cannot be both expand and sum")]
    ExpandAndSum { table: String, column: String },

    #[error("invalid path `{path}` at offset {offset}: {reason}")]
    InvalidPath {
        path: String,
        offset: usize,
        reason: String,
    },

    #[error("unknown debug channel `{0}` (expected one of: cache, fetch, schema, itemize, extract, sqlite, all)")]
    InvalidDebugChannel(String),
}

/// Errors raised by the relational engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("table `{0}` was not created")]
    MissingTable(String),

    #[error(transparent)]
    DataFusion(#[from] datafusion::error::DataFusionError),

    #[error(transparent)]
    Arrow(#[from] datafusion::arrow::error::ArrowError),
}

/// Why a table could not be built for a query.
#[derive(Debug, Error)]
pub enum TableBuildError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("cached payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors returned to the caller of a query.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("kubetab is read-only: {0}")]
    ReadOnly(String),

    #[error("failed to build table `{table}`: {source}")]
    TableBuild {
        table: String,
        #[source]
        source: TableBuildError,
    },

    #[error("query failed: {0}")]
    Query(#[source] EngineError),

    #[error("query cancelled")]
    Cancelled,
}
