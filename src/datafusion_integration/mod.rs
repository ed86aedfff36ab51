// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! DataFusion integration for kubetab
//!
//! Materialized tables are loaded into in-memory DataFusion tables, which gives
//! full SQL support including JOINs, aggregations, and subqueries.

mod context;
mod convert;
mod functions;
mod preprocess;

pub use context::DataFusionEngine;
pub use convert::{arrow_schema, arrow_type};
pub use functions::helper_functions;
pub use preprocess::{referenced_tables, validate_read_only};
