// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Query Kubernetes resources with SQL
//!
//! Resource lists are fetched with `kubectl`, cached on disk, flattened into
//! tables by declarative JSON paths and queried with DataFusion.

pub mod cli;
pub mod config;
pub mod datafusion_integration;
pub mod debug;
pub mod error;
pub mod extract;
pub mod kubernetes;
pub mod output;
pub mod progress;
pub mod schema;
pub mod session;
pub mod table;
