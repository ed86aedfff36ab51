// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration persistence for kubetab
//!
//! All kubetab data is stored under ~/.kubetab/ (or `$KUBETAB_HOME`):
//! - ~/.kubetab/config.json - settings and user-defined tables
//! - ~/.kubetab/cache/ - cached resource lists
//! - ~/.kubetab/log/ - log files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::schema::TableDef;

/// Overrides the base directory
pub const HOME_ENV: &str = "KUBETAB_HOME";

/// Get the base kubetab directory (~/.kubetab/)
pub fn base_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|p| p.join(".kubetab"))
        .context("Could not determine home directory")
}

/// Tunables that CLI flags may override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds a cached resource list stays fresh
    pub cache_timeout_secs: u64,
    /// Serve an expired cache entry when refreshing it fails
    pub serve_stale_on_error: bool,
    pub max_concurrent_fetches: usize,
    /// Seconds before a single inventory command is abandoned
    pub fetch_timeout_secs: u64,
    /// Suppress the staleness notice
    pub reckless: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_timeout_secs: 120,
            serve_stale_on_error: false,
            max_concurrent_fetches: 8,
            fetch_timeout_secs: 60,
            reckless: false,
        }
    }
}

/// kubetab configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    /// User-defined tables, registered after the built-in ones
    #[serde(default)]
    pub tables: Vec<TableDef>,
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the config file path (~/.kubetab/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }
}
