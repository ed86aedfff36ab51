// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::collections::BTreeSet;

use clap::{Parser, ValueEnum};

use crate::config::Settings;
use crate::debug::{Channel, parse_channels};
use crate::error::ConfigurationError;
use crate::extract::parse_age;
use crate::kubernetes::{RefreshPolicy, StalePolicy};

#[derive(Parser, Debug)]
#[command(name = "kubetab")]
#[command(author, version, about = "Query Kubernetes resources using SQL")]
pub struct Args {
    /// SQL query to execute
    #[arg(value_name = "SQL", required_unless_present = "file", conflicts_with = "file")]
    pub query: Option<String>,

    /// Execute queries from a file
    #[arg(short, long)]
    pub file: Option<String>,

    /// Cache expiration, e.g. 90s, 5m, 1h
    #[arg(short, long, value_name = "AGE", value_parser = parse_timeout)]
    pub timeout: Option<u64>,

    /// Always refresh cached resource lists
    #[arg(short, long, conflicts_with = "cache")]
    pub update: bool,

    /// Use cached resource lists regardless of age
    #[arg(long)]
    pub cache: bool,

    /// Skip the staleness notice
    #[arg(short, long)]
    pub reckless: bool,

    /// Serve expired cache entries when a refresh fails
    #[arg(long)]
    pub serve_stale: bool,

    /// Namespace to query (repeatable)
    #[arg(short, long = "namespace", value_name = "NAMESPACE", conflicts_with = "all_namespaces")]
    pub namespace: Vec<String>,

    /// Query all namespaces
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Kubernetes context to use (default: kubectl's current context)
    #[arg(short, long, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Debug channels: cache,fetch,schema,itemize,extract,sqlite or all
    #[arg(short = 'D', long, value_name = "CHANNELS")]
    pub debug: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Omit column headers in output
    #[arg(long)]
    pub no_headers: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Fold flag overrides into the configured settings
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(timeout) = self.timeout {
            settings.cache_timeout_secs = timeout;
        }
        if self.reckless {
            settings.reckless = true;
        }
        if self.serve_stale {
            settings.serve_stale_on_error = true;
        }
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        if self.update {
            RefreshPolicy::Always
        } else if self.cache {
            RefreshPolicy::Never
        } else {
            RefreshPolicy::Check
        }
    }

    pub fn stale_policy(&self, settings: &Settings) -> StalePolicy {
        if settings.serve_stale_on_error {
            StalePolicy::ServeStale
        } else {
            StalePolicy::Fail
        }
    }

    /// Enabled debug channels
    pub fn debug_channels(&self) -> Result<BTreeSet<Channel>, ConfigurationError> {
        match &self.debug {
            Some(spec) => parse_channels(spec),
            None => Ok(BTreeSet::new()),
        }
    }
}

fn parse_timeout(s: &str) -> Result<u64, String> {
    parse_age(s)
        .filter(|secs| *secs >= 0)
        .map(|secs| secs as u64)
        .ok_or_else(|| format!("invalid age `{}` (expected e.g. 90s, 5m, 1h)", s))
}

#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
    Yaml,
}
