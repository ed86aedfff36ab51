// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-channel debug instrumentation
//!
//! Every pipeline stage reports what it does to one of six named channels.
//! Channels are enabled individually (`-D cache,fetch`) or all at once
//! (`-D all`). Enabled events go to a pluggable [`DebugSink`]; every event,
//! enabled or not, is also mirrored to `tracing` so it reaches the log file.
//!
//! Events for disabled channels are never formatted.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::error::ConfigurationError;

/// A debug channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Cache hit/miss/staleness decisions
    Cache,
    /// Inventory command invocations
    Fetch,
    /// Table schemas handed to the engine
    Schema,
    /// Documents and row counts per payload
    Itemize,
    /// Column value resolution
    Extract,
    /// SQL handed to the embedded engine
    Sqlite,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Cache,
        Channel::Fetch,
        Channel::Schema,
        Channel::Itemize,
        Channel::Extract,
        Channel::Sqlite,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Cache => "cache",
            Channel::Fetch => "fetch",
            Channel::Schema => "schema",
            Channel::Itemize => "itemize",
            Channel::Extract => "extract",
            Channel::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigurationError::InvalidDebugChannel(s.trim().to_string()))
    }
}

/// Parse a comma-separated channel list. `all` enables every channel.
pub fn parse_channels(spec: &str) -> Result<BTreeSet<Channel>, ConfigurationError> {
    let mut channels = BTreeSet::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.eq_ignore_ascii_case("all") {
            channels.extend(Channel::ALL);
        } else {
            channels.insert(part.parse()?);
        }
    }
    Ok(channels)
}

/// A single formatted debug event.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugEvent {
    pub channel: Channel,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
}

impl fmt::Display for DebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.channel, self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Destination for enabled debug events.
pub trait DebugSink: Send + Sync {
    fn emit(&self, event: &DebugEvent);
}

/// Discards everything.
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn emit(&self, _event: &DebugEvent) {}
}

/// Writes one line per event to stderr.
pub struct StderrSink;

impl DebugSink for StderrSink {
    fn emit(&self, event: &DebugEvent) {
        eprintln!("{}", event);
    }
}

/// Collects formatted lines in memory.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Lines emitted on one channel, without the channel prefix
    pub fn channel_lines(&self, channel: Channel) -> Vec<String> {
        let prefix = format!("{}: ", channel);
        self.lines()
            .into_iter()
            .filter_map(|l| l.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl DebugSink for MemorySink {
    fn emit(&self, event: &DebugEvent) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(event.to_string());
        }
    }
}

/// Handle passed to every pipeline stage. Cheap to clone.
#[derive(Clone)]
pub struct Debugger {
    enabled: Arc<BTreeSet<Channel>>,
    sink: Arc<dyn DebugSink>,
}

impl Debugger {
    pub fn new(enabled: BTreeSet<Channel>, sink: Arc<dyn DebugSink>) -> Self {
        Self {
            enabled: Arc::new(enabled),
            sink,
        }
    }

    /// All channels disabled
    pub fn disabled() -> Self {
        Self::new(BTreeSet::new(), Arc::new(NoopSink))
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled.contains(&channel)
    }

    /// Report an event. Fields are only formatted when the channel is
    /// enabled or `tracing` wants debug output.
    pub fn emit(&self, channel: Channel, message: &str, fields: &[(&'static str, &dyn fmt::Display)]) {
        let enabled = self.is_enabled(channel);
        if !enabled && !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }

        let event = DebugEvent {
            channel,
            message: message.to_string(),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        };
        tracing::debug!(channel = channel.name(), "{}", event);
        if enabled {
            self.sink.emit(&event);
        }
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Debugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debugger")
            .field("enabled", &self.enabled)
            .finish()
    }
}
