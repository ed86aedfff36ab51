// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! On-disk cache of fetched resource lists
//!
//! Each (kind, scope) pair is cached in its own file so entries can be
//! inspected, refreshed and deleted independently:
//!
//! ```text
//! ~/.kubetab/cache/
//!   <context>/
//!     default.pods.json        # pods in namespace "default"
//!     __all.pods.json          # pods in all namespaces
//!     __cluster.nodes.json     # cluster-scoped nodes
//! ```
//!
//! Each file holds the fetch timestamp and the payload exactly as the
//! inventory command printed it.
//!
//! Thread safety:
//! - a per-key async lock serializes fetch-and-write for one key, so two
//!   concurrent lookups of the same key perform one fetch
//! - atomic file writes (tempfile + rename) protect against crashes and
//!   concurrent processes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{debug, warn};

use super::{CacheKey, Fetcher, ResourceKind, ResourceScope};
use crate::config;
use crate::debug::{Channel, Debugger};
use crate::error::{CacheError, CacheIoError};

/// Get current UNIX timestamp in seconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Source of the current time, in UNIX seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        current_timestamp()
    }
}

/// When to refresh an existing cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Refresh entries older than the TTL
    #[default]
    Check,
    /// Always refresh
    Always,
    /// Use any existing entry regardless of age
    Never,
}

/// What to do when a refresh fails but an older entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Surface the fetch error
    #[default]
    Fail,
    /// Serve the stale entry with a warning
    ServeStale,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub refresh: RefreshPolicy,
    pub stale: StalePolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            refresh: RefreshPolicy::default(),
            stale: StalePolicy::default(),
        }
    }
}

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// A fresh cache entry
    Cache,
    /// Just fetched
    Fetched,
    /// An expired entry served because the refresh failed
    Stale,
}

/// A payload returned by the cache manager.
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub payload: String,
    pub fetched_at: u64,
    pub age: Duration,
    pub source: PayloadSource,
}

/// Cache file contents as written
#[derive(Serialize)]
struct CacheEntryRef<'a> {
    kind: &'a str,
    scope: String,
    fetched_at: u64,
    payload: &'a RawValue,
}

/// Cache file contents as read back
#[derive(Deserialize)]
struct CacheEntry {
    fetched_at: u64,
    payload: Box<RawValue>,
}

/// Atomically write content to a file using tempfile + rename
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use tempfile::NamedTempFile;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    // Create temp file in same directory as target so the rename stays on one filesystem
    let temp_file = NamedTempFile::new_in(dir)?;
    std::fs::write(temp_file.path(), content)?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Sanitize a string for use as a filename
/// Characters other than alphanumerics, dash, dot and underscore are
/// percent-encoded, so distinct names never share a file
fn sanitize_filename(name: &str) -> String {
    let mut safe = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
            safe.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                safe.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    // Never produce "." or ".."
    if safe.chars().all(|c| c == '.') {
        safe.replace('.', "%2E")
    } else {
        safe
    }
}

/// Check if a cached entry is still fresh based on fetch time and TTL
fn is_cache_fresh(fetched_at: u64, now: u64, ttl: Duration) -> bool {
    now.saturating_sub(fetched_at) < ttl.as_secs()
}

/// TTL cache in front of a [`Fetcher`].
pub struct CacheManager {
    base_dir: PathBuf,
    settings: CacheSettings,
    fetcher: Fetcher,
    clock: Arc<dyn Clock>,
    /// One async lock per key, created on first use
    locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    debug: Debugger,
}

impl CacheManager {
    pub fn new(base_dir: PathBuf, settings: CacheSettings, fetcher: Fetcher, debug: Debugger) -> Self {
        Self {
            base_dir,
            settings,
            fetcher,
            clock: Arc::new(SystemClock),
            locks: Mutex::new(HashMap::new()),
            debug,
        }
    }

    /// Replace the clock used for freshness checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the default cache directory (~/.kubetab/cache/)
    pub fn default_cache_dir() -> anyhow::Result<PathBuf> {
        Ok(config::base_dir()?.join("cache"))
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Deterministic file path for a key
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.base_dir
            .join(sanitize_filename(key.scope.context()))
            .join(format!(
                "{}.{}.json",
                sanitize_filename(key.scope.file_component()),
                sanitize_filename(key.kind.as_str())
            ))
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Return the payload for a kind and scope, fetching it if the cache
    /// entry is missing, expired or a refresh is forced
    pub async fn get(
        &self,
        kind: &ResourceKind,
        scope: &ResourceScope,
    ) -> Result<CachedPayload, CacheError> {
        let key = CacheKey::new(kind.clone(), scope.clone());
        let path = self.entry_path(&key);
        let path_display = path.display();

        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let existing = self.read_entry(&path)?;

        let reason = match &existing {
            Some(entry) => {
                let age = now.saturating_sub(entry.fetched_at);
                let fresh = is_cache_fresh(entry.fetched_at, now, self.settings.ttl);
                let use_cached = match self.settings.refresh {
                    RefreshPolicy::Never => true,
                    RefreshPolicy::Check => fresh,
                    RefreshPolicy::Always => false,
                };
                if use_cached {
                    self.debug.emit(
                        Channel::Cache,
                        "hit",
                        &[("key", &key), ("age", &format!("{}s", age)), ("path", &path_display)],
                    );
                    return Ok(CachedPayload {
                        payload: entry.payload.get().to_string(),
                        fetched_at: entry.fetched_at,
                        age: Duration::from_secs(age),
                        source: PayloadSource::Cache,
                    });
                }
                let reason = if fresh { "forced" } else { "stale" };
                self.debug.emit(
                    Channel::Cache,
                    reason,
                    &[("key", &key), ("age", &format!("{}s", age)), ("path", &path_display)],
                );
                reason
            }
            None => {
                self.debug
                    .emit(Channel::Cache, "miss", &[("key", &key), ("path", &path_display)]);
                "missing"
            }
        };

        self.debug
            .emit(Channel::Cache, "refresh", &[("key", &key), ("reason", &reason)]);

        match self.fetcher.fetch(kind, scope).await {
            Ok(payload) => {
                self.write_entry(&path, &key, now, &payload)?;
                debug!(key = %key, path = %path_display, bytes = payload.len(), "Cache entry written");
                Ok(CachedPayload {
                    payload,
                    fetched_at: now,
                    age: Duration::ZERO,
                    source: PayloadSource::Fetched,
                })
            }
            Err(e) => match (existing, self.settings.stale) {
                (Some(entry), StalePolicy::ServeStale) => {
                    let age = now.saturating_sub(entry.fetched_at);
                    warn!(key = %key, age_secs = age, error = %e, "Refresh failed, serving stale cache entry");
                    self.debug.emit(
                        Channel::Cache,
                        "serving stale",
                        &[("key", &key), ("age", &format!("{}s", age)), ("error", &e)],
                    );
                    Ok(CachedPayload {
                        payload: entry.payload.get().to_string(),
                        fetched_at: entry.fetched_at,
                        age: Duration::from_secs(age),
                        source: PayloadSource::Stale,
                    })
                }
                _ => Err(e.into()),
            },
        }
    }

    /// Read a cache file. Missing or unparseable files are treated as absent.
    fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>, CacheIoError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheIoError {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cache file");
                self.debug.emit(
                    Channel::Cache,
                    "corrupt entry ignored",
                    &[("path", &path.display()), ("error", &e)],
                );
                Ok(None)
            }
        }
    }

    fn write_entry(
        &self,
        path: &Path,
        key: &CacheKey,
        fetched_at: u64,
        payload: &str,
    ) -> Result<(), CacheIoError> {
        let io_error = |source| CacheIoError {
            path: path.to_path_buf(),
            source,
        };

        let raw: &RawValue = serde_json::from_str(payload)
            .map_err(|e| io_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let entry = CacheEntryRef {
            kind: key.kind.as_str(),
            scope: key.scope.to_string(),
            fetched_at,
            payload: raw,
        };
        let content = serde_json::to_vec(&entry)
            .map_err(|e| io_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        atomic_write(path, &content).map_err(io_error)
    }
}
