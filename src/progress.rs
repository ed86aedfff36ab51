// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Progress reporting for long-running operations
//!
//! The query session reports fetch and table-build progress here, and the
//! CLI turns it into spinner messages.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Create a spinner with consistent styling
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Progress update message
#[derive(Clone, Debug)]
pub enum ProgressUpdate {
    /// Resource lists are about to be fetched
    StartingFetch { targets: usize },
    /// One resource list is available
    FetchComplete {
        target: String,
        from_cache: bool,
        elapsed_ms: u64,
    },
    /// A table was loaded into the engine
    TableBuilt { table: String, rows: usize },
    /// The query itself is running
    Executing,
}

impl ProgressUpdate {
    /// Spinner text for this update, given the fetch counters
    pub fn message(&self, done: usize, total: usize) -> String {
        match self {
            ProgressUpdate::StartingFetch { targets } => {
                format!("Fetching {} resource list(s)...", targets)
            }
            ProgressUpdate::FetchComplete { target, from_cache, .. } => {
                let how = if *from_cache { "cached" } else { "fetched" };
                format!("[{}/{}] {} {}", done, total, target, how)
            }
            ProgressUpdate::TableBuilt { table, rows } => {
                format!("Built {} ({} rows)", table, rows)
            }
            ProgressUpdate::Executing => "Executing query...".to_string(),
        }
    }
}

/// Progress reporter shared between the session and the CLI
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressUpdate>,
    /// Count of completed fetches for the current query
    fetches_done: AtomicUsize,
    /// Total fetches for the current query
    fetches_total: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            fetches_done: AtomicUsize::new(0),
            fetches_total: AtomicUsize::new(0),
        }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    /// Report fetch start and reset the counters
    pub fn start_fetch(&self, targets: usize) {
        self.fetches_done.store(0, Ordering::SeqCst);
        self.fetches_total.store(targets, Ordering::SeqCst);
        let _ = self.sender.send(ProgressUpdate::StartingFetch { targets });
    }

    /// Report one fetch (or cache read) completing
    pub fn fetch_complete(&self, target: &str, from_cache: bool, elapsed_ms: u64) {
        self.fetches_done.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(ProgressUpdate::FetchComplete {
            target: target.to_string(),
            from_cache,
            elapsed_ms,
        });
    }

    /// Report a table loaded into the engine
    pub fn table_built(&self, table: &str, rows: usize) {
        let _ = self.sender.send(ProgressUpdate::TableBuilt {
            table: table.to_string(),
            rows,
        });
    }

    /// Report query execution start
    pub fn executing(&self) {
        let _ = self.sender.send(ProgressUpdate::Executing);
    }

    /// Get current progress (done/total)
    pub fn progress(&self) -> (usize, usize) {
        (
            self.fetches_done.load(Ordering::SeqCst),
            self.fetches_total.load(Ordering::SeqCst),
        )
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to progress reporter
pub type ProgressHandle = Arc<ProgressReporter>;

/// Create a new progress reporter handle
pub fn create_progress_handle() -> ProgressHandle {
    Arc::new(ProgressReporter::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter_new() {
        let reporter = ProgressReporter::new();
        assert_eq!(reporter.progress(), (0, 0));
    }

    #[test]
    fn test_start_fetch() {
        let reporter = ProgressReporter::new();
        reporter.start_fetch(3);
        assert_eq!(reporter.progress(), (0, 3));
    }

    #[test]
    fn test_fetch_complete_increments() {
        let reporter = ProgressReporter::new();
        reporter.start_fetch(2);

        reporter.fetch_complete("pods@dev/default", false, 100);
        assert_eq!(reporter.progress(), (1, 2));

        reporter.fetch_complete("nodes@dev/cluster", true, 1);
        assert_eq!(reporter.progress(), (2, 2));
    }

    #[test]
    fn test_start_fetch_resets_counters() {
        let reporter = ProgressReporter::new();
        reporter.start_fetch(3);
        reporter.fetch_complete("a", false, 10);
        assert_eq!(reporter.progress(), (1, 3));

        reporter.start_fetch(2);
        assert_eq!(reporter.progress(), (0, 2));
    }

    #[test]
    fn test_subscribe_receives_updates() {
        let reporter = ProgressReporter::new();
        let mut receiver = reporter.subscribe();

        reporter.start_fetch(2);
        reporter.fetch_complete("pods@dev/default", true, 5);
        reporter.table_built("pods", 12);
        reporter.executing();

        let updates: Vec<_> = std::iter::from_fn(|| receiver.try_recv().ok()).collect();
        assert_eq!(updates.len(), 4);
        assert!(matches!(updates[0], ProgressUpdate::StartingFetch { targets: 2 }));
        assert!(matches!(
            updates[1],
            ProgressUpdate::FetchComplete { from_cache: true, .. }
        ));
        assert!(matches!(updates[2], ProgressUpdate::TableBuilt { rows: 12, .. }));
        assert!(matches!(updates[3], ProgressUpdate::Executing));
    }

    #[test]
    fn test_update_messages() {
        let update = ProgressUpdate::FetchComplete {
            target: "pods@dev/default".to_string(),
            from_cache: false,
            elapsed_ms: 40,
        };
        assert_eq!(update.message(1, 3), "[1/3] pods@dev/default fetched");
        assert_eq!(
            ProgressUpdate::TableBuilt {
                table: "pods".to_string(),
                rows: 4
            }
            .message(0, 0),
            "Built pods (4 rows)"
        );
    }

    #[test]
    fn test_create_progress_handle() {
        let handle = create_progress_handle();
        assert_eq!(handle.progress(), (0, 0));
    }
}
