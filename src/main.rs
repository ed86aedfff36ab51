// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

use kubetab::cli::{Args, split_statements};
use kubetab::config::{self, Config};
use kubetab::datafusion_integration::DataFusionEngine;
use kubetab::debug::{Debugger, StderrSink};
use kubetab::kubernetes::{CacheManager, CacheSettings, Fetcher, KubectlInventory};
use kubetab::output::QueryResult;
use kubetab::progress::{ProgressHandle, create_progress_handle, create_spinner};
use kubetab::schema::SchemaRegistry;
use kubetab::session::{NamespaceSelection, QuerySession, SessionOptions};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool, to_stderr: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    // Create log directory
    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // File appender with size-based rotation:
    // - Max 10MB per file
    // - Keep up to 5 files (total max ~50MB)
    // - Also rotate daily
    let log_path = log_dir.join("kubetab.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024); // 10MB

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    // Use non-blocking writer for better performance
    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "kubetab=debug" } else { "kubetab=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // File layer (always enabled)
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if to_stderr && verbose {
        // Both file and stderr output
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        // File only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Always log to file (~/.kubetab/log/kubetab.log); with -v also to stderr
    init_logging(args.verbose, args.verbose);

    let queries = if let Some(query) = &args.query {
        vec![query.clone()]
    } else if let Some(file) = &args.file {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read query file: {}", file))?;
        split_statements(&content)
    } else {
        return Ok(());
    };

    let mut config = Config::load()?;
    args.apply_to(&mut config.settings);
    let settings = config.settings.clone();

    let debug = Debugger::new(args.debug_channels()?, Arc::new(StderrSink));

    let mut registry = SchemaRegistry::with_builtins()?;
    registry.register_defs(&config.tables)?;

    let inventory = Arc::new(KubectlInventory::new());
    let context = match &args.context {
        Some(context) => context.clone(),
        None => inventory
            .current_context()
            .await
            .context("No --context given and kubectl has no current context")?,
    };
    tracing::info!(context = %context, "Using Kubernetes context");

    let fetcher = Fetcher::new(
        inventory,
        Duration::from_secs(settings.fetch_timeout_secs),
        debug.clone(),
    );
    let cache_settings = CacheSettings {
        ttl: Duration::from_secs(settings.cache_timeout_secs),
        refresh: args.refresh_policy(),
        stale: args.stale_policy(&settings),
    };
    let cache = CacheManager::new(
        CacheManager::default_cache_dir()?,
        cache_settings,
        fetcher,
        debug.clone(),
    );

    let options = SessionOptions {
        context,
        namespaces: if args.all_namespaces {
            NamespaceSelection::All
        } else if args.namespace.is_empty() {
            NamespaceSelection::default()
        } else {
            NamespaceSelection::Named(args.namespace.clone())
        },
        max_concurrent_fetches: settings.max_concurrent_fetches,
    };

    // Ctrl-C abandons in-flight fetches
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let progress = create_progress_handle();
    let mut session = QuerySession::new(
        &registry,
        &cache,
        DataFusionEngine::new()?,
        options,
        debug,
    )
    .with_progress(Arc::clone(&progress))
    .with_cancellation(cancel);

    // Debug output and the spinner would interleave on stderr
    let show_spinner = args.debug.is_none() && !args.verbose;

    for sql in queries {
        match run_query(&mut session, &progress, &sql, show_spinner).await {
            Ok(result) => {
                if !settings.reckless
                    && let Some(age) = session.max_cached_age()
                {
                    eprintln!("(Data may be up to {} seconds old.)", age.as_secs());
                }
                println!("{}", result.format(&args.output, args.no_headers));
            }
            Err(e) => {
                eprintln!("Error executing query: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Run one query, driving a spinner from progress updates
async fn run_query(
    session: &mut QuerySession<'_>,
    progress: &ProgressHandle,
    sql: &str,
    show_spinner: bool,
) -> Result<QueryResult, kubetab::error::SessionError> {
    if !show_spinner {
        return session.run(sql).await;
    }

    let spinner = create_spinner("Running query...");
    let mut progress_rx = progress.subscribe();
    let result = {
        let mut run_handle = Box::pin(session.run(sql));
        loop {
            tokio::select! {
                biased;
                update = progress_rx.recv() => {
                    if let Ok(update) = update {
                        let (done, total) = progress.progress();
                        spinner.set_message(update.message(done, total));
                    }
                }
                result = &mut run_handle => {
                    break result;
                }
            }
        }
    };
    spinner.finish_and_clear();
    result
}
