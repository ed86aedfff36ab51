// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Query sessions: fetch what a query needs, build its tables, run it
//!
//! A session resolves the tables a query references, fetches every
//! (resource kind, scope) pair they need through the cache in parallel,
//! extracts and loads the rows, and hands the untouched query text to the
//! relational engine. Any table that cannot be built aborts the query.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::datafusion_integration::{DataFusionEngine, referenced_tables, validate_read_only};
use crate::debug::{Channel, Debugger};
use crate::error::{CacheError, SessionError, TableBuildError};
use crate::extract::{RowExtractor, split_documents};
use crate::kubernetes::{CacheKey, CacheManager, CachedPayload, PayloadSource, ResourceScope};
use crate::output::QueryResult;
use crate::progress::ProgressHandle;
use crate::schema::{ScopePolicy, SchemaRegistry, TableSchema};
use crate::table::{RelationalEngine, TableBuilder};

/// Namespaces that namespaced tables are fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceSelection {
    /// One fetch per listed namespace
    Named(Vec<String>),
    /// A single all-namespaces fetch
    All,
}

impl Default for NamespaceSelection {
    fn default() -> Self {
        NamespaceSelection::Named(vec!["default".to_string()])
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Kube context every scope is bound to
    pub context: String,
    pub namespaces: NamespaceSelection,
    /// Upper bound on fetches in flight at once
    pub max_concurrent_fetches: usize,
}

impl SessionOptions {
    pub fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            namespaces: NamespaceSelection::default(),
            max_concurrent_fetches: 8,
        }
    }

    /// Scopes a table's resource is fetched in, in a stable order
    pub fn scopes_for(&self, policy: ScopePolicy) -> Vec<ResourceScope> {
        let context = self.context.clone();
        match (policy, &self.namespaces) {
            (ScopePolicy::Cluster, _) => vec![ResourceScope::Cluster { context }],
            (ScopePolicy::Namespaced, NamespaceSelection::All) => {
                vec![ResourceScope::AllNamespaces { context }]
            }
            (ScopePolicy::Namespaced, NamespaceSelection::Named(names)) => {
                let mut seen = BTreeSet::new();
                names
                    .iter()
                    .filter(|ns| seen.insert(ns.as_str()))
                    .map(|ns| ResourceScope::Namespace {
                        context: context.clone(),
                        namespace: ns.clone(),
                    })
                    .collect()
            }
        }
    }
}

/// One referenced table and the payloads it is built from
struct TablePlan {
    schema: Arc<TableSchema>,
    keys: Vec<CacheKey>,
}

/// Runs queries against one engine instance.
pub struct QuerySession<'a, E: RelationalEngine = DataFusionEngine> {
    registry: &'a SchemaRegistry,
    cache: &'a CacheManager,
    engine: E,
    options: SessionOptions,
    debug: Debugger,
    progress: Option<ProgressHandle>,
    cancel: CancellationToken,
    max_cached_age: Option<Duration>,
}

impl<'a, E: RelationalEngine> QuerySession<'a, E> {
    pub fn new(
        registry: &'a SchemaRegistry,
        cache: &'a CacheManager,
        engine: E,
        options: SessionOptions,
        debug: Debugger,
    ) -> Self {
        Self {
            registry,
            cache,
            engine,
            options,
            debug,
            progress: None,
            cancel: CancellationToken::new(),
            max_cached_age: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Age of the oldest cache-served payload used by the last query, if any
    /// payload came from the cache rather than a fresh fetch
    pub fn max_cached_age(&self) -> Option<Duration> {
        self.max_cached_age
    }

    /// Run one SQL statement
    pub async fn run(&mut self, sql: &str) -> Result<QueryResult, SessionError> {
        self.max_cached_age = None;
        validate_read_only(sql)?;

        let plans = self.plan(sql)?;
        let payloads = self.fetch_all(&plans).await?;

        self.max_cached_age = payloads
            .values()
            .filter(|p| p.source != PayloadSource::Fetched)
            .map(|p| p.age)
            .max();

        for plan in &plans {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            self.build_table(plan, &payloads)
                .await
                .map_err(|source| SessionError::TableBuild {
                    table: plan.schema.name().to_string(),
                    source,
                })?;
        }

        self.execute(sql).await
    }

    /// Resolve referenced tables and the cache keys each one needs
    fn plan(&self, sql: &str) -> Result<Vec<TablePlan>, SessionError> {
        referenced_tables(sql)
            .iter()
            .map(|name| -> Result<TablePlan, SessionError> {
                let schema = self.registry.lookup(name)?;
                let keys = self
                    .options
                    .scopes_for(schema.scope())
                    .into_iter()
                    .map(|scope| CacheKey::new(schema.resource().clone(), scope))
                    .collect();
                Ok(TablePlan { schema, keys })
            })
            .collect()
    }

    /// Fetch every distinct key in parallel, bounded by the concurrency limit
    async fn fetch_all(
        &self,
        plans: &[TablePlan],
    ) -> Result<HashMap<CacheKey, CachedPayload>, SessionError> {
        let targets: BTreeSet<&CacheKey> = plans.iter().flat_map(|p| p.keys.iter()).collect();
        if targets.is_empty() {
            return Ok(HashMap::new());
        }

        let cache = self.cache;
        let progress = self.progress.as_deref();
        if let Some(progress) = progress {
            progress.start_fetch(targets.len());
        }
        debug!(targets = targets.len(), "Fetching resource lists");

        let fetches = futures::stream::iter(targets)
            .map(|key| async move {
                let start = Instant::now();
                let result = cache.get(&key.kind, &key.scope).await;
                if let (Some(progress), Ok(payload)) = (progress, &result) {
                    progress.fetch_complete(
                        &key.to_string(),
                        payload.source != PayloadSource::Fetched,
                        start.elapsed().as_millis() as u64,
                    );
                }
                (key, result)
            })
            .buffer_unordered(self.options.max_concurrent_fetches.max(1))
            .collect::<Vec<_>>();

        let results = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("Query cancelled while fetching");
                return Err(SessionError::Cancelled);
            }
            results = fetches => results,
        };

        let mut fetched = HashMap::new();
        let mut failures: HashMap<&CacheKey, CacheError> = HashMap::new();
        for (key, result) in results {
            match result {
                Ok(payload) => {
                    fetched.insert(key.clone(), payload);
                }
                Err(e) => {
                    failures.insert(key, e);
                }
            }
        }

        // Report the failure against the first table that needed it
        for plan in plans {
            for key in &plan.keys {
                if let Some(err) = failures.remove(key) {
                    return Err(SessionError::TableBuild {
                        table: plan.schema.name().to_string(),
                        source: TableBuildError::Cache(err),
                    });
                }
            }
        }

        Ok(fetched)
    }

    async fn build_table(
        &mut self,
        plan: &TablePlan,
        payloads: &HashMap<CacheKey, CachedPayload>,
    ) -> Result<(), TableBuildError> {
        let mut documents = Vec::new();
        for key in &plan.keys {
            let Some(cached) = payloads.get(key) else {
                continue;
            };
            let payload = serde_json::from_str(&cached.payload).map_err(TableBuildError::Payload)?;
            documents.extend(split_documents(payload));
        }

        let extraction = RowExtractor::new(&plan.schema, &self.debug).extract(&documents);
        if !extraction.skipped.is_empty() {
            warn!(
                table = %plan.schema.name(),
                skipped = extraction.skipped.len(),
                "Skipped malformed documents"
            );
        }

        let table = TableBuilder::new(&self.debug).build(Arc::clone(&plan.schema), extraction.rows);

        self.debug
            .emit(Channel::Sqlite, "create", &[("ddl", &table.schema().ddl())]);
        self.debug.emit(
            Channel::Sqlite,
            "insert",
            &[("table", &table.name()), ("rows", &table.len())],
        );
        self.engine.load(&table).await?;

        debug!(
            table = %table.name(),
            documents = documents.len(),
            rows = table.len(),
            coercion_failures = extraction.coercion_failures,
            "Table loaded"
        );
        if let Some(progress) = &self.progress {
            progress.table_built(table.name(), table.len());
        }
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, SessionError> {
        if let Some(progress) = &self.progress {
            progress.executing();
        }
        self.debug.emit(Channel::Sqlite, "query", &[("sql", &sql)]);

        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            result = self.engine.execute(sql) => result,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                self.debug.emit(
                    Channel::Sqlite,
                    "done",
                    &[("elapsed_ms", &elapsed_ms), ("rows", &result.row_count())],
                );
                Ok(result)
            }
            Err(e) => {
                self.debug.emit(
                    Channel::Sqlite,
                    "failed",
                    &[("elapsed_ms", &elapsed_ms), ("error", &e)],
                );
                Err(SessionError::Query(e))
            }
        }
    }
}
