// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Kubernetes inventory access: fetching resource lists and caching them

mod cache;
mod fetcher;

pub use cache::{CacheManager, CacheSettings, CachedPayload, Clock, PayloadSource, RefreshPolicy, StalePolicy, SystemClock};
pub use fetcher::{Fetcher, InvokeFailure, Inventory, KubectlInventory};

use std::fmt;

/// A resource kind as understood by the inventory command, e.g. `pods`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub fn new(kind: &str) -> Self {
        Self(kind.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where resources are fetched from. Every scope carries the kube context
/// so cache entries from different clusters never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceScope {
    /// Cluster-scoped resources such as nodes
    Cluster { context: String },
    /// A single namespace
    Namespace { context: String, namespace: String },
    /// Every namespace at once
    AllNamespaces { context: String },
}

impl ResourceScope {
    pub fn context(&self) -> &str {
        match self {
            ResourceScope::Cluster { context }
            | ResourceScope::Namespace { context, .. }
            | ResourceScope::AllNamespaces { context } => context,
        }
    }

    /// Component used in cache file names
    pub fn file_component(&self) -> &str {
        match self {
            ResourceScope::Cluster { .. } => "__cluster",
            ResourceScope::Namespace { namespace, .. } => namespace,
            ResourceScope::AllNamespaces { .. } => "__all",
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceScope::Cluster { context } => write!(f, "{}/cluster", context),
            ResourceScope::Namespace { context, namespace } => {
                write!(f, "{}/{}", context, namespace)
            }
            ResourceScope::AllNamespaces { context } => write!(f, "{}/all-namespaces", context),
        }
    }
}

/// Identity of one cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub kind: ResourceKind,
    pub scope: ResourceScope,
}

impl CacheKey {
    pub fn new(kind: ResourceKind, scope: ResourceScope) -> Self {
        Self { kind, scope }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.scope)
    }
}
