// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Built-in tables for common Kubernetes resources
//!
//! Object-valued columns such as `labels` hold compact JSON text and can be
//! queried with the `json_get_*` functions:
//! `SELECT name FROM pods WHERE json_get_str(labels, 'app') = 'web'`
//!
//! The `*_labels` tables hold one row per label, keyed by the owner's uid.
//! Resource columns on `pods` and `jobs` are totals over all containers.

use super::{ColumnSpec, ColumnType, ScopePolicy, TableSchema};
use crate::error::ConfigurationError;
use crate::kubernetes::ResourceKind;

type Columns = Result<Vec<ColumnSpec>, ConfigurationError>;

fn col(name: &str, path: &str, data_type: ColumnType) -> Result<ColumnSpec, ConfigurationError> {
    ColumnSpec::new(name, path, data_type)
}

fn table(
    name: &str,
    resource: &str,
    scope: ScopePolicy,
    columns: Columns,
) -> Result<TableSchema, ConfigurationError> {
    TableSchema::new(name, ResourceKind::new(resource), scope, columns?)
}

/// Every built-in table
pub fn builtin_schemas() -> Result<Vec<TableSchema>, ConfigurationError> {
    use ScopePolicy::{Cluster, Namespaced};

    Ok(vec![
        table("pods", "pods", Namespaced, pods_columns())?,
        table("pod_containers", "pods", Namespaced, pod_container_columns())?,
        table("pod_labels", "pods", Namespaced, label_columns("pod_uid"))?,
        table("nodes", "nodes", Cluster, node_columns())?,
        table("node_taints", "nodes", Cluster, node_taint_columns())?,
        table("node_labels", "nodes", Cluster, label_columns("node_uid"))?,
        table("deployments", "deployments", Namespaced, deployment_columns())?,
        table("jobs", "jobs", Namespaced, job_columns())?,
        table("job_labels", "jobs", Namespaced, label_columns("job_uid"))?,
        table("namespaces", "namespaces", Cluster, namespace_columns())?,
        table("services", "services", Namespaced, service_columns())?,
    ])
}

fn pods_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("name", ".metadata.name", Text)?,
        col("namespace", ".metadata.namespace", Text)?,
        col("uid", ".metadata.uid", Text)?,
        col("node_name", ".spec.nodeName", Text)?,
        col("phase", ".status.phase", Text)?,
        col("pod_ip", ".status.podIP", Text)?,
        col("ready", ".status.conditions[?type=='Ready'].status", Bool)?,
        col("owner_kind", ".metadata.ownerReferences[0].kind", Text)?,
        col("owner_name", ".metadata.ownerReferences[0].name", Text)?,
        col("created", ".metadata.creationTimestamp", Timestamp)?,
        col("labels", ".metadata.labels", Text)?,
    ]
    .into_iter()
    .chain(resource_totals(".spec")?)
    .collect())
}

/// Requests and limits summed over the containers of a pod spec at `spec`
fn resource_totals(spec: &str) -> Columns {
    use ColumnType::*;
    let path = |kind: &str, resource: &str| {
        format!("{}.containers[].resources.{}.{}", spec, kind, resource)
    };
    let gpu = r#""nvidia.com/gpu""#;
    Ok(vec![
        col("cpu_req", &path("requests", "cpu"), Cpu)?.summed(),
        col("gpu_req", &path("requests", gpu), Integer)?.summed(),
        col("mem_req", &path("requests", "memory"), Size)?.summed(),
        col("cpu_lim", &path("limits", "cpu"), Cpu)?.summed(),
        col("gpu_lim", &path("limits", gpu), Integer)?.summed(),
        col("mem_lim", &path("limits", "memory"), Size)?.summed(),
    ])
}

/// One row per label
fn label_columns(owner: &str) -> Columns {
    use ColumnType::*;
    Ok(vec![
        col(owner, ".metadata.uid", Text)?,
        col("label", ".metadata.labels{}", Text)?.expanded(),
        col("key", "@.key", Text)?,
        col("value", "@.value", Text)?,
    ])
}

/// One row per container, with requests and limits
fn pod_container_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("pod_uid", ".metadata.uid", Text)?,
        col("pod_name", ".metadata.name", Text)?,
        col("namespace", ".metadata.namespace", Text)?,
        col("container", ".spec.containers[]", Text)?.expanded(),
        col("name", "@.name", Text)?,
        col("image", "@.image", Text)?,
        col("command", "@.command", Text)?,
        col("cpu_req", "@.resources.requests.cpu", Cpu)?,
        col("mem_req", "@.resources.requests.memory", Size)?,
        col("cpu_lim", "@.resources.limits.cpu", Cpu)?,
        col("mem_lim", "@.resources.limits.memory", Size)?,
        col("gpu_lim", r#"@.resources.limits."nvidia.com/gpu""#, Integer)?,
    ])
}

fn node_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("name", ".metadata.name", Text)?,
        col("uid", ".metadata.uid", Text)?,
        col("instance_type", r#".metadata.labels."node.kubernetes.io/instance-type""#, Text)?,
        col("ready", ".status.conditions[?type=='Ready'].status", Bool)?,
        col("unschedulable", ".spec.unschedulable", Bool)?,
        col("cpu_alloc", ".status.allocatable.cpu", Cpu)?,
        col("gpu_alloc", r#".status.allocatable."nvidia.com/gpu""#, Integer)?,
        col("mem_alloc", ".status.allocatable.memory", Size)?,
        col("cpu_cap", ".status.capacity.cpu", Cpu)?,
        col("gpu_cap", r#".status.capacity."nvidia.com/gpu""#, Integer)?,
        col("mem_cap", ".status.capacity.memory", Size)?,
        col("kubelet_version", ".status.nodeInfo.kubeletVersion", Text)?,
        col("created", ".metadata.creationTimestamp", Timestamp)?,
        col("labels", ".metadata.labels", Text)?,
    ])
}

/// One row per taint
fn node_taint_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("node_uid", ".metadata.uid", Text)?,
        col("node_name", ".metadata.name", Text)?,
        col("taint", ".spec.taints[]", Text)?.expanded(),
        col("key", "@.key", Text)?,
        col("value", "@.value", Text)?,
        col("effect", "@.effect", Text)?,
    ])
}

fn deployment_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("name", ".metadata.name", Text)?,
        col("namespace", ".metadata.namespace", Text)?,
        col("uid", ".metadata.uid", Text)?,
        col("replicas", ".spec.replicas", Integer)?,
        col("ready_replicas", ".status.readyReplicas", Integer)?,
        col("available_replicas", ".status.availableReplicas", Integer)?,
        col("strategy", ".spec.strategy.type", Text)?,
        col("created", ".metadata.creationTimestamp", Timestamp)?,
        col("labels", ".metadata.labels", Text)?,
    ])
}

fn job_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("name", ".metadata.name", Text)?,
        col("namespace", ".metadata.namespace", Text)?,
        col("uid", ".metadata.uid", Text)?,
        col("completions", ".spec.completions", Integer)?,
        col("active", ".status.active", Integer)?,
        col("succeeded", ".status.succeeded", Integer)?,
        col("failed", ".status.failed", Integer)?,
        col("start_time", ".status.startTime", Timestamp)?,
        col("completion_time", ".status.completionTime", Timestamp)?,
        col("labels", ".metadata.labels", Text)?,
    ]
    .into_iter()
    .chain(resource_totals(".spec.template.spec")?)
    .collect())
}

fn namespace_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("name", ".metadata.name", Text)?,
        col("uid", ".metadata.uid", Text)?,
        col("phase", ".status.phase", Text)?,
        col("created", ".metadata.creationTimestamp", Timestamp)?,
        col("labels", ".metadata.labels", Text)?,
    ])
}

fn service_columns() -> Columns {
    use ColumnType::*;
    Ok(vec![
        col("name", ".metadata.name", Text)?,
        col("namespace", ".metadata.namespace", Text)?,
        col("uid", ".metadata.uid", Text)?,
        col("type", ".spec.type", Text)?,
        col("cluster_ip", ".spec.clusterIP", Text)?,
        col("created", ".metadata.creationTimestamp", Timestamp)?,
        col("labels", ".metadata.labels", Text)?,
    ])
}
