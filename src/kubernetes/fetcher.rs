// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Fetching resource lists from the cluster inventory command
//!
//! The [`Inventory`] trait abstracts "run something that prints a JSON list
//! of resources". The default implementation shells out to `kubectl`; tests
//! substitute in-memory fakes. [`Fetcher`] wraps an inventory with the fetch
//! timeout and JSON validation. Failures are surfaced, never retried.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ResourceKind, ResourceScope};
use crate::debug::{Channel, Debugger};
use crate::error::FetchError;

/// Unsuccessful inventory command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeFailure {
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Something that can list resources of a kind in a scope as JSON.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Command line (or equivalent) used for debug output and errors
    fn describe(&self, kind: &ResourceKind, scope: &ResourceScope) -> String;

    /// Run the listing and return its raw output
    async fn invoke(
        &self,
        kind: &ResourceKind,
        scope: &ResourceScope,
    ) -> Result<Vec<u8>, InvokeFailure>;
}

/// Lists resources with `kubectl get <kind> -o json`.
#[derive(Debug, Clone)]
pub struct KubectlInventory {
    program: String,
}

impl KubectlInventory {
    pub fn new() -> Self {
        Self::with_program("kubectl")
    }

    /// Use a different kubectl-compatible binary
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn args(kind: &ResourceKind, scope: &ResourceScope) -> Vec<String> {
        let mut args = vec!["get".to_string(), kind.to_string()];
        match scope {
            ResourceScope::Cluster { .. } => {}
            ResourceScope::Namespace { namespace, .. } => {
                args.push("-n".to_string());
                args.push(namespace.clone());
            }
            ResourceScope::AllNamespaces { .. } => args.push("--all-namespaces".to_string()),
        }
        args.extend(["-o".to_string(), "json".to_string()]);
        args.push("--context".to_string());
        args.push(scope.context().to_string());
        args
    }

    /// The context kubectl uses when none is given
    pub async fn current_context(&self) -> Result<String, FetchError> {
        let command = format!("{} config current-context", self.program);
        let output = Command::new(&self.program)
            .args(["config", "current-context"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchError::CommandFailed {
                command: command.clone(),
                exit_code: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(FetchError::CommandFailed {
                command,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for KubectlInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Inventory for KubectlInventory {
    fn describe(&self, kind: &ResourceKind, scope: &ResourceScope) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(Self::args(kind, scope));
        parts.join(" ")
    }

    async fn invoke(
        &self,
        kind: &ResourceKind,
        scope: &ResourceScope,
    ) -> Result<Vec<u8>, InvokeFailure> {
        // kill_on_drop lets a cancelled query abandon the child process
        let output = Command::new(&self.program)
            .args(Self::args(kind, scope))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| InvokeFailure {
                exit_code: None,
                stderr: format!("failed to run {}: {}", self.program, e),
            })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(InvokeFailure {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Runs inventory commands with a timeout and validates their output.
#[derive(Clone)]
pub struct Fetcher {
    inventory: Arc<dyn Inventory>,
    timeout: Duration,
    debug: Debugger,
}

impl Fetcher {
    pub fn new(inventory: Arc<dyn Inventory>, timeout: Duration, debug: Debugger) -> Self {
        Self {
            inventory,
            timeout,
            debug,
        }
    }

    /// Fetch the raw JSON payload for a kind and scope
    pub async fn fetch(
        &self,
        kind: &ResourceKind,
        scope: &ResourceScope,
    ) -> Result<String, FetchError> {
        let command = self.inventory.describe(kind, scope);
        self.debug.emit(
            Channel::Fetch,
            "invoking",
            &[("command", &command), ("scope", scope)],
        );

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.inventory.invoke(kind, scope)).await;
        match outcome {
            Ok(Ok(bytes)) => self.validate(command, bytes, start),
            Ok(Err(failure)) => {
                let exit_code = failure
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                self.debug.emit(
                    Channel::Fetch,
                    "failed",
                    &[("command", &command), ("exit_code", &exit_code)],
                );
                Err(FetchError::CommandFailed {
                    command,
                    exit_code: failure.exit_code,
                    stderr: failure.stderr,
                })
            }
            Err(_) => {
                self.debug.emit(
                    Channel::Fetch,
                    "timed out",
                    &[("command", &command), ("timeout_secs", &self.timeout.as_secs())],
                );
                Err(FetchError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        }
    }

    fn validate(&self, command: String, bytes: Vec<u8>, start: Instant) -> Result<String, FetchError> {
        let payload = match String::from_utf8(bytes) {
            Ok(payload) => payload,
            Err(source) => {
                self.debug.emit(
                    Channel::Fetch,
                    "invalid utf-8",
                    &[("command", &command), ("error", &source)],
                );
                return Err(FetchError::InvalidUtf8 { command, source });
            }
        };
        if let Err(source) = serde_json::from_str::<serde::de::IgnoredAny>(&payload) {
            self.debug.emit(
                Channel::Fetch,
                "malformed output",
                &[("command", &command), ("error", &source)],
            );
            return Err(FetchError::MalformedPayload { command, source });
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(command = %command, bytes = payload.len(), elapsed_ms, "Fetch complete");
        self.debug.emit(
            Channel::Fetch,
            "complete",
            &[("command", &command), ("bytes", &payload.len()), ("elapsed_ms", &elapsed_ms)],
        );
        Ok(payload)
    }
}
