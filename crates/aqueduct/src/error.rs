/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Error types for the Aqueduct workflow scheduler.
//!
//! Errors are grouped by subsystem:
//!
//! - [`ConfigError`]: configuration files that cannot be read or parsed.
//!   Fatal before any task runs.
//! - [`ValidationError`]: a structurally invalid workflow (duplicate task ids,
//!   dangling dependency edges, cycles). Fatal before any task runs.
//! - [`TemplateError`]: problems during `${...}` expansion. Never fatal: the
//!   offending token is preserved literally and the error is logged.
//! - [`RunnerError`]: a task runner could not start or observe its subprocess.
//!   Recorded as a task failure, not propagated out of the engine.
//! - [`PipelineError`]: internal engine failures (missing runner registration,
//!   worker join failures). These map to the CLI's internal-error exit code.
//! - [`AlertError`]: alert delivery failures. Logged, never affect workflow
//!   state.

use std::path::PathBuf;
use thiserror::Error;

/// Errors loading or parsing configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read from disk.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file was not valid JSON or did not match the schema.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A backfill specification that cannot produce a date plan.
    #[error("invalid backfill specification: {message}")]
    InvalidBackfill { message: String },
}

/// Errors found while validating workflow structure.
///
/// All of these are detected during [`Workflow::from_config`](crate::Workflow::from_config),
/// before any task is dispatched.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Workflow declares no tasks.
    #[error("workflow contains no tasks")]
    EmptyWorkflow,

    /// Two task descriptors share the same `task_id`.
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    /// A dependency edge references a task id that was never declared.
    #[error("dependency edge {from} -> {to} references undeclared task {missing}")]
    UnknownDependency {
        from: String,
        to: String,
        missing: String,
    },

    /// A dependency edge from a task to itself.
    #[error("task {0} depends on itself")]
    SelfDependency(String),

    /// The dependency graph contains a cycle. The witness lists the task ids
    /// along one offending path.
    #[error("cyclic dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Non-fatal template expansion problems.
///
/// The resolver never fails an expansion: the token is left literal and the
/// corresponding `TemplateError` is logged as a warning.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Substitution recursed past the configured depth cap.
    #[error("template recursion depth exceeded while expanding ${{{token}}}")]
    RecursionOverflow { token: String },

    /// A token resembled a date expression but could not be evaluated.
    #[error("malformed date expression: ${{{token}}}")]
    MalformedDateExpression { token: String },
}

/// Errors raised by concrete task runners.
///
/// A `RunnerError` is converted into a failed task outcome by the engine; it
/// never aborts the scheduling loop on its own.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The runner subprocess could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A script or SQL source file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A runner was handed a task kind it does not implement. Indicates a
    /// miswired registry.
    #[error("runner cannot execute task {task} of type {kind}")]
    UnsupportedKind { task: String, kind: String },
}

/// Internal engine failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No runner is registered for a task type. Workflow validation accepts
    /// only known types, so this indicates a misassembled registry.
    #[error("no runner registered for task type {0}")]
    MissingRunner(String),

    /// A dispatched worker task could not be joined (panic or cancellation at
    /// the runtime level).
    #[error("task worker failed: {0}")]
    WorkerJoin(#[from] tokio::task::JoinError),

    /// The concurrency pool was closed while dispatching.
    #[error("concurrency pool closed: {0}")]
    PoolClosed(#[from] tokio::sync::AcquireError),
}

/// Alert delivery failures. Logged by the emitter and otherwise ignored.
#[derive(Error, Debug)]
pub enum AlertError {
    /// The HTTP request to the webhook endpoint failed outright.
    #[error("webhook delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook endpoint answered with a non-success status.
    #[error("webhook returned status {0}")]
    Status(u16),
}
