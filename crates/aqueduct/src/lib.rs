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

//! # Aqueduct
//!
//! Aqueduct is a configuration-driven workflow scheduler for data-engineering
//! pipelines. A workflow is a directed acyclic graph of heterogeneous tasks
//! (shell commands, local scripts, SQL files run by external engines) with
//! typed dependencies, layered parameters and optional alerting.
//!
//! ## Core pieces
//!
//! - [`Workflow`]: validated task graph built from JSON configuration
//! - [`ExecutionEngine`]: layer-by-layer scheduling with bounded parallelism,
//!   fail-fast cancellation and alert emission
//! - [`TemplateResolver`] / [`ParamScope`]: `${...}` substitution over layered
//!   parameter scopes, with date expressions like `${yyyyMMdd-1}`
//! - [`BackfillPlan`]: expansion of a date range into per-date parameter
//!   overlays, executed strictly sequentially
//! - [`TaskRunner`] / [`RunnerRegistry`]: the seam between the engine and the
//!   concrete task runtimes
//!
//! ## Example
//!
//! ```rust,no_run
//! use aqueduct::{load_workflow_config, ExecutionEngine, Workflow};
//! use indexmap::IndexMap;
//! use std::path::Path;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_workflow_config(Path::new("workflow.json"))?;
//! let workflow = Workflow::from_config(config)?;
//! let engine = ExecutionEngine::with_defaults();
//! let outcome = engine.run(&workflow, &IndexMap::new(), None).await?;
//! assert!(outcome.success());
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod backfill;
pub mod config;
pub mod dateexpr;
pub mod engine;
pub mod error;
pub mod graph;
pub mod params;
pub mod runner;
pub mod task;
pub mod template;
pub mod visualize;
pub mod workflow;

pub use alert::{AlertEmitter, AlertEvent, AlertEventKind, AlertTransport, WebhookTransport};
pub use backfill::{run_backfill, BackfillOutcome, BackfillPlan, DatePoint};
pub use config::{
    load_backfill_config, load_runtime_params, load_workflow_config, AlertConfig, BackfillConfig,
    DateGranularity, DependencyConfig, TaskConfig, TaskKindConfig, WorkflowConfig,
};
pub use dateexpr::DateExpr;
pub use engine::{AbortHandle, EngineConfig, ExecutionEngine, TaskReport, WorkflowOutcome};
pub use error::{
    AlertError, ConfigError, PipelineError, RunnerError, TemplateError, ValidationError,
};
pub use graph::TaskGraph;
pub use params::ParamScope;
pub use runner::{default_registry, ScriptRunner, ShellRunner, SqlRunner};
pub use task::{
    RunnerRegistry, Task, TaskInvocation, TaskKind, TaskOutcome, TaskRunner, TaskState,
};
pub use template::TemplateResolver;
pub use visualize::render_dot;
pub use workflow::Workflow;

// Re-exported for downstream parameter-map construction.
pub use indexmap;

/// Initializes tracing for tests. Safe to call repeatedly; only the first
/// call installs a subscriber.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
