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

//! Workflow execution engine.
//!
//! The engine walks a validated workflow layer by layer:
//!
//! 1. Within a layer, every PENDING task whose predecessors are all satisfied
//!    (SUCCEEDED or SKIPPED) is dispatched; tasks with a FAILED or CANCELLED
//!    predecessor transition straight to CANCELLED.
//! 2. Dispatched tasks run concurrently, bounded by a semaphore
//!    ([`EngineConfig::max_parallel_tasks`]). The layer is a hard barrier: the
//!    next layer starts only once every dispatch of the current one has
//!    terminated.
//! 3. Per-task parameters and command templates are resolved *at dispatch
//!    time* against the scope stack runtime-overrides > task-params >
//!    workflow-globals, so backfill overlays reach per-task fields.
//! 4. After a layer drains, a failure under `fail_fast` cancels every task
//!    not yet started and ends the run.
//!
//! State transitions happen only on the engine's coordinating loop (single
//! writer); workers hand their results back through a `JoinSet`. An
//! [`AbortHandle`] lets external callers stop the run at the next layer
//! barrier — in-flight tasks are allowed to finish, remaining PENDING tasks
//! are marked CANCELLED.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::AlertEmitter;
use crate::error::PipelineError;
use crate::params::ParamScope;
use crate::task::{RunnerRegistry, Task, TaskInvocation, TaskRunner, TaskState};
use crate::template::TemplateResolver;
use crate::workflow::Workflow;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ceiling on concurrently running tasks within a layer.
    pub max_parallel_tasks: usize,
    /// Optional wall-clock limit per task; exceeding it fails the task.
    pub task_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            task_timeout: None,
        }
    }
}

/// Cloneable handle that aborts a run at its next layer barrier.
#[derive(Debug, Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final record for one task within a run.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Captured output, both streams, bounded at capture time.
    pub log: String,
    pub error: Option<String>,
}

impl TaskReport {
    fn unscheduled() -> Self {
        Self {
            state: TaskState::Pending,
            started_at: None,
            finished_at: None,
            exit_code: None,
            log: String::new(),
            error: None,
        }
    }

    /// Wall-clock duration, when the task actually ran.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Aggregate result of one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub run_id: Uuid,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Per-task reports in declaration order.
    pub tasks: IndexMap<String, TaskReport>,
}

impl WorkflowOutcome {
    /// True when every non-SKIPPED task SUCCEEDED.
    pub fn success(&self) -> bool {
        self.tasks
            .values()
            .all(|report| matches!(report.state, TaskState::Succeeded | TaskState::Skipped))
    }

    /// Counts per state, for summaries.
    pub fn state_counts(&self) -> IndexMap<TaskState, usize> {
        let mut counts = IndexMap::new();
        for report in self.tasks.values() {
            *counts.entry(report.state).or_insert(0) += 1;
        }
        counts
    }

    fn summary(&self) -> String {
        let counts = self.state_counts();
        let parts: Vec<String> = counts
            .iter()
            .map(|(state, n)| format!("{n} {state}"))
            .collect();
        format!("{} ({} tasks)", parts.join(", "), self.tasks.len())
    }
}

/// Orchestrates workflow runs against a runner registry.
pub struct ExecutionEngine {
    runners: Arc<RunnerRegistry>,
    config: EngineConfig,
    abort: Arc<AtomicBool>,
}

impl ExecutionEngine {
    pub fn new(runners: RunnerRegistry, config: EngineConfig) -> Self {
        Self {
            runners: Arc::new(runners),
            config,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// An engine with the built-in runners and default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RunnerRegistry::with_defaults(), EngineConfig::default())
    }

    /// Handle for aborting runs driven by this engine.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Executes one run of the workflow.
    ///
    /// `runtime` is the highest-precedence parameter layer (CLI overrides or
    /// a backfill date overlay). With `only_tasks` set, every task outside
    /// the set is marked SKIPPED before scheduling begins; dependencies among
    /// the included tasks are still honoured, and excluded predecessors count
    /// as satisfied.
    pub async fn run(
        &self,
        workflow: &Workflow,
        runtime: &IndexMap<String, String>,
        only_tasks: Option<&HashSet<String>>,
    ) -> Result<WorkflowOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            workflow = %workflow.name(),
            %run_id,
            tasks = workflow.tasks().len(),
            "starting workflow run"
        );

        let base_scope = ParamScope::new()
            .with_layer(runtime.clone())
            .with_layer(workflow.params().clone());
        let resolver = TemplateResolver::for_run(&base_scope);

        let mut states: IndexMap<String, TaskState> = workflow
            .tasks()
            .keys()
            .map(|id| (id.clone(), TaskState::Pending))
            .collect();
        let mut reports: IndexMap<String, TaskReport> = workflow
            .tasks()
            .keys()
            .map(|id| (id.clone(), TaskReport::unscheduled()))
            .collect();

        if let Some(only) = only_tasks {
            self.apply_task_filter(workflow, only, &mut states, &mut reports);
        }

        let alerts = AlertEmitter::from_config(workflow.name(), workflow.alert());
        alerts.workflow_started().await;

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tasks.max(1)));

        'layers: for layer in workflow.graph().layers() {
            if self.is_aborted() {
                warn!(workflow = %workflow.name(), "run aborted, skipping remaining layers");
                break 'layers;
            }

            let mut ready = Vec::new();
            for id in layer {
                if states.get(id.as_str()) != Some(&TaskState::Pending) {
                    continue;
                }
                let predecessors = workflow.graph().predecessors(id);
                let poisoned = predecessors
                    .iter()
                    .any(|p| states.get(p.as_str()).is_some_and(|s| s.poisons_dependents()));
                if poisoned {
                    set_state(&mut states, &mut reports, id, TaskState::Cancelled);
                    debug!(task = %id, "cancelled: upstream failed or was cancelled");
                } else {
                    // The layer barrier guarantees every predecessor is
                    // already terminal, so the remaining tasks are ready.
                    ready.push(id.clone());
                }
            }

            let mut join_set: JoinSet<(String, TaskReport)> = JoinSet::new();
            for id in ready {
                let Some(task) = workflow.task(&id) else {
                    continue;
                };
                let runner = self
                    .runners
                    .get(task.kind.name())
                    .ok_or_else(|| PipelineError::MissingRunner(task.kind.name().to_string()))?;

                let permit = semaphore.clone().acquire_owned().await?;
                set_state(&mut states, &mut reports, &id, TaskState::Running);
                info!(task = %id, "task state change: PENDING -> RUNNING");

                let task = Arc::clone(task);
                let resolver = resolver.clone();
                let runtime = runtime.clone();
                let globals = workflow.params().clone();
                let timeout = self.config.task_timeout;
                join_set.spawn(async move {
                    // Hold the permit until the task terminates.
                    let _permit = permit;
                    let report = execute_task(task, runner, resolver, runtime, globals, timeout).await;
                    (id, report)
                });
            }

            let mut layer_failed = false;
            while let Some(joined) = join_set.join_next().await {
                let (id, report) = joined?;
                let state = report.state;
                let error = report.error.clone();
                set_state(&mut states, &mut reports, &id, state);
                if states.get(id.as_str()) == Some(&state) {
                    if let Some(slot) = reports.get_mut(&id) {
                        *slot = report;
                    }
                }
                info!(task = %id, %state, "task state change: RUNNING -> {state}");
                if state == TaskState::Failed {
                    layer_failed = true;
                }
                alerts.task_finished(&id, state, error.as_deref()).await;
            }

            if layer_failed && workflow.fail_fast() {
                warn!(
                    workflow = %workflow.name(),
                    "task failed under fail-fast, cancelling remaining tasks"
                );
                break 'layers;
            }
        }

        // Anything still PENDING was cut off by fail-fast or an abort.
        let pending: Vec<String> = states
            .iter()
            .filter(|(_, s)| **s == TaskState::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            set_state(&mut states, &mut reports, &id, TaskState::Cancelled);
        }

        let outcome = WorkflowOutcome {
            run_id,
            workflow: workflow.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            tasks: reports,
        };
        let success = outcome.success();
        alerts.workflow_finished(success, &outcome.summary()).await;
        info!(
            workflow = %workflow.name(),
            %run_id,
            success,
            summary = %outcome.summary(),
            "workflow run finished"
        );
        Ok(outcome)
    }

    fn apply_task_filter(
        &self,
        workflow: &Workflow,
        only: &HashSet<String>,
        states: &mut IndexMap<String, TaskState>,
        reports: &mut IndexMap<String, TaskReport>,
    ) {
        for id in only {
            if !states.contains_key(id.as_str()) {
                warn!(task = %id, "task filter names an unknown task id");
            }
        }
        let all_ids: Vec<String> = states.keys().cloned().collect();
        for id in &all_ids {
            if !only.contains(id.as_str()) {
                set_state(states, reports, id, TaskState::Skipped);
            }
        }
        // The filter does not pull in ancestors; excluded upstreams are
        // treated as satisfied, which the user may not expect.
        for id in &all_ids {
            if only.contains(id.as_str()) {
                for pred in workflow.graph().predecessors(id) {
                    if !only.contains(pred.as_str()) {
                        warn!(
                            task = %id,
                            upstream = %pred,
                            "included task depends on an excluded upstream; treating it as satisfied"
                        );
                    }
                }
            }
        }
    }
}

/// Transitions a task's state, refusing to leave a terminal state.
fn set_state(
    states: &mut IndexMap<String, TaskState>,
    reports: &mut IndexMap<String, TaskReport>,
    id: &str,
    next: TaskState,
) {
    let Some(current) = states.get_mut(id) else {
        return;
    };
    if current.is_terminal() {
        warn!(task = %id, from = %current, to = %next, "refusing transition out of terminal state");
        return;
    }
    *current = next;
    if let Some(report) = reports.get_mut(id) {
        report.state = next;
    }
}

/// Resolves one task's parameter view and invokes its runner.
///
/// Resolution order: the raw scope (runtime > raw task params > globals)
/// feeds value expansion; the resolved task parameters then become both the
/// middle scope layer and the `params` namespace seen by `custom_command`.
async fn execute_task(
    task: Arc<Task>,
    runner: Arc<dyn TaskRunner>,
    resolver: TemplateResolver,
    runtime: IndexMap<String, String>,
    globals: IndexMap<String, String>,
    timeout: Option<Duration>,
) -> TaskReport {
    let started_at = Utc::now();

    let raw_scope = ParamScope::new()
        .with_layer(runtime.clone())
        .with_layer(task.params.clone())
        .with_layer(globals.clone());
    let mut resolved: IndexMap<String, String> = IndexMap::with_capacity(task.params.len());
    for (key, value) in &task.params {
        resolved.insert(key.clone(), resolver.resolve(value, &raw_scope));
    }

    let scope = ParamScope::new()
        .with_layer(runtime)
        .with_layer(resolved.clone())
        .with_layer(globals)
        .with_namespace("params", resolved.clone());
    let invocation = TaskInvocation {
        task: task.clone(),
        params: resolved,
        resolver,
        scope,
    };

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, runner.invoke(&invocation)).await {
            Ok(result) => result,
            Err(_) => {
                return TaskReport {
                    state: TaskState::Failed,
                    started_at: Some(started_at),
                    finished_at: Some(Utc::now()),
                    exit_code: None,
                    log: String::new(),
                    error: Some(format!("task timed out after {limit:?}")),
                };
            }
        },
        None => runner.invoke(&invocation).await,
    };

    match result {
        Ok(outcome) => {
            let state = if outcome.succeeded() {
                TaskState::Succeeded
            } else {
                TaskState::Failed
            };
            let error = if state == TaskState::Failed {
                Some(outcome.error_message.clone().unwrap_or_else(|| {
                    format!(
                        "exited with code {}",
                        outcome
                            .exit_code
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "unknown".to_string())
                    )
                }))
            } else {
                None
            };
            let mut log = outcome.stdout;
            if !outcome.stderr.is_empty() {
                if !log.is_empty() {
                    log.push('\n');
                }
                log.push_str(&outcome.stderr);
            }
            TaskReport {
                state,
                started_at: Some(started_at),
                finished_at: Some(Utc::now()),
                exit_code: outcome.exit_code,
                log,
                error,
            }
        }
        Err(error) => TaskReport {
            state: TaskState::Failed,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            exit_code: None,
            log: String::new(),
            error: Some(error.to_string()),
        },
    }
}
