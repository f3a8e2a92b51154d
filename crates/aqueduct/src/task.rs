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

//! Task model and the runner contract.
//!
//! Tasks are data: a [`Task`] couples an id with a [`TaskKind`] variant
//! carrying the type-specific fields, plus the shared parameter map, working
//! directory and optional `custom_command` template. The engine dispatches a
//! task by looking up the runner registered for its kind in a
//! [`RunnerRegistry`] and handing it a fully resolved [`TaskInvocation`].
//!
//! ## Task states
//!
//! ```text
//! PENDING -> RUNNING -> SUCCEEDED | FAILED
//! PENDING -> SKIPPED     (excluded by a task-id filter)
//! PENDING -> CANCELLED   (upstream failure under fail-fast, or abort)
//! ```
//!
//! SUCCEEDED, FAILED, SKIPPED and CANCELLED are terminal; the engine never
//! transitions a task away from a terminal state.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{TaskConfig, TaskKindConfig};
use crate::error::RunnerError;
use crate::params::ParamScope;
use crate::template::TemplateResolver;

/// Lifecycle state of a task within one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Skipped | TaskState::Cancelled
        )
    }

    /// Whether a predecessor in this state allows its dependents to start.
    /// Skipped predecessors count as satisfied (the user opted them out).
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Skipped)
    }

    /// Whether a predecessor in this state forces its dependents to cancel.
    pub fn poisons_dependents(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Skipped => "SKIPPED",
            TaskState::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// An immutable task descriptor, built from configuration at load time.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    /// Per-task parameters; values may contain `${...}` templates resolved
    /// just before dispatch.
    pub params: IndexMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Overrides the default argument-passing convention for script tasks.
    pub custom_command: Option<String>,
}

/// The task-type variant and its type-specific payload.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Shell {
        command: String,
    },
    Python {
        script: PathBuf,
    },
    PySpark {
        script: PathBuf,
        engine: IndexMap<String, String>,
    },
    SparkSql {
        sql_file: PathBuf,
        engine: IndexMap<String, String>,
    },
    HiveSql {
        sql_file: PathBuf,
        engine: IndexMap<String, String>,
    },
}

impl TaskKind {
    /// The configuration-facing name of this kind, used as the registry key.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Shell { .. } => "shell",
            TaskKind::Python { .. } => "python",
            TaskKind::PySpark { .. } => "pyspark",
            TaskKind::SparkSql { .. } => "spark-sql",
            TaskKind::HiveSql { .. } => "hive-sql",
        }
    }
}

impl From<TaskConfig> for Task {
    fn from(cfg: TaskConfig) -> Self {
        let kind = match cfg.kind {
            TaskKindConfig::Shell { command } => TaskKind::Shell { command },
            TaskKindConfig::Python { script } => TaskKind::Python { script },
            TaskKindConfig::Pyspark { script, engine } => TaskKind::PySpark { script, engine },
            TaskKindConfig::SparkSql { sql_file, engine } => {
                TaskKind::SparkSql { sql_file, engine }
            }
            TaskKindConfig::HiveSql { sql_file, engine } => TaskKind::HiveSql { sql_file, engine },
        };
        Self {
            id: cfg.task_id,
            kind,
            params: cfg.params,
            working_dir: cfg.working_dir,
            custom_command: cfg.custom_command,
        }
    }
}

/// Everything a runner needs to execute one task: the descriptor, the
/// resolved parameter view, and the resolver/scope pair for late resolution
/// of source text (SQL files are read and expanded inside the runner).
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub task: Arc<Task>,
    /// Fully resolved per-task parameters, insertion order preserved.
    pub params: IndexMap<String, String>,
    pub resolver: TemplateResolver,
    pub scope: ParamScope,
}

impl TaskInvocation {
    /// Expands `${...}` references in `input` against this invocation's scope.
    pub fn resolve(&self, input: &str) -> String {
        self.resolver.resolve(input, &self.scope)
    }
}

/// Outcome of one runner invocation.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Process exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output, truncated to the capture bound.
    pub stdout: String,
    /// Captured standard error, truncated to the capture bound.
    pub stderr: String,
    pub duration: Duration,
    /// Present when the invocation failed for a reason other than a nonzero
    /// exit (spawn failure, timeout).
    pub error_message: Option<String>,
}

impl TaskOutcome {
    /// The invocation succeeded: exit code zero and no runner-level error.
    pub fn succeeded(&self) -> bool {
        self.error_message.is_none() && self.exit_code == Some(0)
    }
}

/// Contract between the engine and a concrete task runtime.
///
/// Runners receive a fully resolved invocation and report an outcome; they do
/// not see the DAG, other tasks, or workflow state.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn invoke(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, RunnerError>;
}

/// Dispatch table mapping a task kind name to its runner.
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn TaskRunner>>,
}

impl RunnerRegistry {
    /// Creates an empty registry. Most callers want
    /// [`with_defaults`](Self::with_defaults).
    pub fn new() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    /// Registers (or replaces) the runner for a kind name.
    pub fn register(&mut self, kind: &str, runner: Arc<dyn TaskRunner>) {
        self.runners.insert(kind.to_string(), runner);
    }

    /// Looks up the runner for a kind name.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskRunner>> {
        self.runners.get(kind).cloned()
    }

    /// A registry wired with the built-in subprocess runners for all five
    /// task kinds.
    pub fn with_defaults() -> Self {
        crate::runner::default_registry()
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;

    #[test]
    fn test_state_classification() {
        init_test_logging();

        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        for state in [
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::Skipped,
            TaskState::Cancelled,
        ] {
            assert!(state.is_terminal());
        }

        assert!(TaskState::Succeeded.satisfies_dependency());
        assert!(TaskState::Skipped.satisfies_dependency());
        assert!(!TaskState::Failed.satisfies_dependency());

        assert!(TaskState::Failed.poisons_dependents());
        assert!(TaskState::Cancelled.poisons_dependents());
        assert!(!TaskState::Succeeded.poisons_dependents());
    }

    #[test]
    fn test_task_from_config() {
        init_test_logging();

        let raw = r#"{
            "task_id": "load",
            "type": "pyspark",
            "script": "jobs/load.py",
            "engine": {"spark.executor.cores": "2"},
            "params": {"day_id": "${yyyy-MM-dd}"}
        }"#;
        let cfg: TaskConfig = serde_json::from_str(raw).unwrap();
        let task = Task::from(cfg);

        assert_eq!(task.id, "load");
        assert_eq!(task.kind.name(), "pyspark");
        match &task.kind {
            TaskKind::PySpark { script, engine } => {
                assert_eq!(script.to_str(), Some("jobs/load.py"));
                assert_eq!(engine.len(), 1);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_outcome_success_requires_zero_exit() {
        init_test_logging();

        let mut outcome = TaskOutcome {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(5),
            error_message: None,
        };
        assert!(outcome.succeeded());

        outcome.exit_code = Some(1);
        assert!(!outcome.succeeded());

        outcome.exit_code = Some(0);
        outcome.error_message = Some("timed out".into());
        assert!(!outcome.succeeded());
    }
}
