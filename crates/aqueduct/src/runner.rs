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

//! Built-in subprocess task runners.
//!
//! Three runner implementations cover the five task kinds:
//!
//! - [`ShellRunner`] — `shell`: runs the resolved command through `sh -c`.
//! - [`ScriptRunner`] — `python` and `pyspark`: invokes the interpreter (or
//!   `spark-submit`) with the script path followed by `--key=value` flags in
//!   the insertion order of the task's parameter map. A `custom_command`
//!   template overrides the convention entirely; it is resolved with
//!   `script_path` and `params.<name>` in scope and executed verbatim.
//! - [`SqlRunner`] — `spark-sql` and `hive-sql`: reads the SQL file, expands
//!   all `${...}` references, and passes the resolved text to the engine via
//!   `-e` together with the engine-config map.
//!
//! Captured output is bounded at [`MAX_CAPTURE_BYTES`] per stream; a nonzero
//! exit is reported through the outcome's exit code, not as a runner error.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use crate::error::RunnerError;
use crate::task::{RunnerRegistry, TaskInvocation, TaskKind, TaskOutcome, TaskRunner};

/// Upper bound on captured bytes per stream.
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024;

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// A registry wired with the built-in runners for all five task kinds.
pub fn default_registry() -> RunnerRegistry {
    let mut registry = RunnerRegistry::new();
    let script: Arc<dyn TaskRunner> = Arc::new(ScriptRunner);
    let sql: Arc<dyn TaskRunner> = Arc::new(SqlRunner);
    registry.register("shell", Arc::new(ShellRunner));
    registry.register("python", script.clone());
    registry.register("pyspark", script);
    registry.register("spark-sql", sql.clone());
    registry.register("hive-sql", sql);
    registry
}

/// Runs `shell` tasks through `sh -c`.
pub struct ShellRunner;

#[async_trait]
impl TaskRunner for ShellRunner {
    async fn invoke(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, RunnerError> {
        let command = match &invocation.task.kind {
            TaskKind::Shell { command } => invocation.resolve(command),
            other => return Err(unsupported(&invocation.task.id, other)),
        };
        debug!(task = %invocation.task.id, %command, "dispatching shell command");
        run_shell(&command, invocation.task.working_dir.as_deref()).await
    }
}

/// Runs `python` and `pyspark` tasks.
pub struct ScriptRunner;

#[async_trait]
impl TaskRunner for ScriptRunner {
    async fn invoke(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, RunnerError> {
        let script = match &invocation.task.kind {
            TaskKind::Python { script } => script,
            TaskKind::PySpark { script, .. } => script,
            other => return Err(unsupported(&invocation.task.id, other)),
        };

        // A custom command template replaces the flag convention entirely.
        if let Some(template) = &invocation.task.custom_command {
            let mut scope = invocation.scope.clone();
            scope.push_layer(
                [(
                    "script_path".to_string(),
                    script.to_string_lossy().into_owned(),
                )]
                .into_iter()
                .collect(),
            );
            let command = invocation.resolver.resolve(template, &scope);
            debug!(task = %invocation.task.id, %command, "dispatching custom command");
            return run_shell(&command, invocation.task.working_dir.as_deref()).await;
        }

        let (program, args) = script_command(invocation, script);
        debug!(task = %invocation.task.id, %program, ?args, "dispatching script");
        run_program(&program, &args, invocation.task.working_dir.as_deref()).await
    }
}

/// Runs `spark-sql` and `hive-sql` tasks.
pub struct SqlRunner;

#[async_trait]
impl TaskRunner for SqlRunner {
    async fn invoke(&self, invocation: &TaskInvocation) -> Result<TaskOutcome, RunnerError> {
        let (sql_file, engine_flag, program, engine) = match &invocation.task.kind {
            TaskKind::SparkSql { sql_file, engine } => (sql_file, "--conf", "spark-sql", engine),
            TaskKind::HiveSql { sql_file, engine } => (sql_file, "--hiveconf", "hive", engine),
            other => return Err(unsupported(&invocation.task.id, other)),
        };

        let raw = tokio::fs::read_to_string(sql_file)
            .await
            .map_err(|source| RunnerError::ReadSource {
                path: sql_file.clone(),
                source,
            })?;
        let sql = invocation.resolve(&raw);

        let mut args = Vec::new();
        for (key, value) in engine {
            args.push(engine_flag.to_string());
            args.push(format!("{key}={}", invocation.resolve(value)));
        }
        args.push("-e".to_string());
        args.push(sql);

        debug!(task = %invocation.task.id, %program, file = %sql_file.display(), "dispatching sql");
        run_program(program, &args, invocation.task.working_dir.as_deref()).await
    }
}

/// Builds the default script command line: interpreter, engine conf flags
/// (pyspark only), script path, then `--key=value` per resolved parameter in
/// insertion order.
fn script_command(invocation: &TaskInvocation, script: &Path) -> (String, Vec<String>) {
    let mut args = Vec::new();
    let program = match &invocation.task.kind {
        TaskKind::PySpark { engine, .. } => {
            for (key, value) in engine {
                args.push("--conf".to_string());
                args.push(format!("{key}={}", invocation.resolve(value)));
            }
            "spark-submit"
        }
        _ => "python",
    };
    args.push(script.to_string_lossy().into_owned());
    for (key, value) in &invocation.params {
        args.push(format!("--{key}={value}"));
    }
    (program.to_string(), args)
}

async fn run_shell(command: &str, working_dir: Option<&Path>) -> Result<TaskOutcome, RunnerError> {
    run_program("sh", &["-c".to_string(), command.to_string()], working_dir).await
}

async fn run_program(
    program: &str,
    args: &[String],
    working_dir: Option<&Path>,
) -> Result<TaskOutcome, RunnerError> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(false);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let started = Instant::now();
    let output = command
        .output()
        .await
        .map_err(|source| RunnerError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let exit_code = output.status.code();
    Ok(TaskOutcome {
        exit_code,
        stdout: truncate_capture(&output.stdout),
        stderr: truncate_capture(&output.stderr),
        duration: started.elapsed(),
        error_message: match exit_code {
            None => Some("process terminated by signal".to_string()),
            _ => None,
        },
    })
}

fn unsupported(task: &str, kind: &TaskKind) -> RunnerError {
    RunnerError::UnsupportedKind {
        task: task.to_string(),
        kind: kind.name().to_string(),
    }
}

/// Truncates captured process output to the capture bound, preserving UTF-8.
fn truncate_capture(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.into_owned();
    }
    let mut cut = MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = text[..cut].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
