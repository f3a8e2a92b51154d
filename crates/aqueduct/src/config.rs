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

//! Configuration surfaces.
//!
//! Three JSON documents drive the scheduler:
//!
//! - the **workflow configuration** ([`WorkflowConfig`]): name, global
//!   parameters, task descriptors, dependency edges, optional alerting;
//! - the **backfill configuration** ([`BackfillConfig`]): date range or
//!   explicit dates, granularity, parameter naming and formats;
//! - the **runtime overlay**: a flat string map, the highest-precedence
//!   parameter scope.
//!
//! Unknown keys are ignored on load. All maps are [`IndexMap`]s so that the
//! order in which a user wrote their parameters survives into flag-passing.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level workflow configuration, deserialized from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Workflow-global parameters, the lowest-precedence scope layer.
    #[serde(default)]
    pub params: IndexMap<String, String>,
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
    #[serde(default)]
    pub alert: Option<AlertConfig>,
    /// On the first task failure, cancel everything not yet started.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

fn default_fail_fast() -> bool {
    true
}

impl WorkflowConfig {
    /// Re-emits the configuration in normalised form. Loading the normalised
    /// form produces an identical configuration (round-trip idempotence).
    pub fn normalized(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// One task descriptor. The `type` field selects the variant; type-specific
/// keys sit alongside the shared ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_id: String,
    #[serde(flatten)]
    pub kind: TaskKindConfig,
    /// Per-task parameters, the middle scope layer. Insertion order is the
    /// order script runners pass `--key=value` flags.
    #[serde(default)]
    pub params: IndexMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Full command template overriding the default argument convention.
    /// Resolved with `script_path` and `params.<name>` in scope.
    #[serde(default)]
    pub custom_command: Option<String>,
}

/// The task-type discriminant and its type-specific fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskKindConfig {
    /// A shell command executed via `sh -c`.
    Shell { command: String },
    /// A local Python script.
    Python { script: PathBuf },
    /// A PySpark script submitted through `spark-submit`.
    Pyspark {
        script: PathBuf,
        #[serde(default)]
        engine: IndexMap<String, String>,
    },
    /// A SQL file executed by `spark-sql`.
    SparkSql {
        sql_file: PathBuf,
        #[serde(default)]
        engine: IndexMap<String, String>,
    },
    /// A SQL file executed by `hive`.
    HiveSql {
        sql_file: PathBuf,
        #[serde(default)]
        engine: IndexMap<String, String>,
    },
}

/// A dependency edge: `from` must reach a terminal state before `to` starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub from: String,
    pub to: String,
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Transport type; `webhook` is the only built-in.
    pub transport: String,
    pub endpoint: String,
    /// Ask the chat transport to mention everyone on failure.
    #[serde(default)]
    pub at_all: bool,
}

/// Backfill specification (see the planner in [`crate::backfill`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub date_granularity: DateGranularity,
    /// Explicit dates; when non-empty, overrides the range fields.
    #[serde(default)]
    pub custom_dates: Vec<NaiveDate>,
    /// Primary parameter name for the date.
    #[serde(default = "default_date_param_name")]
    pub date_param_name: String,
    /// Multiple parameter names; supersedes `date_param_name` when non-empty.
    #[serde(default)]
    pub date_param_names: Vec<String>,
    /// Optional strftime format per parameter name, emitted as `<name>_fmt`.
    #[serde(default)]
    pub date_param_formats: IndexMap<String, String>,
    /// Produce the plan but skip execution.
    #[serde(default)]
    pub dry_run: bool,
    /// Static overlay applied to every iteration; generated date keys win on
    /// collision.
    #[serde(default)]
    pub params: IndexMap<String, String>,
}

fn default_date_param_name() -> String {
    "day_id".to_string()
}

/// Backfill date stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateGranularity {
    #[default]
    Day,
    Week,
    Month,
}

/// Loads and parses a workflow configuration file.
pub fn load_workflow_config(path: &Path) -> Result<WorkflowConfig, ConfigError> {
    parse_file(path)
}

/// Loads a runtime parameter overlay: a flat JSON object of string to string.
pub fn load_runtime_params(path: &Path) -> Result<IndexMap<String, String>, ConfigError> {
    parse_file(path)
}

/// Loads and parses a backfill configuration file.
pub fn load_backfill_config(path: &Path) -> Result<BackfillConfig, ConfigError> {
    parse_file(path)
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;

    const WORKFLOW_JSON: &str = r#"{
        "name": "nightly-etl",
        "description": "Nightly warehouse load",
        "params": {"region": "us", "env": "prod"},
        "tasks": [
            {"task_id": "extract", "type": "shell", "command": "echo extract"},
            {"task_id": "transform", "type": "spark-sql", "sql_file": "sql/transform.sql",
             "engine": {"spark.executor.memory": "4g"},
             "params": {"day_id": "${yyyy-MM-dd-1}"}},
            {"task_id": "load", "type": "python", "script": "scripts/load.py",
             "params": {"target": "warehouse"}}
        ],
        "dependencies": [
            {"from": "extract", "to": "transform"},
            {"from": "transform", "to": "load"}
        ],
        "alert": {"transport": "webhook", "endpoint": "https://hooks.example/x", "at_all": true},
        "unknown_future_key": 42
    }"#;

    #[test]
    fn test_parse_workflow_config() {
        init_test_logging();

        let cfg: WorkflowConfig = serde_json::from_str(WORKFLOW_JSON).unwrap();
        assert_eq!(cfg.name, "nightly-etl");
        assert_eq!(cfg.tasks.len(), 3);
        assert_eq!(cfg.dependencies.len(), 2);
        assert!(cfg.fail_fast, "fail_fast defaults to true");
        assert_eq!(cfg.params.get("region").map(String::as_str), Some("us"));

        match &cfg.tasks[1].kind {
            TaskKindConfig::SparkSql { sql_file, engine } => {
                assert_eq!(sql_file.to_str(), Some("sql/transform.sql"));
                assert_eq!(
                    engine.get("spark.executor.memory").map(String::as_str),
                    Some("4g")
                );
            }
            other => panic!("expected spark-sql task, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_task_type_rejected() {
        init_test_logging();

        let raw = r#"{
            "name": "w", "tasks": [{"task_id": "t", "type": "cobol", "command": "x"}]
        }"#;
        assert!(serde_json::from_str::<WorkflowConfig>(raw).is_err());
    }

    #[test]
    fn test_normalized_round_trip_is_idempotent() {
        init_test_logging();

        let cfg: WorkflowConfig = serde_json::from_str(WORKFLOW_JSON).unwrap();
        let first = cfg.normalized();
        let reloaded: WorkflowConfig = serde_json::from_value(first.clone()).unwrap();
        assert_eq!(first, reloaded.normalized());
    }

    #[test]
    fn test_parse_backfill_config() {
        init_test_logging();

        let raw = r#"{
            "start_date": "2024-01-30",
            "end_date": "2024-02-02",
            "date_granularity": "day",
            "date_param_names": ["day_id", "batch"],
            "date_param_formats": {"batch": "%Y%m%d"},
            "params": {"env": "prod"}
        }"#;
        let cfg: BackfillConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.date_granularity, DateGranularity::Day);
        assert_eq!(cfg.date_param_name, "day_id");
        assert_eq!(cfg.date_param_names, vec!["day_id", "batch"]);
        assert!(!cfg.dry_run);
        assert_eq!(
            cfg.start_date,
            Some(NaiveDate::from_ymd_opt(2024, 1, 30).unwrap())
        );
    }

    #[test]
    fn test_backfill_defaults() {
        init_test_logging();

        let cfg: BackfillConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.date_granularity, DateGranularity::Day);
        assert_eq!(cfg.date_param_name, "day_id");
        assert!(cfg.custom_dates.is_empty());
        assert!(cfg.params.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        init_test_logging();

        let err = load_workflow_config(Path::new("/nonexistent/workflow.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
