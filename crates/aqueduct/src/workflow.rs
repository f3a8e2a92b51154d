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

//! Workflow assembly and validation.
//!
//! A [`Workflow`] is the validated, immutable form of a
//! [`WorkflowConfig`](crate::config::WorkflowConfig): tasks indexed by id, the
//! dependency [`TaskGraph`](crate::graph::TaskGraph), global parameters, the
//! failure policy and optional alert configuration. Validation happens
//! entirely at construction — duplicate ids, dangling edges, self-loops and
//! cycles are all rejected before any task can run.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::config::{AlertConfig, WorkflowConfig};
use crate::error::ValidationError;
use crate::graph::TaskGraph;
use crate::task::Task;

/// A validated workflow, ready for execution.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    description: Option<String>,
    params: IndexMap<String, String>,
    tasks: IndexMap<String, Arc<Task>>,
    graph: TaskGraph,
    alert: Option<AlertConfig>,
    fail_fast: bool,
}

impl Workflow {
    /// Builds a workflow from parsed configuration, validating structure.
    pub fn from_config(config: WorkflowConfig) -> Result<Self, ValidationError> {
        if config.tasks.is_empty() {
            return Err(ValidationError::EmptyWorkflow);
        }

        let mut tasks: IndexMap<String, Arc<Task>> = IndexMap::new();
        for task_config in config.tasks {
            let task = Task::from(task_config);
            if tasks.contains_key(&task.id) {
                return Err(ValidationError::DuplicateTask(task.id));
            }
            tasks.insert(task.id.clone(), Arc::new(task));
        }

        let task_ids: Vec<String> = tasks.keys().cloned().collect();
        let edges: Vec<(String, String)> = config
            .dependencies
            .iter()
            .map(|dep| (dep.from.clone(), dep.to.clone()))
            .collect();
        let graph = TaskGraph::build(&task_ids, &edges)?;

        Ok(Self {
            name: config.name,
            description: config.description,
            params: config.params,
            tasks,
            graph,
            alert: config.alert,
            fail_fast: config.fail_fast,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Workflow-global parameters, the lowest-precedence scope layer.
    pub fn params(&self) -> &IndexMap<String, String> {
        &self.params
    }

    /// Tasks indexed by id, in declaration order.
    pub fn tasks(&self) -> &IndexMap<String, Arc<Task>> {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Arc<Task>> {
        self.tasks.get(id)
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn alert(&self) -> Option<&AlertConfig> {
        self.alert.as_ref()
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;

    fn config(raw: &str) -> WorkflowConfig {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_valid_workflow_builds() {
        init_test_logging();

        let workflow = Workflow::from_config(config(
            r#"{
                "name": "etl",
                "params": {"region": "us"},
                "tasks": [
                    {"task_id": "a", "type": "shell", "command": "echo a"},
                    {"task_id": "b", "type": "shell", "command": "echo b"}
                ],
                "dependencies": [{"from": "a", "to": "b"}]
            }"#,
        ))
        .unwrap();

        assert_eq!(workflow.name(), "etl");
        assert!(workflow.fail_fast());
        assert_eq!(workflow.graph().layers().len(), 2);
        assert!(workflow.task("a").is_some());
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        init_test_logging();

        let err = Workflow::from_config(config(
            r#"{
                "name": "w",
                "tasks": [
                    {"task_id": "a", "type": "shell", "command": "x"},
                    {"task_id": "a", "type": "shell", "command": "y"}
                ]
            }"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateTask(ref id) if id == "a"));
    }

    #[test]
    fn test_empty_workflow_rejected() {
        init_test_logging();

        let err = Workflow::from_config(config(r#"{"name": "w", "tasks": []}"#)).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyWorkflow));
    }

    #[test]
    fn test_cycle_rejected_before_execution() {
        init_test_logging();

        let err = Workflow::from_config(config(
            r#"{
                "name": "w",
                "tasks": [
                    {"task_id": "a", "type": "shell", "command": "x"},
                    {"task_id": "b", "type": "shell", "command": "y"}
                ],
                "dependencies": [
                    {"from": "a", "to": "b"},
                    {"from": "b", "to": "a"}
                ]
            }"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ValidationError::CyclicDependency { .. }));
    }

    #[test]
    fn test_fail_fast_override() {
        init_test_logging();

        let workflow = Workflow::from_config(config(
            r#"{
                "name": "w",
                "fail_fast": false,
                "tasks": [{"task_id": "a", "type": "shell", "command": "x"}]
            }"#,
        ))
        .unwrap();
        assert!(!workflow.fail_fast());
    }
}
