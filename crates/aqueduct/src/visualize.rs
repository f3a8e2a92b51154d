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

//! DAG visualisation.
//!
//! Renders a workflow's dependency graph as Graphviz DOT. Tasks in the same
//! scheduling layer share a `rank=same` group, so the rendering mirrors the
//! engine's parallel batches.

use std::fmt::Write;

use crate::workflow::Workflow;

/// Renders the workflow DAG as a Graphviz DOT document.
pub fn render_dot(workflow: &Workflow) -> String {
    let mut dot = String::new();
    let _ = writeln!(dot, "digraph {} {{", quote(workflow.name()));
    let _ = writeln!(dot, "    rankdir=LR;");
    let _ = writeln!(dot, "    node [shape=box, fontname=\"monospace\"];");

    for task in workflow.tasks().values() {
        let _ = writeln!(
            dot,
            "    {} [label={}];",
            quote(&task.id),
            quote(&format!("{}\\n({})", task.id, task.kind.name()))
        );
    }

    for (index, layer) in workflow.graph().layers().iter().enumerate() {
        if layer.len() > 1 {
            let ids: Vec<String> = layer.iter().map(|id| quote(id)).collect();
            let _ = writeln!(
                dot,
                "    {{ rank=same; {}; }} // layer {index}",
                ids.join("; ")
            );
        }
    }

    for (from, to) in workflow.graph().edges() {
        let _ = writeln!(dot, "    {} -> {};", quote(&from), quote(&to));
    }

    dot.push_str("}\n");
    dot
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::init_test_logging;

    #[test]
    fn test_render_contains_nodes_and_edges() {
        init_test_logging();

        let raw = r#"{
            "name": "viz",
            "tasks": [
                {"task_id": "a", "type": "shell", "command": "echo a"},
                {"task_id": "b", "type": "python", "script": "b.py"},
                {"task_id": "c", "type": "shell", "command": "echo c"}
            ],
            "dependencies": [
                {"from": "a", "to": "b"},
                {"from": "a", "to": "c"}
            ]
        }"#;
        let workflow =
            Workflow::from_config(serde_json::from_str::<WorkflowConfig>(raw).unwrap()).unwrap();
        let dot = render_dot(&workflow);

        assert!(dot.starts_with("digraph \"viz\" {"));
        assert!(dot.contains("\"a\" -> \"b\";"));
        assert!(dot.contains("\"a\" -> \"c\";"));
        assert!(dot.contains("(python)"));
        // b and c form one parallel layer.
        assert!(dot.contains("rank=same"));
        assert!(dot.ends_with("}\n"));
    }
}
