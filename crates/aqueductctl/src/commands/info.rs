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

//! `aqueductctl info` - workflow metadata introspection.

use anyhow::Result;
use aqueduct::{load_workflow_config, Workflow};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use std::path::Path;

pub fn execute(config: &Path) -> Result<i32> {
    let workflow_config = load_workflow_config(config)?;
    let workflow = Workflow::from_config(workflow_config)?;

    println!("workflow: {}", workflow.name());
    if let Some(description) = workflow.description() {
        println!("description: {description}");
    }
    println!("fail_fast: {}", workflow.fail_fast());

    if !workflow.params().is_empty() {
        println!("\nparameters:");
        for (key, value) in workflow.params() {
            println!("  {key} = {value}");
        }
    }

    let mut tasks = Table::new();
    tasks.load_preset(UTF8_FULL_CONDENSED);
    tasks.set_header(vec!["Task", "Type", "Layer", "Params"]);
    for (layer_index, layer) in workflow.graph().layers().iter().enumerate() {
        for id in layer {
            if let Some(task) = workflow.task(id) {
                tasks.add_row(vec![
                    id.clone(),
                    task.kind.name().to_string(),
                    layer_index.to_string(),
                    task.params.len().to_string(),
                ]);
            }
        }
    }
    println!("\n{tasks}");

    let edges = workflow.graph().edges();
    if !edges.is_empty() {
        println!("dependencies:");
        for (from, to) in edges {
            println!("  {from} -> {to}");
        }
    }

    Ok(0)
}
