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

//! `aqueductctl visualize` - DOT rendering of the workflow DAG.

use anyhow::Result;
use aqueduct::{load_runtime_params, load_workflow_config, render_dot, Workflow};
use std::fs;
use std::path::Path;
use tracing::debug;

pub fn execute(config: &Path, output: Option<&Path>, params: Option<&Path>) -> Result<i32> {
    let workflow_config = load_workflow_config(config)?;
    let workflow = Workflow::from_config(workflow_config)?;

    // The overlay does not change the graph shape; loading it still surfaces
    // a broken file at visualisation time rather than at the next run.
    if let Some(path) = params {
        let overlay = load_runtime_params(path)?;
        debug!(keys = overlay.len(), "loaded runtime overlay");
    }

    let dot = render_dot(&workflow);
    match output {
        Some(path) => {
            fs::write(path, &dot)?;
            println!("wrote {}", path.display());
        }
        None => print!("{dot}"),
    }
    Ok(0)
}
