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

pub mod backfill;
pub mod info;
pub mod run;
pub mod visualize;

use aqueduct::{Workflow, WorkflowOutcome};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};

/// Renders the per-task summary table the CLI prints after a run.
pub fn summary_table(workflow: &Workflow, outcome: &WorkflowOutcome) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Task", "Type", "State", "Duration", "Exit", "Error"]);

    for (id, report) in &outcome.tasks {
        let kind = workflow
            .task(id)
            .map(|task| task.kind.name())
            .unwrap_or("?");
        let duration = report
            .duration()
            .map(|d| format!("{:.2}s", d.num_milliseconds() as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        let exit = report
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = report
            .error
            .as_deref()
            .map(|e| truncate(e, 60))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(id),
            Cell::new(kind),
            Cell::new(report.state.to_string()),
            Cell::new(duration),
            Cell::new(exit),
            Cell::new(error),
        ]);
    }
    table
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{head}...")
}
