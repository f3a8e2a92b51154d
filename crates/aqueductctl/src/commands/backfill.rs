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

//! `aqueductctl backfill` - iterated execution over a date plan.

use anyhow::Result;
use aqueduct::{
    load_backfill_config, load_workflow_config, run_backfill, BackfillPlan, ExecutionEngine,
    Workflow,
};
use std::collections::HashSet;
use std::path::Path;

use super::summary_table;

pub async fn execute(
    config: &Path,
    backfill_params: &Path,
    job_ids: Option<Vec<String>>,
) -> Result<i32> {
    let workflow_config = load_workflow_config(config)?;
    let workflow = Workflow::from_config(workflow_config)?;
    let backfill_config = load_backfill_config(backfill_params)?;
    let plan = BackfillPlan::from_config(&backfill_config)?;

    let only: Option<HashSet<String>> = job_ids.map(|ids| ids.into_iter().collect());

    let engine = ExecutionEngine::with_defaults();
    let outcome = run_backfill(&engine, &workflow, &plan, only.as_ref()).await?;

    for (date, run) in &outcome.runs {
        println!("== {date} ==");
        println!("{}", summary_table(&workflow, run));
    }
    if outcome.dry_run {
        println!("dry run: {} date points planned, none executed", plan.len());
    }

    Ok(if outcome.success() { 0 } else { 1 })
}
