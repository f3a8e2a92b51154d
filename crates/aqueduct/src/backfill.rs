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

//! Backfill planning and the sequential backfill driver.
//!
//! A [`BackfillPlan`] expands a [`BackfillConfig`] into an ordered sequence
//! of date points, each carrying a fully materialised parameter overlay.
//! For every date point `d` and parameter name `P` the overlay contains:
//!
//! - `P` — `d` in canonical form (`YYYY-MM-DD`);
//! - `P_no_dash` — the canonical form with dashes stripped (`YYYYMMDD`);
//! - `P_fmt` — `d` formatted per `date_param_formats[P]`, when supplied.
//!
//! Generated date keys win over the static `params` overlay on collision.
//!
//! [`run_backfill`] drives the engine strictly sequentially: a later date
//! point is dispatched only after the previous run has terminated. An engine
//! abort stops the loop before the next point.

use chrono::{Datelike, Days, Months, NaiveDate};
use chrono::format::{Item, StrftimeItems};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::config::{BackfillConfig, DateGranularity};
use crate::engine::{ExecutionEngine, WorkflowOutcome};
use crate::error::{ConfigError, PipelineError};
use crate::workflow::Workflow;

/// One backfill iteration: the target date and its parameter overlay.
#[derive(Debug, Clone)]
pub struct DatePoint {
    pub date: NaiveDate,
    pub overlay: IndexMap<String, String>,
}

/// An ordered, fully materialised backfill plan.
#[derive(Debug, Clone)]
pub struct BackfillPlan {
    pub points: Vec<DatePoint>,
    pub dry_run: bool,
}

impl BackfillPlan {
    /// Expands a backfill configuration into date points with overlays.
    pub fn from_config(config: &BackfillConfig) -> Result<Self, ConfigError> {
        let dates = date_points(config)?;
        let names: Vec<&str> = if config.date_param_names.is_empty() {
            vec![config.date_param_name.as_str()]
        } else {
            config.date_param_names.iter().map(String::as_str).collect()
        };

        let points = dates
            .into_iter()
            .map(|date| DatePoint {
                overlay: materialise_overlay(date, &names, config),
                date,
            })
            .collect();

        Ok(Self {
            points,
            dry_run: config.dry_run,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Generates the ordered date sequence for the plan.
fn date_points(config: &BackfillConfig) -> Result<Vec<NaiveDate>, ConfigError> {
    if !config.custom_dates.is_empty() {
        return Ok(config.custom_dates.clone());
    }

    let (start, end) = match (config.start_date, config.end_date) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return Err(ConfigError::InvalidBackfill {
                message: "start_date and end_date are required unless custom_dates is given"
                    .to_string(),
            })
        }
    };
    if start > end {
        return Err(ConfigError::InvalidBackfill {
            message: format!("start_date {start} is after end_date {end}"),
        });
    }

    let mut dates = Vec::new();
    match config.date_granularity {
        DateGranularity::Day => {
            let mut current = start;
            while current <= end {
                dates.push(current);
                current = current + Days::new(1);
            }
        }
        DateGranularity::Week => {
            // Anchor on the Monday of the start date's week, even when that
            // Monday precedes the range start.
            let mut current = start - Days::new(start.weekday().num_days_from_monday() as u64);
            while current <= end {
                dates.push(current);
                current = current + Days::new(7);
            }
        }
        DateGranularity::Month => {
            let mut current = first_of_month(start);
            if current < start {
                current = current + Months::new(1);
            }
            while current <= end {
                dates.push(current);
                current = current + Months::new(1);
            }
        }
    }
    Ok(dates)
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Builds the overlay for one date point: static params first, then the
/// generated date keys so they win on collision.
fn materialise_overlay(
    date: NaiveDate,
    names: &[&str],
    config: &BackfillConfig,
) -> IndexMap<String, String> {
    let canonical = date.format("%Y-%m-%d").to_string();
    let no_dash = canonical.replace('-', "");

    let mut overlay = config.params.clone();
    for name in names {
        overlay.insert(name.to_string(), canonical.clone());
        overlay.insert(format!("{name}_no_dash"), no_dash.clone());
        if let Some(format) = config.date_param_formats.get(*name) {
            match format_date(date, format) {
                Some(formatted) => {
                    overlay.insert(format!("{name}_fmt"), formatted);
                }
                None => {
                    warn!(
                        param = %name,
                        %format,
                        "unparseable date format, omitting the _fmt key"
                    );
                }
            }
        }
    }
    overlay
}

/// Formats a date with a user-supplied strftime string, rejecting malformed
/// specifiers instead of panicking inside chrono's Display.
fn format_date(date: NaiveDate, format: &str) -> Option<String> {
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }
    Some(date.format_with_items(items.into_iter()).to_string())
}

/// Aggregate result of a backfill: one outcome per executed date point.
#[derive(Debug)]
pub struct BackfillOutcome {
    pub runs: Vec<(NaiveDate, WorkflowOutcome)>,
    /// True when an abort cut the plan short.
    pub aborted: bool,
    pub dry_run: bool,
}

impl BackfillOutcome {
    /// True when every executed date point succeeded and none were cut off.
    pub fn success(&self) -> bool {
        !self.aborted && self.runs.iter().all(|(_, outcome)| outcome.success())
    }
}

/// Runs the workflow once per date point, strictly sequentially.
///
/// Each point's overlay becomes the runtime parameter layer of its run. With
/// `dry_run` set the overlays are logged and execution is bypassed.
pub async fn run_backfill(
    engine: &ExecutionEngine,
    workflow: &Workflow,
    plan: &BackfillPlan,
    only_tasks: Option<&HashSet<String>>,
) -> Result<BackfillOutcome, PipelineError> {
    info!(
        workflow = %workflow.name(),
        points = plan.len(),
        dry_run = plan.dry_run,
        "starting backfill"
    );

    let mut runs = Vec::new();
    let mut aborted = false;
    for (index, point) in plan.points.iter().enumerate() {
        if engine.is_aborted() {
            warn!(
                remaining = plan.len() - index,
                "backfill aborted, skipping remaining date points"
            );
            aborted = true;
            break;
        }
        if plan.dry_run {
            info!(date = %point.date, overlay = ?point.overlay, "dry run, skipping execution");
            continue;
        }

        info!(date = %point.date, point = index + 1, total = plan.len(), "backfill date point");
        let outcome = engine.run(workflow, &point.overlay, only_tasks).await?;
        let success = outcome.success();
        runs.push((point.date, outcome));
        if !success {
            warn!(date = %point.date, "backfill date point failed");
        }
    }

    Ok(BackfillOutcome {
        runs,
        aborted,
        dry_run: plan.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_logging;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config(raw: &str) -> BackfillConfig {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_day_granularity_inclusive_range() {
        init_test_logging();

        let plan = BackfillPlan::from_config(&config(
            r#"{"start_date": "2024-01-30", "end_date": "2024-02-02"}"#,
        ))
        .unwrap();
        let dates: Vec<NaiveDate> = plan.points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 1, 30),
                date(2024, 1, 31),
                date(2024, 2, 1),
                date(2024, 2, 2)
            ]
        );
    }

    #[test]
    fn test_derived_variants_and_formats() {
        init_test_logging();

        let plan = BackfillPlan::from_config(&config(
            r#"{
                "start_date": "2024-01-30",
                "end_date": "2024-02-02",
                "date_param_names": ["day_id", "batch"],
                "date_param_formats": {"batch": "%Y%m%d"}
            }"#,
        ))
        .unwrap();
        assert_eq!(plan.len(), 4);

        let overlay = &plan.points[1].overlay;
        assert_eq!(overlay.get("day_id").unwrap(), "2024-01-31");
        assert_eq!(overlay.get("day_id_no_dash").unwrap(), "20240131");
        assert_eq!(overlay.get("batch").unwrap(), "2024-01-31");
        assert_eq!(overlay.get("batch_no_dash").unwrap(), "20240131");
        assert_eq!(overlay.get("batch_fmt").unwrap(), "20240131");
        assert!(overlay.get("day_id_fmt").is_none());
    }

    #[test]
    fn test_week_granularity_anchors_on_monday() {
        init_test_logging();

        // 2024-07-03 is a Wednesday; the anchor Monday is 2024-07-01.
        let plan = BackfillPlan::from_config(&config(
            r#"{"start_date": "2024-07-03", "end_date": "2024-07-20", "date_granularity": "week"}"#,
        ))
        .unwrap();
        let dates: Vec<NaiveDate> = plan.points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 7, 1), date(2024, 7, 8), date(2024, 7, 15)]
        );
    }

    #[test]
    fn test_month_granularity_first_point_not_before_start() {
        init_test_logging();

        let plan = BackfillPlan::from_config(&config(
            r#"{"start_date": "2024-01-30", "end_date": "2024-04-02", "date_granularity": "month"}"#,
        ))
        .unwrap();
        let dates: Vec<NaiveDate> = plan.points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 2, 1), date(2024, 3, 1), date(2024, 4, 1)]
        );
    }

    #[test]
    fn test_month_granularity_start_on_first() {
        init_test_logging();

        let plan = BackfillPlan::from_config(&config(
            r#"{"start_date": "2024-02-01", "end_date": "2024-03-15", "date_granularity": "month"}"#,
        ))
        .unwrap();
        let dates: Vec<NaiveDate> = plan.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date(2024, 2, 1), date(2024, 3, 1)]);
    }

    #[test]
    fn test_custom_dates_override_range() {
        init_test_logging();

        let plan = BackfillPlan::from_config(&config(
            r#"{
                "start_date": "2024-01-01",
                "end_date": "2024-12-31",
                "custom_dates": ["2024-06-03", "2024-05-01"]
            }"#,
        ))
        .unwrap();
        let dates: Vec<NaiveDate> = plan.points.iter().map(|p| p.date).collect();
        // Verbatim, in the given order.
        assert_eq!(dates, vec![date(2024, 6, 3), date(2024, 5, 1)]);
    }

    #[test]
    fn test_generated_keys_win_over_static_params() {
        init_test_logging();

        let plan = BackfillPlan::from_config(&config(
            r#"{
                "start_date": "2024-01-01",
                "end_date": "2024-01-01",
                "params": {"day_id": "static-loses", "env": "prod"}
            }"#,
        ))
        .unwrap();
        let overlay = &plan.points[0].overlay;
        assert_eq!(overlay.get("day_id").unwrap(), "2024-01-01");
        assert_eq!(overlay.get("env").unwrap(), "prod");
    }

    #[test]
    fn test_missing_range_rejected() {
        init_test_logging();

        let err = BackfillPlan::from_config(&config(r#"{"end_date": "2024-01-01"}"#)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackfill { .. }));
    }

    #[test]
    fn test_inverted_range_rejected() {
        init_test_logging();

        let err = BackfillPlan::from_config(&config(
            r#"{"start_date": "2024-02-01", "end_date": "2024-01-01"}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackfill { .. }));
    }

    #[test]
    fn test_malformed_format_omits_fmt_key() {
        init_test_logging();

        let plan = BackfillPlan::from_config(&config(
            r#"{
                "start_date": "2024-01-01",
                "end_date": "2024-01-01",
                "date_param_formats": {"day_id": "%Q bogus"}
            }"#,
        ))
        .unwrap();
        let overlay = &plan.points[0].overlay;
        assert_eq!(overlay.get("day_id").unwrap(), "2024-01-01");
        assert!(overlay.get("day_id_fmt").is_none());
    }
}
