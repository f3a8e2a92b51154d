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

//! Aqueduct CLI - command-line interface for the Aqueduct workflow scheduler.
//!
//! Exit codes: `0` all non-skipped tasks succeeded; `1` at least one task
//! failed; `2` invalid configuration; `3` internal error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// Aqueduct - a configuration-driven DAG workflow scheduler
#[derive(Parser)]
#[command(name = "aqueductctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow once
    Run {
        /// Workflow configuration file (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Runtime parameter overlay file (JSON object of string to string)
        #[arg(long)]
        params: Option<PathBuf>,

        /// Comma-separated task ids to run; everything else is skipped
        #[arg(long = "job_ids", value_delimiter = ',')]
        job_ids: Option<Vec<String>>,
    },

    /// Execute a workflow once per date point of a backfill plan
    Backfill {
        /// Workflow configuration file (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Backfill specification file (JSON)
        #[arg(long = "backfill_params")]
        backfill_params: PathBuf,

        /// Comma-separated task ids to run; everything else is skipped
        #[arg(long = "job_ids", value_delimiter = ',')]
        job_ids: Option<Vec<String>>,
    },

    /// Render the workflow DAG as Graphviz DOT
    Visualize {
        /// Workflow configuration file (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Output path; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,

        /// Runtime parameter overlay file, validated but not rendered
        #[arg(long)]
        params: Option<PathBuf>,
    },

    /// Print workflow metadata: tasks, dependencies, parameters
    Info {
        /// Workflow configuration file (JSON)
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let result: Result<i32> = match cli.command {
        Commands::Run {
            config,
            params,
            job_ids,
        } => commands::run::execute(&config, params.as_deref(), job_ids).await,
        Commands::Backfill {
            config,
            backfill_params,
            job_ids,
        } => commands::backfill::execute(&config, &backfill_params, job_ids).await,
        Commands::Visualize {
            config,
            output,
            params,
        } => commands::visualize::execute(&config, output.as_deref(), params.as_deref()),
        Commands::Info { config } => commands::info::execute(&config),
    };

    let code = match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            exit_code_for(&error)
        }
    };
    std::process::exit(code);
}

/// Maps an error to the documented exit codes: configuration problems are
/// `2`, everything else is an internal error `3`.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    if error.is::<aqueduct::ConfigError>() || error.is::<aqueduct::ValidationError>() {
        2
    } else {
        3
    }
}
