// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for stagehand. Every handler returns
//! the process exit code, or an error whose own exit code is used instead.

pub mod graph;
pub mod init;
pub mod ledger;
pub mod run;
pub mod status;
pub mod validate;
pub mod watch;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::driver::Driver;
use crate::errors::{StagehandError, StagehandResult};
use crate::pipeline::DEFAULT_PIPELINE_FILE;

/// Reproducible ML pipeline orchestrator
///
/// Runs only the stages whose inputs, parameters or command changed.
#[derive(Parser, Debug)]
#[clap(
    name = "stagehand",
    version,
    about = "Reproducible pipeline orchestrator: re-runs only what changed",
    long_about = None,
    after_help = "Examples:\n\
        stagehand init                  Scaffold the standard ML pipeline\n\
        stagehand status                Show which stages are stale and why\n\
        stagehand run                   Run every stale stage\n\
        stagehand run training          Run training and whatever it needs\n\
        stagehand watch                 Re-run on file changes\n\n\
        See 'stagehand <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a new project with the standard five-stage pipeline
    Init {
        /// Project name (defaults to current directory name)
        name: Option<String>,

        /// Overwrite existing files
        #[clap(short, long)]
        force: bool,
    },

    /// Run stale stages
    Run {
        /// Stages to run, with their upstream closure (default: all)
        stages: Vec<String>,

        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE_FILE)]
        pipeline: PathBuf,

        /// Run selected stages even if they are up to date
        #[clap(short, long)]
        force: bool,

        /// Skip, rather than abort, stages downstream of a failure
        #[clap(short = 'k', long)]
        keep_going: bool,

        /// Maximum stages running at once
        #[clap(short, long, default_value = "1")]
        jobs: usize,

        /// Only show what would run
        #[clap(long)]
        dry_run: bool,

        /// Output format for the final report
        #[clap(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show which stages are stale and why
    Status {
        /// Stages to check, with their upstream closure (default: all)
        stages: Vec<String>,

        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE_FILE)]
        pipeline: PathBuf,

        /// Output format
        #[clap(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate the pipeline and configuration
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = DEFAULT_PIPELINE_FILE)]
        pipeline: PathBuf,
    },

    /// Show the stage graph
    Graph {
        /// Pipeline file
        #[clap(default_value = DEFAULT_PIPELINE_FILE)]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, default_value = "text")]
        format: GraphFormat,
    },

    /// Inspect or reset the execution ledger
    Ledger {
        #[clap(subcommand)]
        action: LedgerAction,

        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE_FILE)]
        pipeline: PathBuf,
    },

    /// Watch mode - re-run the pipeline on file changes
    Watch {
        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE_FILE)]
        pipeline: PathBuf,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,

        /// Maximum stages running at once
        #[clap(short, long, default_value = "1")]
        jobs: usize,
    },
}

/// Ledger actions
#[derive(Subcommand, Debug, Clone)]
pub enum LedgerAction {
    /// Show recorded entries
    Show {
        /// Output format
        #[clap(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Forget stages so their next run re-executes them
    Forget {
        /// Stage names
        #[clap(required = true)]
        stages: Vec<String>,
    },

    /// Forget every stage
    Clear {
        /// Skip confirmation
        #[clap(short, long)]
        yes: bool,
    },
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

/// Dispatch to command handlers
pub async fn dispatch(cli: Cli) -> StagehandResult<u8> {
    let verbose = cli.verbose;

    match cli.command {
        Commands::Init { name, force } => init::run(name, force, verbose).await,
        Commands::Run {
            stages,
            pipeline,
            force,
            keep_going,
            jobs,
            dry_run,
            format,
        } => {
            let options = crate::pipeline::ExecutionOptions {
                dry_run,
                force,
                continue_on_failure: keep_going,
                jobs,
                selection: stages,
            };
            run::run(pipeline, options, format, verbose).await
        }
        Commands::Status {
            stages,
            pipeline,
            format,
        } => status::run(pipeline, stages, format, verbose).await,
        Commands::Validate { pipeline } => validate::run(pipeline, verbose).await,
        Commands::Graph { pipeline, format } => graph::run(pipeline, format, verbose).await,
        Commands::Ledger { action, pipeline } => ledger::run(pipeline, action, verbose).await,
        Commands::Watch {
            pipeline,
            debounce,
            jobs,
        } => watch::run(pipeline, debounce, jobs, verbose).await,
    }
}

/// Load the project in the current directory
pub(crate) fn load_driver(pipeline_path: &Path) -> StagehandResult<Driver> {
    let root = std::env::current_dir().map_err(|e| StagehandError::Io {
        message: format!("Failed to get current directory: {}", e),
    })?;
    Driver::load(root, pipeline_path)
}
