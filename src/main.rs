// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! stagehand - Reproducible pipeline orchestrator
//!
//! Runs the stages of an ML pipeline in dependency order, skipping every
//! stage whose inputs, parameters and command are unchanged since it last
//! succeeded.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagehand::cli::{dispatch, Cli};
use stagehand::errors::StagehandError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "stagehand=debug" } else { "stagehand=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        if let Err(e) = std::env::set_current_dir(dir) {
            return report(StagehandError::Io {
                message: format!("Failed to change to directory '{}': {}", dir.display(), e),
            });
        }
    }

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => report(e),
    }
}

fn report(error: StagehandError) -> ExitCode {
    let code = error.exit_code();
    eprintln!("{:?}", miette::Report::new(error));
    ExitCode::from(code)
}
