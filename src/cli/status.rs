// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Status command - report which stages are stale and why

use colored::Colorize;
use std::path::PathBuf;

use super::{load_driver, OutputFormat};
use crate::errors::StagehandResult;
use crate::pipeline::{RunReport, StageState};
use crate::utils::{create_spinner, state_label, state_symbol};

/// Run the status command
pub async fn run(
    pipeline_path: PathBuf,
    stages: Vec<String>,
    format: OutputFormat,
    verbose: bool,
) -> StagehandResult<u8> {
    let driver = load_driver(&pipeline_path)?;

    let spinner = (format == OutputFormat::Text).then(|| create_spinner("Checking stages..."));
    let result = driver.status(&stages).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let report = result?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_status(&report, verbose),
    }

    Ok(report.exit_code())
}

fn print_status(report: &RunReport, verbose: bool) {
    println!(
        "{} {} (config {})",
        "Pipeline:".bold(),
        report.pipeline.cyan(),
        report.config_version.chars().take(12).collect::<String>().dimmed()
    );
    println!();

    let width = report.stages.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for stage in &report.stages {
        let detail = match (stage.state, &stage.reason, &stage.error) {
            (StageState::Stale, Some(reason), _) => reason.to_string(),
            (StageState::Failed, _, Some(error)) => error.lines().next().unwrap_or_default().to_string(),
            _ => match &stage.blocked_by {
                Some(root) => format!("blocked by {}", root),
                None => String::new(),
            },
        };
        println!(
            "  {} {:<width$}  {}  {}",
            state_symbol(stage.state),
            stage.name,
            state_label(stage.state),
            detail.dimmed(),
            width = width
        );

        if verbose {
            for output in &stage.outputs {
                println!("      {} {}", "→".dimmed(), output.display());
            }
        }
    }

    for warning in &report.warnings {
        println!("  {} {}", "⚠".yellow(), warning);
    }

    println!();
    let stale = report.count(StageState::Stale);
    if stale == 0 && report.failures().next().is_none() {
        println!("{}", "Everything is up to date.".green().bold());
    } else if stale > 0 {
        println!(
            "{}",
            format!("{} stage{} would run.", stale, if stale == 1 { "" } else { "s" })
                .yellow()
                .bold()
        );
    }
}
