// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Run command - execute stale stages

use colored::Colorize;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::{load_driver, OutputFormat};
use crate::errors::StagehandResult;
use crate::pipeline::{ExecutionOptions, RunReport, StageState};
use crate::runners::CancelHandle;
use crate::utils::{spawn_renderer, state_symbol, status_label};

/// Run the pipeline
pub async fn run(
    pipeline_path: PathBuf,
    options: ExecutionOptions,
    format: OutputFormat,
    verbose: bool,
) -> StagehandResult<u8> {
    let mut driver = load_driver(&pipeline_path)?;

    let cancel = CancelHandle::new();
    driver.set_cancel(cancel.signal());
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "Interrupted, stopping running stages...".yellow());
                cancel.cancel();
            }
        })
    };

    let renderer = if format == OutputFormat::Text {
        let (tx, rx) = mpsc::unbounded_channel();
        driver.set_events(tx);
        if options.dry_run {
            println!("{}", "Dry run - nothing will be executed".yellow().bold());
        }
        println!("{} {}", "Pipeline:".bold(), driver.pipeline().name.cyan());
        println!();
        Some(spawn_renderer(rx, verbose))
    } else {
        None
    };

    let result = driver.run(&options).await;
    // Dropping the driver closes the event channel so the renderer drains.
    drop(driver);
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }
    interrupt.abort();

    let report = result?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_summary(&report),
    }

    Ok(report.exit_code())
}

/// Print the end-of-run summary
pub(crate) fn print_summary(report: &RunReport) {
    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!();
        for stage in failures {
            println!("{}", format!("Stage '{}' failed:", stage.name).red().bold());
            if let Some(error) = &stage.error {
                for line in error.lines() {
                    println!("  {}", line.dimmed());
                }
            }
        }
    }

    let warnings: Vec<_> = report
        .warnings
        .iter()
        .map(|w| (None, w))
        .chain(
            report
                .stages
                .iter()
                .flat_map(|s| s.warnings.iter().map(move |w| (Some(s.name.as_str()), w))),
        )
        .collect();
    if !warnings.is_empty() {
        println!();
        for (stage, warning) in warnings {
            match stage {
                Some(stage) => println!("  {} {}: {}", "⚠".yellow(), stage, warning),
                None => println!("  {} {}", "⚠".yellow(), warning),
            }
        }
    }

    println!();
    let mut counts = Vec::new();
    for state in [
        StageState::Succeeded,
        StageState::Skipped,
        StageState::Stale,
        StageState::Failed,
        StageState::Aborted,
        StageState::SkippedDueToFailure,
        StageState::Cancelled,
    ] {
        let n = report.count(state);
        if n > 0 {
            counts.push(format!("{} {} {}", state_symbol(state), n, state));
        }
    }
    println!(
        "{} {} ({:.2}s)",
        status_label(report.status),
        counts.join(", "),
        report.duration_ms as f64 / 1000.0
    );
}
