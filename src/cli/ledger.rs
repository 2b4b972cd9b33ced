// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Ledger command - inspect or reset recorded executions

use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;

use super::{LedgerAction, OutputFormat};
use crate::errors::{StagehandError, StagehandResult, EXIT_SUCCESS};
use crate::fingerprint::format_size;
use crate::ledger::{Ledger, LedgerStore};
use crate::pipeline::Pipeline;
use crate::utils::{print_header, print_warning};

/// Run the ledger command
pub async fn run(pipeline_path: PathBuf, action: LedgerAction, verbose: bool) -> StagehandResult<u8> {
    let root = std::env::current_dir().map_err(|e| StagehandError::Io {
        message: format!("Failed to get current directory: {}", e),
    })?;
    let pipeline = Pipeline::from_file(&root.join(&pipeline_path))?;
    let (store, warning) = LedgerStore::open(root.join(&pipeline.ledger))?;
    if let Some(warning) = warning {
        print_warning(&warning);
    }

    match action {
        LedgerAction::Show { format } => {
            let ledger = store.snapshot().await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ledger)?),
                OutputFormat::Text => print_ledger(&store, &ledger, &pipeline, verbose),
            }
        }

        LedgerAction::Forget { stages } => {
            for stage in &stages {
                if pipeline.get_stage(stage).is_none() {
                    print_warning(&format!("'{}' is not a stage of this pipeline", stage));
                }
                if store.remove(stage).await? {
                    println!("  {} Forgot {}", "✓".green(), stage);
                } else {
                    println!("  {} No entry for {}", "○".dimmed(), stage);
                }
            }
        }

        LedgerAction::Clear { yes } => {
            let ledger = store.snapshot().await;
            if ledger.is_empty() {
                println!("{}", "Ledger is already empty.".dimmed());
                return Ok(EXIT_SUCCESS);
            }

            if !yes {
                print!(
                    "Forget {} recorded stage{}? Every stage will re-run. [y/N] ",
                    ledger.len(),
                    if ledger.len() == 1 { "" } else { "s" }
                );
                io::stdout().flush().ok();

                let mut input = String::new();
                io::stdin().read_line(&mut input).ok();

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("{}", "Cancelled.".dimmed());
                    return Ok(EXIT_SUCCESS);
                }
            }

            let dropped = store.clear().await?;
            println!("{}", format!("Ledger cleared ({} entries).", dropped).green());
        }
    }

    Ok(EXIT_SUCCESS)
}

fn print_ledger(store: &LedgerStore, ledger: &Ledger, pipeline: &Pipeline, verbose: bool) {
    print_header("Ledger");
    println!("  Location: {}", store.path().display());
    println!("  Entries:  {}", ledger.len());

    if ledger.is_empty() {
        println!();
        println!("{}", "  No recorded executions.".dimmed());
        return;
    }

    println!();
    for (name, entry) in &ledger.stages {
        let orphan = if pipeline.get_stage(name).is_none() {
            " (not in pipeline)".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {}{}  {} ago, took {:.2}s, {} output{} ({})",
            name.bold(),
            orphan,
            format_duration(entry.age()),
            entry.duration_ms as f64 / 1000.0,
            entry.outputs.len(),
            if entry.outputs.len() == 1 { "" } else { "s" },
            format_size(entry.output_size())
        );

        if verbose {
            println!("      fingerprint {}", &entry.fingerprint[..12.min(entry.fingerprint.len())]);
            println!("      config      {}", &entry.config_version[..12.min(entry.config_version.len())]);
            for (path, output) in &entry.outputs {
                println!("      {} {} ({})", "→".dimmed(), path, output.formatted_size());
            }
        }
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
