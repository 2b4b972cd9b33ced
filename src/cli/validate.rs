// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Validate command - check the pipeline and its configuration

use colored::Colorize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::ConfigSnapshot;
use crate::errors::{StagehandError, StagehandResult, EXIT_SUCCESS, EXIT_VALIDATION};
use crate::pipeline::{Pipeline, PipelineValidator};
use crate::runners::{create_default_runners, TaskRunner};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> StagehandResult<u8> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let root = std::env::current_dir().map_err(|e| StagehandError::Io {
        message: format!("Failed to get current directory: {}", e),
    })?;

    let pipeline = Pipeline::from_file(&root.join(&pipeline_path))?;
    println!("  {} Pipeline file parsed", "✓".green());

    let snapshot = ConfigSnapshot::load(&root.join(&pipeline.config), &root.join(&pipeline.params))?;
    println!(
        "  {} Configuration loaded (version {})",
        "✓".green(),
        snapshot.short_version()
    );

    let validation = PipelineValidator::validate(&pipeline, Some(&snapshot));
    let missing_inputs = PipelineValidator::missing_sources(&pipeline, &root);

    let runners = create_default_runners(TaskRunner::new());
    let tools: BTreeSet<&str> = pipeline.stages.iter().map(|s| s.tool_name()).collect();
    let mut missing_runners = Vec::new();
    for tool in tools {
        match runners.get(tool) {
            Some(runner) if matches!(runner.check_available().await, Ok(true)) => {}
            _ => missing_runners.push(tool.to_string()),
        }
    }

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !missing_inputs.is_empty() {
        println!();
        println!("{}:", "Missing inputs".yellow().bold());
        for missing in &missing_inputs {
            println!("  {} {}", "⚠".yellow(), missing);
        }
    }

    if !missing_runners.is_empty() {
        println!();
        println!("{}:", "Unavailable runners".yellow().bold());
        for tool in &missing_runners {
            println!("  {} {}", "⚠".yellow(), tool);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {}", pipeline.name);
        println!("  Ledger: {}", pipeline.ledger.display());
        println!("  Stages: {}", pipeline.stages.len());
        for stage in &pipeline.stages {
            let params = if stage.params.is_empty() {
                String::new()
            } else {
                format!(" [params: {}]", stage.params.join(", "))
            };
            println!("    - {} ({}){}", stage.name, stage.tool_name(), params.dimmed());
        }
    }

    println!();

    if !validation.is_valid() {
        println!("{}", "Pipeline validation failed.".red().bold());
        return Ok(EXIT_VALIDATION);
    }

    if validation.has_warnings() || !missing_inputs.is_empty() || !missing_runners.is_empty() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
    }

    Ok(EXIT_SUCCESS)
}
