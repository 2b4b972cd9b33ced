// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Terminal color utilities
//!
//! Provides consistent color schemes across the CLI.

use colored::{ColoredString, Colorize};

use crate::pipeline::{RunStatus, StageState};

/// Symbol for a stage state
pub fn state_symbol(state: StageState) -> ColoredString {
    match state {
        StageState::Succeeded => "✓".green(),
        StageState::Skipped => "○".dimmed(),
        StageState::Failed => "✗".red(),
        StageState::Aborted | StageState::SkippedDueToFailure => "⊘".yellow(),
        StageState::Cancelled => "■".yellow(),
        StageState::Stale => "●".cyan(),
        StageState::Pending | StageState::Checking | StageState::Running => "→".blue(),
    }
}

/// Colored label for a stage state
pub fn state_label(state: StageState) -> ColoredString {
    let label = state.to_string();
    match state {
        StageState::Succeeded => label.green(),
        StageState::Skipped => label.dimmed(),
        StageState::Failed => label.red().bold(),
        StageState::Aborted | StageState::SkippedDueToFailure | StageState::Cancelled => label.yellow(),
        StageState::Stale => label.cyan(),
        _ => label.normal(),
    }
}

/// Colored run status
pub fn status_label(status: RunStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Completed => label.green().bold(),
        RunStatus::CompletedWithFailures | RunStatus::Cancelled => label.yellow().bold(),
        RunStatus::Aborted => label.red().bold(),
    }
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.chars().count().max(40)));
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}
