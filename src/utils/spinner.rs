// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Progress indicators
//!
//! Renders executor events as a progress bar with one log line per
//! finished stage.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::colors::state_symbol;
use crate::pipeline::{StageEvent, StageState};

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.blue} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Create a progress bar for determinate progress
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.blue} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Turns a stream of stage events into terminal output
pub struct StageProgress {
    bar: Option<ProgressBar>,
    started: HashMap<String, Instant>,
    running: Vec<String>,
    verbose: bool,
}

impl StageProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            bar: None,
            started: HashMap::new(),
            running: Vec::new(),
            verbose,
        }
    }

    /// Apply one event
    pub fn handle(&mut self, event: StageEvent) {
        match event {
            StageEvent::Planned { stages } => {
                self.bar = Some(create_progress_bar(stages.len() as u64, "starting"));
            }
            StageEvent::Transition { stage, state, detail } => {
                self.transition(stage, state, detail);
            }
        }
    }

    fn transition(&mut self, stage: String, state: StageState, detail: Option<String>) {
        match state {
            StageState::Pending | StageState::Checking => return,
            StageState::Running => {
                self.started.insert(stage.clone(), Instant::now());
                self.running.push(stage.clone());
                if self.verbose {
                    let why = detail.map(|d| format!(" ({})", d)).unwrap_or_default();
                    self.println(format!("  {} {}{}", "→".blue(), stage, why.dimmed()));
                }
                self.update_message();
                return;
            }
            _ => {}
        }

        self.running.retain(|s| s != &stage);
        let elapsed = self
            .started
            .remove(&stage)
            .map(|t| format!(" ({:.2}s)", t.elapsed().as_secs_f64()))
            .unwrap_or_default();

        let suffix = match (state, detail) {
            (StageState::Skipped, _) => " (up to date)".dimmed().to_string(),
            (StageState::Failed, Some(detail)) => format!(" - {}", detail.dimmed()),
            (StageState::Aborted | StageState::SkippedDueToFailure, Some(root)) => {
                format!(" (blocked by {})", root).dimmed().to_string()
            }
            (StageState::Stale, Some(reason)) => format!(" ({})", reason).dimmed().to_string(),
            _ => String::new(),
        };

        self.println(format!("  {} {}{}{}", state_symbol(state), stage.bold(), elapsed, suffix));
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        self.update_message();
    }

    fn update_message(&self) {
        if let Some(bar) = &self.bar {
            if self.running.is_empty() {
                bar.set_message("checking");
            } else {
                bar.set_message(self.running.join(", "));
            }
        }
    }

    fn println(&self, line: String) {
        // A hidden bar (stdout is not a terminal) swallows println
        match &self.bar {
            Some(bar) if !bar.is_hidden() => bar.println(line),
            _ => println!("{}", line),
        }
    }

    /// Remove the bar, keeping the printed lines
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Render events from `rx` until the sender is dropped
pub fn spawn_renderer(mut rx: mpsc::UnboundedReceiver<StageEvent>, verbose: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut progress = StageProgress::new(verbose);
        while let Some(event) = rx.recv().await {
            progress.handle(event);
        }
        progress.finish();
    })
}
