// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Watch command - re-run the pipeline on file changes

use colored::Colorize;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use super::run::print_summary;
use crate::driver::Driver;
use crate::errors::{StagehandError, StagehandResult, EXIT_SUCCESS};
use crate::pipeline::{ExecutionOptions, Pipeline};
use crate::runners::{CancelHandle, CancelSignal};
use crate::utils::spawn_renderer;

/// Run the watch command
pub async fn run(pipeline_path: PathBuf, debounce_ms: u64, jobs: usize, verbose: bool) -> StagehandResult<u8> {
    let root = std::env::current_dir().map_err(|e| StagehandError::Io {
        message: format!("Failed to get current directory: {}", e),
    })?;

    println!("{}", "Starting watch mode...".bold());
    println!("Watching for changes (debounce: {}ms)", debounce_ms);
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), move |result: DebounceEventResult| {
        let _ = tx.send(result);
    })
    .map_err(|e| StagehandError::Io {
        message: format!("Failed to create file watcher: {}", e),
    })?;
    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| StagehandError::Io {
            message: format!("Failed to start watching: {}", e),
        })?;

    let cancel = CancelHandle::new();
    let signal = cancel.signal();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let options = ExecutionOptions {
        jobs,
        ..Default::default()
    };
    let mut filter = run_once(&root, &pipeline_path, &options, &signal, verbose).await;

    loop {
        tokio::select! {
            received = rx.recv() => {
                let Some(result) = received else { break };
                let events = match result {
                    Ok(events) => events,
                    Err(e) => {
                        eprintln!("{}: {:?}", "Watch error".red(), e);
                        continue;
                    }
                };

                let changed: BTreeSet<PathBuf> = events
                    .into_iter()
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .map(|e| e.path)
                    .filter(|path| filter.is_relevant(path))
                    .collect();
                if changed.is_empty() {
                    continue;
                }

                println!();
                println!("{}", "─".repeat(50).dimmed());
                println!("{}: {} file(s) changed", "Change detected".yellow(), changed.len());
                if verbose {
                    for path in &changed {
                        println!("  {}", path.strip_prefix(&root).unwrap_or(path).display());
                    }
                }
                println!();

                filter = run_once(&root, &pipeline_path, &options, &signal, verbose).await;
            }
            _ = signal.cancelled() => break,
        }
    }

    interrupt.abort();
    println!();
    println!("{}", "Stopped watching.".dimmed());
    Ok(EXIT_SUCCESS)
}

/// Reload the project and run it once
///
/// Returns the filter for the next batch of events; a project that fails to
/// load still gets a filter so fixing the pipeline file triggers a retry.
async fn run_once(
    root: &Path,
    pipeline_path: &Path,
    options: &ExecutionOptions,
    signal: &CancelSignal,
    verbose: bool,
) -> WatchFilter {
    let mut driver = match Driver::load(root, pipeline_path) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load pipeline".red(), e);
            let pipeline = Pipeline::from_file(&root.join(pipeline_path)).ok();
            return WatchFilter::new(root, pipeline.as_ref());
        }
    };
    let filter = WatchFilter::new(root, Some(driver.pipeline()));

    let (tx, rx) = mpsc::unbounded_channel();
    driver.set_events(tx).set_cancel(signal.clone());
    let renderer = spawn_renderer(rx, verbose);

    let result = driver.run(options).await;
    drop(driver);
    let _ = renderer.await;

    match result {
        Ok(report) => print_summary(&report),
        Err(e) => eprintln!("{}: {}", "Pipeline execution error".red(), e),
    }

    filter
}

/// Decides which file events should trigger a run
#[derive(Debug)]
struct WatchFilter {
    /// Directories and files whose changes are never relevant
    ignored: Vec<PathBuf>,
    /// File name prefix of the ledger and its siblings
    ledger_name: Option<String>,
}

impl WatchFilter {
    fn new(root: &Path, pipeline: Option<&Pipeline>) -> Self {
        let mut ignored = vec![root.join(".git")];
        let mut ledger_name = None;

        if let Some(pipeline) = pipeline {
            let ledger = root.join(&pipeline.ledger);
            match ledger.parent() {
                Some(dir) if dir != root => ignored.push(dir.to_path_buf()),
                _ => ledger_name = ledger.file_name().map(|n| n.to_string_lossy().to_string()),
            }

            for stage in &pipeline.stages {
                ignored.extend(stage.outs.iter().map(|out| root.join(out)));
            }
        }

        Self { ignored, ledger_name }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if self.ignored.iter().any(|ignored| path.starts_with(ignored)) {
            return false;
        }

        // Temporary files from atomic writes
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if name.starts_with(".tmp") {
            return false;
        }

        match &self.ledger_name {
            Some(ledger) => !name.starts_with(ledger.as_str()),
            None => true,
        }
    }
}
