// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Pipeline executor
//!
//! Walks the stage graph in topological order. Each stage is fingerprinted,
//! compared against the ledger, and either skipped or handed to its runner;
//! successful runs are recorded in the ledger. A failed stage blocks its
//! downstream closure while independent branches keep going.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::report::{RunReport, StageReport};
use super::state::{staleness, RunStatus, StageState, StaleReason};
use crate::config::ConfigSnapshot;
use crate::errors::{DanglingKind, StagehandError, StagehandResult};
use crate::fingerprint::{ArtifactFingerprint, IdentityStore, StageFingerprint};
use crate::ledger::{LedgerEntry, LedgerStore};
use crate::pipeline::{Pipeline, StageGraph, StageSpec};
use crate::runners::{CancelHandle, CancelSignal, StageContext, StageRunner};

/// Pipeline execution options
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Check stages without running or recording anything
    pub dry_run: bool,
    /// Run the selected stages (every stage when none are selected)
    /// regardless of the ledger; their upstream is still checked
    pub force: bool,
    /// Downstream of a failure is skipped rather than aborted
    pub continue_on_failure: bool,
    /// Maximum stages running at once
    pub jobs: usize,
    /// Only these stages and their upstream closure (all when empty)
    pub selection: Vec<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            continue_on_failure: false,
            jobs: 1,
            selection: Vec::new(),
        }
    }
}

/// Progress notification
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// The stages about to be visited, in order
    Planned { stages: Vec<String> },
    /// A stage changed state
    Transition {
        stage: String,
        state: StageState,
        detail: Option<String>,
    },
}

/// Pipeline executor
pub struct PipelineExecutor {
    /// Registered runners by tool name
    runners: HashMap<String, Arc<dyn StageRunner>>,
    identity: IdentityStore,
    snapshot: Arc<ConfigSnapshot>,
    ledger: Arc<LedgerStore>,
    /// Pipeline-wide environment
    env: HashMap<String, String>,
    events: Option<mpsc::UnboundedSender<StageEvent>>,
    cancel: CancelSignal,
}

impl PipelineExecutor {
    /// Create a new pipeline executor
    pub fn new(identity: IdentityStore, snapshot: Arc<ConfigSnapshot>, ledger: Arc<LedgerStore>) -> Self {
        Self {
            runners: HashMap::new(),
            identity,
            snapshot,
            ledger,
            env: HashMap::new(),
            events: None,
            cancel: CancelHandle::new().signal(),
        }
    }

    /// Register a runner for a tool
    pub fn register_runner(&mut self, name: &str, runner: Arc<dyn StageRunner>) {
        self.runners.insert(name.to_string(), runner);
    }

    /// Environment passed to every stage
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Send progress events to `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<StageEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Stop when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute a pipeline
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        graph: &StageGraph,
        options: &ExecutionOptions,
    ) -> StagehandResult<RunReport> {
        let start = Instant::now();

        let order: Vec<String> = if options.selection.is_empty() {
            graph.topological_order().to_vec()
        } else {
            let closure = graph.upstream_closure(&options.selection)?;
            graph
                .topological_order()
                .iter()
                .filter(|name| closure.contains(*name))
                .cloned()
                .collect()
        };

        let mut specs: HashMap<String, StageSpec> = HashMap::new();
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        for name in &order {
            let spec = pipeline
                .get_stage(name)
                .ok_or_else(|| StagehandError::StageNotFound { stage: name.clone() })?;
            if !options.dry_run {
                self.runner_for(spec)?.validate_stage(spec)?;
            }
            specs.insert(name.clone(), spec.with_pipeline_env(&self.env));
            deps.insert(name.clone(), graph.dependencies(name).unwrap_or_default());
        }

        let mut reports: HashMap<String, StageReport> = specs
            .values()
            .map(|spec| {
                let outputs = spec.outs.iter().map(|o| self.identity.resolve(o)).collect();
                (spec.name.clone(), StageReport::new(&spec.name, outputs))
            })
            .collect();

        tracing::info!(
            "Visiting {} stage{}{}",
            order.len(),
            if order.len() == 1 { "" } else { "s" },
            if options.dry_run { " (dry run)" } else { "" }
        );
        self.emit(StageEvent::Planned { stages: order.clone() });

        let worker = Arc::new(self.worker());
        let jobs = options.jobs.max(1);
        let mut pending: Vec<String> = order.clone();
        let mut running: JoinSet<(String, StagehandResult<StageOutcome>)> = JoinSet::new();
        let mut cancelled = self.cancel.is_cancelled();
        let mut fatal: Option<StagehandError> = None;

        loop {
            if !cancelled && fatal.is_none() {
                let mut i = 0;
                while i < pending.len() {
                    let name = pending[i].clone();
                    match gate(&deps[&name], &reports) {
                        Gate::Wait => i += 1,
                        Gate::Cancelled => {
                            if let Some(report) = reports.get_mut(&name) {
                                report.state = StageState::Cancelled;
                            }
                            worker.transition(&name, StageState::Cancelled, None);
                            pending.remove(i);
                        }
                        Gate::Ready { upstream_stale } if running.len() < jobs => {
                            let selected = options.selection.is_empty() || options.selection.contains(&name);
                            let visit = Visit {
                                dry_run: options.dry_run,
                                force: options.force && selected,
                                upstream_stale,
                            };
                            let spec = specs[&name].clone();
                            let worker = Arc::clone(&worker);
                            if let Some(report) = reports.get_mut(&name) {
                                report.state = StageState::Checking;
                            }
                            running.spawn(async move {
                                let outcome = worker.process(spec, visit).await;
                                (name, outcome)
                            });
                            pending.remove(i);
                        }
                        Gate::Ready { .. } => i += 1,
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => {
                    let Some(joined) = joined else { continue };
                    let (name, result) = joined?;
                    let Some(report) = reports.get_mut(&name) else { continue };
                    let failed = matches!(result, Ok(ref outcome) if outcome.state == StageState::Failed);
                    match result {
                        Ok(outcome) => {
                            report.state = outcome.state;
                            report.reason = outcome.reason;
                            report.error = outcome.error;
                            report.warnings = outcome.warnings;
                            report.duration_ms = outcome.duration.as_millis() as u64;
                        }
                        Err(e) => {
                            tracing::error!("Stage '{}': {}", name, e);
                            report.state = StageState::Failed;
                            report.error = Some(e.to_string());
                            fatal.get_or_insert(e);
                        }
                    }

                    if failed {
                        let skip = options.continue_on_failure
                            || specs.get(&name).is_some_and(|s| s.allow_failure);
                        let state = if skip {
                            StageState::SkippedDueToFailure
                        } else {
                            StageState::Aborted
                        };
                        let downstream = graph.downstream_of(&name)?;
                        pending.retain(|stage| {
                            if !downstream.contains(stage) {
                                return true;
                            }
                            if let Some(report) = reports.get_mut(stage) {
                                report.state = state;
                                report.blocked_by = Some(name.clone());
                            }
                            worker.transition(stage, state, Some(name.clone()));
                            false
                        });
                    }
                }
                _ = self.cancel.cancelled(), if !cancelled => {
                    tracing::warn!("Cancellation requested; waiting for running stages to stop");
                    cancelled = true;
                }
            }
        }

        for name in pending {
            if let Some(report) = reports.get_mut(&name) {
                report.state = StageState::Cancelled;
                worker.transition(&name, StageState::Cancelled, None);
            }
        }

        if let Some(fatal) = fatal {
            return Err(fatal);
        }

        let stages: Vec<StageReport> = order
            .iter()
            .filter_map(|name| reports.remove(name))
            .collect();

        let status = if cancelled || stages.iter().any(|s| s.state == StageState::Cancelled) {
            RunStatus::Cancelled
        } else if stages.iter().any(|s| s.state == StageState::Aborted) {
            RunStatus::Aborted
        } else if stages.iter().any(|s| s.state == StageState::Failed) {
            let tolerated = options.continue_on_failure
                || stages
                    .iter()
                    .filter(|s| s.state == StageState::Failed)
                    .all(|s| specs.get(&s.name).is_some_and(|spec| spec.allow_failure));
            if tolerated {
                RunStatus::CompletedWithFailures
            } else {
                RunStatus::Aborted
            }
        } else {
            RunStatus::Completed
        };

        let duration = start.elapsed();
        tracing::info!("Run {} in {:.2}s", status, duration.as_secs_f64());

        Ok(RunReport {
            pipeline: pipeline.name.clone(),
            status,
            dry_run: options.dry_run,
            duration_ms: duration.as_millis() as u64,
            config_version: self.snapshot.version().to_string(),
            stages,
            warnings: Vec::new(),
        })
    }

    /// Check if all required runners are available
    pub async fn check_runners(&self, pipeline: &Pipeline) -> Vec<String> {
        let mut missing = Vec::new();

        let tool_names: std::collections::BTreeSet<_> =
            pipeline.stages.iter().map(|s| s.tool_name()).collect();

        for tool in tool_names {
            match self.runners.get(tool) {
                Some(runner) if matches!(runner.check_available().await, Ok(true)) => {}
                _ => missing.push(tool.to_string()),
            }
        }

        missing
    }

    fn runner_for(&self, stage: &StageSpec) -> StagehandResult<&Arc<dyn StageRunner>> {
        self.runners
            .get(stage.tool_name())
            .ok_or_else(|| StagehandError::RunnerNotFound {
                tool: stage.tool_name().to_string(),
            })
    }

    fn worker(&self) -> Worker {
        Worker {
            runners: self.runners.clone(),
            identity: self.identity.clone(),
            snapshot: Arc::clone(&self.snapshot),
            ledger: Arc::clone(&self.ledger),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn emit(&self, event: StageEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Whether a pending stage may start
///
/// Stages downstream of a failure never reach the gate: they are taken out
/// of the pending list as soon as the failure is joined.
enum Gate {
    Wait,
    Ready { upstream_stale: Option<String> },
    Cancelled,
}

fn gate(deps: &[String], reports: &HashMap<String, StageReport>) -> Gate {
    let mut waiting = false;
    let mut upstream_stale = None;

    for dep in deps {
        let Some(report) = reports.get(dep) else { continue };
        match report.state {
            StageState::Cancelled => return Gate::Cancelled,
            StageState::Stale => {
                upstream_stale.get_or_insert_with(|| dep.clone());
            }
            StageState::Skipped | StageState::Succeeded => {}
            StageState::Pending
            | StageState::Checking
            | StageState::Running
            | StageState::Failed
            | StageState::Aborted
            | StageState::SkippedDueToFailure => waiting = true,
        }
    }

    if waiting {
        Gate::Wait
    } else {
        Gate::Ready { upstream_stale }
    }
}

/// How to visit one stage
struct Visit {
    dry_run: bool,
    force: bool,
    /// First upstream stage found stale during a dry run
    upstream_stale: Option<String>,
}

struct StageOutcome {
    state: StageState,
    reason: Option<StaleReason>,
    error: Option<String>,
    warnings: Vec<String>,
    duration: Duration,
}

/// Shared state of the tasks visiting stages
struct Worker {
    runners: HashMap<String, Arc<dyn StageRunner>>,
    identity: IdentityStore,
    snapshot: Arc<ConfigSnapshot>,
    ledger: Arc<LedgerStore>,
    events: Option<mpsc::UnboundedSender<StageEvent>>,
    cancel: CancelSignal,
}

type OutputFingerprints = Vec<(String, Option<ArtifactFingerprint>)>;

impl Worker {
    /// Check one stage and run it if it is stale
    ///
    /// Stage-level problems become a `Failed` outcome; `Err` means the run
    /// itself cannot continue.
    async fn process(&self, stage: StageSpec, visit: Visit) -> StagehandResult<StageOutcome> {
        let start = Instant::now();
        let finish = |state: StageState, reason: Option<StaleReason>| {
            let detail = reason.as_ref().map(|r| r.to_string());
            self.transition(&stage.name, state, detail);
            StageOutcome {
                state,
                reason,
                error: None,
                warnings: Vec::new(),
                duration: start.elapsed(),
            }
        };

        self.transition(&stage.name, StageState::Checking, None);

        let (current, outputs) = match self.check(&stage).await {
            Ok(checked) => checked,
            Err(StagehandError::MissingInput { .. }) if visit.dry_run && visit.upstream_stale.is_some() => {
                let stage_name = visit.upstream_stale.clone().unwrap_or_default();
                return Ok(finish(StageState::Stale, Some(StaleReason::UpstreamStale { stage: stage_name })));
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => return Ok(self.failed(&stage.name, e, start)),
        };

        let previous = self.ledger.entry(&stage.name).await;
        let reason = if visit.force {
            Some(StaleReason::Forced)
        } else {
            staleness(&current, previous.as_ref(), &outputs)
        };

        if visit.dry_run {
            let reason = reason.or_else(|| {
                visit
                    .upstream_stale
                    .map(|stage| StaleReason::UpstreamStale { stage })
            });
            return Ok(match reason {
                Some(reason) => finish(StageState::Stale, Some(reason)),
                None => finish(StageState::Skipped, None),
            });
        }

        let Some(reason) = reason else {
            tracing::info!("Stage '{}' is up to date", stage.name);
            return Ok(finish(StageState::Skipped, None));
        };

        if self.cancel.is_cancelled() {
            return Ok(finish(StageState::Cancelled, Some(reason)));
        }

        tracing::info!("Running stage '{}' ({})", stage.name, reason);
        self.transition(&stage.name, StageState::Running, Some(reason.to_string()));

        match self.run(&stage, &current).await {
            Ok(warnings) => {
                let mut outcome = finish(StageState::Succeeded, Some(reason));
                outcome.warnings = warnings;
                Ok(outcome)
            }
            Err(StagehandError::Cancelled { .. }) => Ok(finish(StageState::Cancelled, Some(reason))),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                let mut outcome = self.failed(&stage.name, e, start);
                outcome.reason = Some(reason);
                Ok(outcome)
            }
        }
    }

    /// Current fingerprint and observed outputs, computed on the blocking pool
    async fn check(&self, stage: &StageSpec) -> StagehandResult<(StageFingerprint, OutputFingerprints)> {
        let identity = self.identity.clone();
        let snapshot = Arc::clone(&self.snapshot);
        let spec = stage.clone();

        tokio::task::spawn_blocking(move || {
            let current = identity.stage_fingerprint(&spec, &snapshot)?;
            let outputs = identity.output_fingerprints(&spec)?;
            Ok::<_, StagehandError>((current, outputs))
        })
        .await?
    }

    /// Invoke the runner, verify outputs and record the ledger entry
    ///
    /// Returns warnings raised along the way.
    async fn run(&self, stage: &StageSpec, current: &StageFingerprint) -> StagehandResult<Vec<String>> {
        let runner = self
            .runners
            .get(stage.tool_name())
            .ok_or_else(|| StagehandError::RunnerNotFound {
                tool: stage.tool_name().to_string(),
            })?;

        for out in &stage.outs {
            if let Some(parent) = self.identity.resolve(out).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StagehandError::FileWriteError {
                        path: parent.to_path_buf(),
                        error: e.to_string(),
                    })?;
            }
        }

        let params = self
            .snapshot
            .subset(&stage.params)
            .map_err(|key| StagehandError::DanglingDependency {
                stage: stage.name.clone(),
                dependency: key,
                kind: DanglingKind::Param,
            })?;

        let resolve = |paths: &[PathBuf]| -> Vec<PathBuf> {
            paths.iter().map(|p| self.identity.resolve(p)).collect()
        };
        let ctx = StageContext {
            stage: stage.clone(),
            root: self.identity.root().to_path_buf(),
            inputs: resolve(&stage.deps),
            outputs: resolve(&stage.outs),
            params,
            snapshot: Arc::clone(&self.snapshot),
            env: stage.env.clone(),
            cancel: self.cancel.clone(),
        };

        let output = runner.run(&ctx).await?;
        if !output.stdout.is_empty() {
            tracing::debug!("Stage '{}' stdout:\n{}", stage.name, output.stdout.trim_end());
        }
        if !output.success {
            return Err(StagehandError::stage_failed(&stage.name, output.exit_code, &output.stderr));
        }

        let identity = self.identity.clone();
        let spec = stage.clone();
        let (outputs, inputs_after) = tokio::task::spawn_blocking(move || {
            let outputs = identity.output_fingerprints(&spec)?;
            let inputs = spec
                .deps
                .iter()
                .map(|dep| identity.try_fingerprint(dep))
                .collect::<StagehandResult<Vec<_>>>()?;
            Ok::<_, StagehandError>((outputs, inputs))
        })
        .await??;

        let mut produced = Vec::with_capacity(outputs.len());
        for (path, fingerprint) in outputs {
            let fingerprint = fingerprint.ok_or_else(|| StagehandError::StageExecution {
                stage: stage.name.clone(),
                message: format!("declared output not produced: {}", path),
                help: Some("The stage reported success but did not write this path".into()),
            })?;
            produced.push((path, fingerprint));
        }

        let mut warnings = Vec::new();
        for (declared, after) in current.inputs.iter().zip(inputs_after) {
            let unchanged = after.is_some_and(|fp| fp.same_content(&declared.fingerprint));
            if !unchanged {
                let message = format!(
                    "input '{}' changed while the stage ran; it may write outside its declared outputs",
                    declared.path
                );
                tracing::warn!("Stage '{}': {}", stage.name, message);
                warnings.push(message);
            }
        }

        let entry = LedgerEntry::new(current, produced, self.snapshot.version(), output.duration);
        self.ledger.record(&stage.name, entry).await?;

        Ok(warnings)
    }

    fn failed(&self, stage: &str, error: StagehandError, start: Instant) -> StageOutcome {
        tracing::error!("Stage '{}' failed: {}", stage, error);
        let message = describe(&error);
        self.transition(stage, StageState::Failed, Some(error.to_string()));

        StageOutcome {
            state: StageState::Failed,
            reason: None,
            error: Some(message),
            warnings: Vec::new(),
            duration: start.elapsed(),
        }
    }

    fn transition(&self, stage: &str, state: StageState, detail: Option<String>) {
        if let Some(tx) = &self.events {
            let _ = tx.send(StageEvent::Transition {
                stage: stage.to_string(),
                state,
                detail,
            });
        }
    }
}

/// Errors that end the whole run rather than one stage
fn is_fatal(error: &StagehandError) -> bool {
    matches!(
        error,
        StagehandError::LedgerWrite { .. } | StagehandError::TaskJoin { .. }
    )
}

/// Error text with its help lines, for reports
fn describe(error: &StagehandError) -> String {
    match miette::Diagnostic::help(error) {
        Some(help) => format!("{}\n{}", error, help),
        None => error.to_string(),
    }
}
