// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Pipeline definitions, the stage graph and the executor
//!
//! This module defines the stage table read from stagehand.yaml, the
//! dependency graph built from it, and the executor that walks that graph.

mod dag;
mod definition;
mod executor;
mod report;
mod state;
mod validation;

pub use dag::StageGraph;
pub use definition::*;
pub use executor::{ExecutionOptions, PipelineExecutor, StageEvent};
pub use report::{RunReport, StageReport};
pub use state::{staleness, RunStatus, StageState, StaleReason};
pub use validation::{PipelineValidator, ValidationResult};
