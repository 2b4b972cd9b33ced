// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! # stagehand - Reproducible pipeline orchestrator
//!
//! `stagehand` runs a multi-stage ML pipeline (ingestion, base model
//! preparation, training, evaluation, prediction) and re-runs only the
//! stages whose inputs, parameters or command changed.
//!
//! ## Features
//!
//! - **Content fingerprints** - BLAKE3 digests of files, directories and parameter subsets
//! - **Execution ledger** - Durable, atomically replaced record of every successful stage
//! - **Stage graph** - Deterministic topological order with cycle detection
//! - **Failure isolation** - Independent branches finish when one stage fails
//! - **Embeddable** - Register in-process stage implementations through the [`Driver`]
//!
//! ## Quick Start
//!
//! ```bash
//! # Scaffold the standard pipeline
//! stagehand init
//!
//! # See what would run and why
//! stagehand status
//!
//! # Run it
//! stagehand run
//! ```
//!
//! ## Embedding
//!
//! ```no_run
//! use std::path::Path;
//! use stagehand::{Driver, ExecutionOptions};
//!
//! # async fn serve() -> stagehand::StagehandResult<()> {
//! let driver = Driver::load(".", Path::new("stagehand.yaml"))?;
//! let report = driver
//!     .run(&ExecutionOptions {
//!         selection: vec!["prediction".into()],
//!         ..Default::default()
//!     })
//!     .await?;
//! if let Some(outputs) = report.artifacts("prediction") {
//!     println!("prediction written to {:?}", outputs);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod driver;
pub mod errors;
pub mod fingerprint;
pub mod ledger;
pub mod pipeline;
pub mod runners;
pub mod utils;

// Re-export commonly used types
pub use config::ConfigSnapshot;
pub use driver::Driver;
pub use errors::{StagehandError, StagehandResult};
pub use pipeline::{
    ExecutionOptions, Pipeline, RunReport, RunStatus, StageReport, StageSpec, StageState,
    StaleReason, Tool,
};
pub use runners::{CancelHandle, CancelSignal, StageContext};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
