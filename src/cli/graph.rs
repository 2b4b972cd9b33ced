// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Graph command - print the stage graph

use std::path::PathBuf;

use super::GraphFormat;
use crate::errors::{StagehandError, StagehandResult, EXIT_SUCCESS};
use crate::pipeline::{Pipeline, StageGraph};

/// Run the graph command
pub async fn run(pipeline_path: PathBuf, format: GraphFormat, verbose: bool) -> StagehandResult<u8> {
    let root = std::env::current_dir().map_err(|e| StagehandError::Io {
        message: format!("Failed to get current directory: {}", e),
    })?;
    let pipeline = Pipeline::from_file(&root.join(&pipeline_path))?;
    let graph = StageGraph::from_pipeline(&pipeline)?;

    if verbose && format == GraphFormat::Text {
        println!("{} ({} stages)", pipeline.name, graph.stage_names().len());
    }

    let output = match format {
        GraphFormat::Text => graph.to_text(&pipeline),
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };
    print!("{}", output);

    Ok(EXIT_SUCCESS)
}
