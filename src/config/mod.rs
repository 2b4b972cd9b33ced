// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Configuration snapshot
//!
//! Loads the config document and the params document once per run and
//! merges them into one immutable [`ConfigSnapshot`]. Stages only ever see
//! the snapshot, never the raw documents.

mod document;
mod snapshot;

pub use document::{read_document, DocumentFormat};
pub use snapshot::ConfigSnapshot;
