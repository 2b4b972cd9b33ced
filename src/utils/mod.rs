// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Utility modules
//!
//! Common utilities for the stagehand CLI.

pub mod colors;
pub mod spinner;

pub use colors::*;
pub use spinner::*;
