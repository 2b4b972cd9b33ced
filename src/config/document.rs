// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Structured document parsing
//!
//! Config and params documents may be YAML, JSON or TOML; the format is
//! picked from the file extension.

use serde_json::Value;
use std::path::Path;

use crate::errors::{StagehandError, StagehandResult};

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    /// Detect the format from a path's extension (YAML when unknown)
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }

    /// Parse document text into a JSON value
    pub fn parse(&self, content: &str) -> Result<Value, String> {
        match self {
            Self::Yaml => serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str::<Value>(content).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str::<Value>(content).map_err(|e| e.to_string()),
        }
    }
}

/// Read and parse one configuration document
///
/// The document must exist, be well formed, and hold a non-empty mapping at
/// the top level.
pub fn read_document(path: &Path) -> StagehandResult<Value> {
    let config_error = |reason: String, help: Option<&str>| StagehandError::Config {
        path: path.to_path_buf(),
        reason,
        help: help.map(String::from),
    };

    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => config_error(
            "document not found".into(),
            Some("Check the 'config' and 'params' paths in stagehand.yaml"),
        ),
        _ => config_error(format!("unreadable: {}", e), None),
    })?;

    let value = DocumentFormat::from_path(path)
        .parse(&content)
        .map_err(|e| config_error(format!("malformed: {}", e), None))?;

    match value {
        Value::Null => Err(config_error("document is empty".into(), None)),
        Value::Object(ref map) if map.is_empty() => {
            Err(config_error("document is empty".into(), None))
        }
        Value::Object(_) => {
            tracing::debug!("Loaded configuration document {}", path.display());
            Ok(value)
        }
        _ => Err(config_error(
            "top level must be a mapping of keys to values".into(),
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_detect_format() {
        assert_eq!(DocumentFormat::from_path(Path::new("params.yaml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("params.YML")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(Path::new("config.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("config.toml")), DocumentFormat::Toml);
    }

    #[test]
    fn test_read_toml_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.toml");
        fs::write(&path, "EPOCHS = 3\n[augmentation]\nflip = true\n").unwrap();

        let value = read_document(&path).unwrap();
        assert_eq!(value["EPOCHS"], 3);
        assert_eq!(value["augmentation"]["flip"], true);
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.yaml");
        fs::write(&path, "").unwrap();

        let err = read_document(&path).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_scalar_document_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.yaml");
        fs::write(&path, "just a string").unwrap();

        assert!(matches!(
            read_document(&path),
            Err(StagehandError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_document() {
        let dir = TempDir::new().unwrap();
        let err = read_document(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_malformed_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ \"a\": ").unwrap();

        let err = read_document(&path).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
