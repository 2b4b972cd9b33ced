// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Immutable merged configuration view

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::document::read_document;
use crate::errors::{StagehandError, StagehandResult};
use crate::fingerprint::{hash_string, to_canonical_json};

/// Merged, read-only view of the config and params documents
///
/// Values are addressed by dotted keys (`data_ingestion.source_url`). The
/// snapshot has no mutating methods; share it as `Arc<ConfigSnapshot>`.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    root: Value,
    version: String,
    sources: Vec<PathBuf>,
}

impl ConfigSnapshot {
    /// Load and merge the config and params documents
    pub fn load(config_path: &Path, params_path: &Path) -> StagehandResult<Self> {
        let config = read_document(config_path)?;
        let params = read_document(params_path)?;

        let mut snapshot = Self::from_values(config, params)?;
        snapshot.sources = vec![config_path.to_path_buf(), params_path.to_path_buf()];

        tracing::info!(
            "Configuration snapshot {} loaded ({} keys)",
            snapshot.short_version(),
            snapshot.keys().len()
        );

        Ok(snapshot)
    }

    /// Merge two already-parsed documents; params values win on equal types
    pub fn from_values(config: Value, params: Value) -> StagehandResult<Self> {
        let mut root = Value::Object(Map::new());
        merge_into(&mut root, config, "")?;
        merge_into(&mut root, params, "")?;

        let version = hash_string(&to_canonical_json(&root));

        Ok(Self {
            root,
            version,
            sources: Vec::new(),
        })
    }

    /// Digest identifying this exact configuration
    pub fn version(&self) -> &str {
        &self.version
    }

    /// First twelve characters of the version digest
    pub fn short_version(&self) -> &str {
        &self.version[..12.min(self.version.len())]
    }

    /// Documents the snapshot was loaded from
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Look up a dotted key
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.is_empty() {
            return None;
        }
        key.split('.')
            .try_fold(&self.root, |node, part| node.as_object()?.get(part))
    }

    /// Whether a dotted key is present
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.as_i64()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_f64()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }

    /// All leaf keys, dotted and sorted
    pub fn keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        collect_leaf_keys(&self.root, "", &mut keys);
        keys
    }

    /// Select a subset of keys as a flat `{dotted key: value}` object
    ///
    /// Fails with the first key that is not present.
    pub fn subset(&self, keys: &[String]) -> Result<Value, String> {
        let mut out = Map::new();
        for key in keys {
            let value = self.get(key).ok_or_else(|| key.clone())?;
            out.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(out))
    }

    /// The whole merged tree
    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn merge_into(target: &mut Value, incoming: Value, prefix: &str) -> StagehandResult<()> {
    let (Value::Object(target_map), Value::Object(incoming_map)) = (target, incoming) else {
        return Ok(());
    };

    for (key, value) in incoming_map {
        let dotted = join_key(prefix, &key);

        match target_map.get_mut(&key) {
            None => {
                target_map.insert(key, value);
            }
            Some(existing) => {
                let (old_type, new_type) = (type_name(existing), type_name(&value));
                if old_type != new_type {
                    return Err(StagehandError::ConfigConflict {
                        key: dotted,
                        first: old_type.to_string(),
                        second: new_type.to_string(),
                    });
                }

                if value.is_object() {
                    merge_into(existing, value, &dotted)?;
                } else if *existing != value {
                    tracing::warn!(
                        "Key '{}' is defined in both documents; using the params value",
                        dotted
                    );
                    *existing = value;
                }
            }
        }
    }

    Ok(())
}

fn collect_leaf_keys(node: &Value, prefix: &str, out: &mut BTreeSet<String>) {
    match node {
        Value::Object(map) if !map.is_empty() => {
            for (key, value) in map {
                collect_leaf_keys(value, &join_key(prefix, key), out);
            }
        }
        _ if !prefix.is_empty() => {
            out.insert(prefix.to_string());
        }
        _ => {}
    }
}
