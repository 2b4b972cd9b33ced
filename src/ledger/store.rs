// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! JSON file backed ledger
//!
//! The whole ledger lives in one JSON document. Every update writes a
//! complete new document to a temporary file beside the ledger, syncs it and
//! renames it over the old one, so a crash leaves either the previous or the
//! next ledger on disk and never a torn one.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::{Ledger, LedgerEntry, LEDGER_VERSION};
use crate::errors::{StagehandError, StagehandResult};

/// Ledger persisted to a single JSON file
///
/// Updates are serialized through an async mutex: concurrent stages finishing
/// at the same time each see the other's entry in the document they write.
pub struct LedgerStore {
    path: PathBuf,
    state: Mutex<Ledger>,
}

impl LedgerStore {
    /// Open the ledger at `path`, starting empty if it does not exist
    ///
    /// An unreadable ledger is moved aside to `<path>.corrupt` and replaced
    /// by an empty one; the returned warning describes what happened.
    pub fn open(path: impl Into<PathBuf>) -> StagehandResult<(Self, Option<String>)> {
        Self::load(path.into(), true)
    }

    /// Open the ledger without touching the filesystem
    ///
    /// An unreadable ledger is reported and treated as empty but left where
    /// it is. The store must not be written to.
    pub fn inspect(path: impl Into<PathBuf>) -> StagehandResult<(Self, Option<String>)> {
        Self::load(path.into(), false)
    }

    fn load(path: PathBuf, repair: bool) -> StagehandResult<(Self, Option<String>)> {
        let (ledger, warning) = match std::fs::read(&path) {
            Ok(bytes) => match parse(&bytes) {
                Ok(ledger) => {
                    tracing::debug!(
                        "Loaded ledger {} ({} entries)",
                        path.display(),
                        ledger.len()
                    );
                    (ledger, None)
                }
                Err(reason) if repair => {
                    let warning = set_aside(&path, &reason)?;
                    (Ledger::default(), Some(warning))
                }
                Err(reason) => {
                    let error = StagehandError::LedgerCorruption {
                        path: path.clone(),
                        reason,
                    };
                    let warning = format!("{} (left in place until the next run)", error);
                    tracing::warn!("{}", warning);
                    (Ledger::default(), Some(warning))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Ledger::default(), None),
            Err(e) => {
                return Err(StagehandError::FileReadError {
                    path,
                    error: e.to_string(),
                })
            }
        };

        Ok((
            Self {
                path,
                state: Mutex::new(ledger),
            },
            warning,
        ))
    }

    /// Ledger file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded entry for a stage
    pub async fn entry(&self, stage: &str) -> Option<LedgerEntry> {
        self.state.lock().await.stages.get(stage).cloned()
    }

    /// Copy of the whole ledger
    pub async fn snapshot(&self) -> Ledger {
        self.state.lock().await.clone()
    }

    /// Durably record a successful execution
    ///
    /// The in-memory ledger only changes once the new document is on disk.
    pub async fn record(&self, stage: &str, entry: LedgerEntry) -> StagehandResult<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.stages.insert(stage.to_string(), entry);

        self.persist(&next).await?;
        *state = next;

        tracing::debug!("Recorded ledger entry for '{}'", stage);
        Ok(())
    }

    /// Forget one stage; returns whether it had an entry
    pub async fn remove(&self, stage: &str) -> StagehandResult<bool> {
        let mut state = self.state.lock().await;
        if !state.stages.contains_key(stage) {
            return Ok(false);
        }

        let mut next = state.clone();
        next.stages.remove(stage);
        self.persist(&next).await?;
        *state = next;

        Ok(true)
    }

    /// Forget every stage; returns how many entries were dropped
    pub async fn clear(&self) -> StagehandResult<usize> {
        let mut state = self.state.lock().await;
        let dropped = state.len();

        let next = Ledger::default();
        self.persist(&next).await?;
        *state = next;

        Ok(dropped)
    }

    async fn persist(&self, ledger: &Ledger) -> StagehandResult<()> {
        let bytes = serde_json::to_vec_pretty(ledger)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await?
            .map_err(|e| StagehandError::LedgerWrite {
                path: self.path.clone(),
                error: e.to_string(),
            })
    }
}

fn parse(bytes: &[u8]) -> Result<Ledger, String> {
    let ledger: Ledger = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if ledger.version != LEDGER_VERSION {
        return Err(format!(
            "unsupported ledger version {} (expected {})",
            ledger.version, LEDGER_VERSION
        ));
    }
    Ok(ledger)
}

fn set_aside(path: &Path, reason: &str) -> StagehandResult<String> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    let aside = PathBuf::from(aside);

    std::fs::rename(path, &aside).map_err(|e| StagehandError::LedgerWrite {
        path: aside.clone(),
        error: e.to_string(),
    })?;

    let error = StagehandError::LedgerCorruption {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let warning = format!("{} (moved to {})", error, aside.display());
    tracing::warn!("{}", warning);

    Ok(warning)
}

/// Write `bytes` to `path` via a synced temporary file and a rename
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{ArtifactFingerprint, ArtifactKind};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn entry(fingerprint: &str) -> LedgerEntry {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "model.h5".to_string(),
            ArtifactFingerprint {
                digest: "abc".into(),
                kind: ArtifactKind::File,
                size: 10,
                modified: None,
            },
        );

        LedgerEntry {
            fingerprint: fingerprint.into(),
            recipe: "r".into(),
            inputs: BTreeMap::new(),
            params: "p".into(),
            outputs,
            config_version: "v".into(),
            recorded_at: SystemTime::now(),
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_record_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".stagehand/ledger.json");

        let (store, warning) = LedgerStore::open(&path).unwrap();
        assert!(warning.is_none());
        store.record("training", entry("f1")).await.unwrap();

        let (reopened, _) = LedgerStore::open(&path).unwrap();
        let loaded = reopened.entry("training").await.unwrap();
        assert_eq!(loaded.fingerprint, "f1");
        assert_eq!(loaded.outputs["model.h5"].size, 10);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_set_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ \"version\": 1, \"stages\": ").unwrap();

        let (store, warning) = LedgerStore::open(&path).unwrap();
        assert!(warning.unwrap().contains("unreadable"));
        assert!(store.snapshot().await.is_empty());
        assert!(dir.path().join("ledger.json.corrupt").exists());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_inspect_leaves_corrupt_ledger_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "not json").unwrap();

        let (store, warning) = LedgerStore::inspect(&path).unwrap();
        assert!(warning.unwrap().contains("left in place"));
        assert!(store.snapshot().await.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
        assert!(!dir.path().join("ledger.json.corrupt").exists());
    }

    #[tokio::test]
    async fn test_future_version_is_set_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, r#"{ "version": 99, "stages": {} }"#).unwrap();

        let (_, warning) = LedgerStore::open(&path).unwrap();
        assert!(warning.unwrap().contains("unsupported ledger version 99"));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");

        let (store, _) = LedgerStore::open(&path).unwrap();
        store.record("a", entry("f1")).await.unwrap();

        // A directory in place of the ledger makes the final rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = store.record("b", entry("f2")).await.unwrap_err();
        assert!(matches!(err, StagehandError::LedgerWrite { .. }));
        assert!(store.entry("b").await.is_none());
        assert_eq!(store.entry("a").await.unwrap().fingerprint, "f1");

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let (store, _) = LedgerStore::open(dir.path().join("ledger.json")).unwrap();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.record(&format!("stage{}", i), entry("f")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let (reopened, _) = LedgerStore::open(dir.path().join("ledger.json")).unwrap();
        assert_eq!(reopened.snapshot().await.len(), 8);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let (store, _) = LedgerStore::open(dir.path().join("ledger.json")).unwrap();
        store.record("a", entry("1")).await.unwrap();
        store.record("b", entry("2")).await.unwrap();

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.snapshot().await.is_empty());
    }
}
