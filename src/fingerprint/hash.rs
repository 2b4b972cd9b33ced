// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Content hashing
//!
//! Uses BLAKE3 for fast, secure content hashing. File contents are streamed
//! through the hasher so large model weights never need to fit in memory.

use blake3::Hasher;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Incremental hasher for composite digests
///
/// Every field written through [`ContentHasher::field`] is terminated, so
/// `("ab", "c")` and `("a", "bc")` never collide.
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    /// Create a hasher seeded with a domain tag
    pub fn new(domain: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(b"\0");
        Self { hasher }
    }

    /// Hash one terminated field
    pub fn field(&mut self, data: &str) -> &mut Self {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data.as_bytes());
        self
    }

    /// Hash arbitrary bytes
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(data);
        self
    }

    /// Finalize and get the hex digest
    pub fn finalize(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

/// Compute a quick hash of a string
pub fn hash_string(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}

/// Compute the hash of a file's bytes
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Aggregate digest of a directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryDigest {
    pub digest: String,
    pub size: u64,
    pub files: usize,
    /// Newest member modification time, in nanoseconds since the epoch
    pub modified: Option<u64>,
}

/// Hash every regular file under `root`
///
/// Members are ordered by their `/`-separated relative path before being
/// combined. Symbolic links to directories are not followed.
pub fn hash_directory(root: &Path) -> io::Result<DirectoryDigest> {
    let mut members = Vec::new();
    collect_files(root, root, &mut members)?;
    members.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = ContentHasher::new("stagehand/dir/v1");
    let mut size = 0;
    let mut modified: Option<u64> = None;

    for (relative, path) in &members {
        let digest = hash_file(path)?;
        hasher.field(relative).field(&digest);

        let meta = fs::metadata(path)?;
        size += meta.len();
        if let Some(m) = modified_nanos(&meta) {
            modified = Some(modified.map_or(m, |prev| prev.max(m)));
        }
    }

    Ok(DirectoryDigest {
        digest: hasher.finalize(),
        size,
        files: members.len(),
        modified,
    })
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((relative, path));
        }
    }

    Ok(())
}

/// Modification time in nanoseconds since the epoch, when the platform has one
pub fn modified_nanos(meta: &fs::Metadata) -> Option<u64> {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
}
