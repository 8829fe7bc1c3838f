//! Merkle snapshot over a repository's indexed files.
//!
//! A snapshot maps each file path to its SHA-256 content hash and derives a
//! single root hash by pairwise reduction over the lexicographically sorted
//! entries. Comparing roots gives O(1) change detection; diffing two
//! snapshots yields the precise added/removed/modified sets.

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Result;

/// Content-hash tree over a repository's indexed files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MerkleSnapshot {
    /// Derived root hash; `None` until [`compute_root`](Self::compute_root) runs.
    pub root_hash: Option<String>,
    /// File path → SHA-256 content hash (hex). Sorted iteration order is
    /// what makes the root insertion-order-independent.
    pub file_hashes: BTreeMap<String, String>,
}

/// Path sets produced by diffing two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MerkleDiff {
    /// Paths present here but not in the other snapshot
    pub added: BTreeSet<String>,
    /// Paths present in the other snapshot but not here
    pub removed: BTreeSet<String>,
    /// Common paths whose hashes differ
    pub modified: BTreeSet<String>,
}

impl MerkleDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

impl MerkleSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (path, hash) pair. Re-adding the same path overwrites.
    pub fn add_file(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.file_hashes.insert(path.into(), hash.into());
    }

    /// Compute the Merkle root.
    ///
    /// Empty snapshot hashes a fixed sentinel. Otherwise the sorted hash
    /// list is reduced by hashing the concatenation of adjacent pairs; an
    /// odd final element is promoted unchanged to the next level.
    pub fn compute_root(&mut self) -> String {
        if self.file_hashes.is_empty() {
            let root = format!("{:x}", Sha256::digest(b"empty"));
            self.root_hash = Some(root.clone());
            return root;
        }

        // BTreeMap iterates in lexicographic path order.
        let mut hashes: Vec<String> = self.file_hashes.values().cloned().collect();

        while hashes.len() > 1 {
            let mut next_level = Vec::with_capacity(hashes.len().div_ceil(2));
            for pair in hashes.chunks(2) {
                if let [left, right] = pair {
                    let combined = format!("{left}{right}");
                    next_level.push(format!("{:x}", Sha256::digest(combined.as_bytes())));
                } else {
                    next_level.push(pair[0].clone());
                }
            }
            hashes = next_level;
        }

        let root = hashes.remove(0);
        self.root_hash = Some(root.clone());
        root
    }

    /// Persist as JSON (`{"root_hash": …, "file_hashes": {…}}`).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|e| {
            crate::error::CodiiErr::RegistryError {
                path: path.to_path_buf(),
                cause: format!("merkle serialization failed: {e}"),
            }
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a snapshot from disk.
    ///
    /// Returns `None` for a missing or malformed file; a prior snapshot that
    /// cannot be read is treated as absent, never as an error.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Malformed merkle snapshot, treating as absent"
                );
                None
            }
        }
    }

    /// Set algebra against a prior snapshot: which paths were added here,
    /// removed here, or kept with a different hash.
    pub fn diff(&self, other: &MerkleSnapshot) -> MerkleDiff {
        let self_paths: BTreeSet<&String> = self.file_hashes.keys().collect();
        let other_paths: BTreeSet<&String> = other.file_hashes.keys().collect();

        let added = self_paths
            .difference(&other_paths)
            .map(|p| (*p).clone())
            .collect();
        let removed = other_paths
            .difference(&self_paths)
            .map(|p| (*p).clone())
            .collect();
        let modified = self_paths
            .intersection(&other_paths)
            .filter(|p| self.file_hashes.get(**p) != other.file_hashes.get(**p))
            .map(|p| (*p).clone())
            .collect();

        MerkleDiff {
            added,
            removed,
            modified,
        }
    }

    pub fn file_count(&self) -> usize {
        self.file_hashes.len()
    }
}
