//! On-disk layout for per-repository storage.
//!
//! Maps a repository's absolute path to a stable storage directory via a
//! 16-hex-char SHA-256 prefix, so the same repository always lands in the
//! same place regardless of process or ordering.

use sha2::Digest;
use sha2::Sha256;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;

/// Stable 16-hex-char prefix of SHA-256 over the repository path.
pub fn hash16(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))[..16].to_string()
}

/// Resolves storage locations under a base directory.
#[derive(Debug, Clone)]
pub struct Layout {
    base_dir: PathBuf,
}

impl Layout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Per-repository index directory: `B/indexes/<hash16>/`.
    ///
    /// Holds `chunks.db`, `vectors.bin` and `vectors.meta.json`.
    pub fn indexes_dir(&self, repo_path: &str) -> PathBuf {
        self.base_dir.join("indexes").join(hash16(repo_path))
    }

    /// Chunk store database file for a repository.
    pub fn chunks_db(&self, repo_path: &str) -> PathBuf {
        self.indexes_dir(repo_path).join("chunks.db")
    }

    /// Merkle snapshot file for a repository: `B/merkle/<hash16>.json`.
    pub fn merkle_file(&self, repo_path: &str) -> PathBuf {
        self.base_dir
            .join("merkle")
            .join(format!("{}.json", hash16(repo_path)))
    }

    /// Process-shared registry file: `B/snapshots/snapshot.json`.
    pub fn snapshot_file(&self) -> PathBuf {
        self.base_dir.join("snapshots").join("snapshot.json")
    }

    /// Create the directories a repository's index needs.
    pub fn ensure_repo_dirs(&self, repo_path: &str) -> Result<()> {
        std::fs::create_dir_all(self.indexes_dir(repo_path))?;
        std::fs::create_dir_all(self.base_dir.join("merkle"))?;
        std::fs::create_dir_all(self.base_dir.join("snapshots"))?;
        Ok(())
    }
}
