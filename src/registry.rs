//! Process-shared registry of per-repository indexing state.
//!
//! One JSON file under the base directory holds a `CodebaseStatus` per
//! tracked repository. Every operation takes the in-process mutex and
//! performs a read-whole-file → mutate → write-whole-file cycle; the
//! registry is small-N by construction (one entry per indexed repository).

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::CodiiErr;
use crate::error::Result;

/// Lifecycle state of a repository's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Indexed,
    Indexing,
    Failed,
    NotFound,
}

/// Pipeline stage currently reported for a repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStage {
    #[default]
    Preparing,
    Deleting,
    Chunking,
    Embedding,
    Indexing,
    Complete,
}

/// Status record for a single repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodebaseStatus {
    pub path: String,
    pub status: IndexStatus,
    /// Progress percentage in [0, 100]
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub current_stage: IndexStage,
    #[serde(default)]
    pub merkle_root: Option<String>,
    #[serde(default)]
    pub indexed_files: usize,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub files_to_process: usize,
    #[serde(default)]
    pub total_files: usize,
    /// ISO-8601 timestamp of the last mutation
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl CodebaseStatus {
    fn new(path: &str, status: IndexStatus) -> Self {
        Self {
            path: path.to_string(),
            status,
            progress: 0,
            current_stage: IndexStage::default(),
            merkle_root: None,
            indexed_files: 0,
            total_chunks: 0,
            files_to_process: 0,
            total_files: 0,
            last_updated: None,
            error_message: None,
        }
    }

    /// Synthetic record returned for untracked paths.
    pub fn not_found(path: &str) -> Self {
        Self::new(path, IndexStatus::NotFound)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    codebases: BTreeMap<String, CodebaseStatus>,
}

/// File-backed registry, safe for concurrent use within a process.
pub struct SnapshotRegistry {
    file: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotRegistry {
    /// Open (and create if needed) the registry file.
    pub fn open(file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let registry = Self {
            file,
            lock: Mutex::new(()),
        };
        if !registry.file.exists() {
            registry.write_file(&RegistryFile::default())?;
        }
        Ok(registry)
    }

    fn read_file(&self) -> RegistryFile {
        // Unreadable or corrupt content degrades to an empty registry; the
        // next write restores a valid file.
        match std::fs::read_to_string(&self.file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %self.file.display(),
                    error = %e,
                    "Malformed registry file, starting empty"
                );
                RegistryFile::default()
            }),
            Err(_) => RegistryFile::default(),
        }
    }

    fn write_file(&self, data: &RegistryFile) -> Result<()> {
        let json = serde_json::to_vec_pretty(data).map_err(|e| CodiiErr::RegistryError {
            path: self.file.clone(),
            cause: e.to_string(),
        })?;
        std::fs::write(&self.file, json)?;
        Ok(())
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut RegistryFile) -> T) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(path = %self.file.display(), "Registry mutex poisoned, recovering");
            poisoned.into_inner()
        });
        let mut data = self.read_file();
        let out = f(&mut data);
        self.write_file(&data)?;
        Ok(out)
    }

    /// Get the status for a repository; untracked paths get a synthetic
    /// `not_found` record.
    pub fn get_status(&self, path: &str) -> CodebaseStatus {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read_file()
            .codebases
            .get(path)
            .cloned()
            .unwrap_or_else(|| CodebaseStatus::not_found(path))
    }

    /// Overwrite the status record for a repository, stamping `last_updated`.
    pub fn set_status(&self, mut status: CodebaseStatus) -> Result<()> {
        self.with_file(|data| {
            status.last_updated = Some(Utc::now().to_rfc3339());
            data.codebases.insert(status.path.clone(), status);
        })
    }

    /// Update indexing progress for a repository.
    ///
    /// The pipeline is the sole writer for a path during a run, so progress
    /// is monotonic per run by construction.
    #[allow(clippy::too_many_arguments)]
    pub fn update_progress(
        &self,
        path: &str,
        progress: u8,
        stage: IndexStage,
        indexed_files: usize,
        total_chunks: usize,
        total_files: Option<usize>,
        files_to_process: Option<usize>,
    ) -> Result<()> {
        self.with_file(|data| {
            let entry = data
                .codebases
                .entry(path.to_string())
                .or_insert_with(|| CodebaseStatus::new(path, IndexStatus::Indexing));
            entry.progress = progress.min(100);
            entry.current_stage = stage;
            entry.indexed_files = indexed_files;
            entry.total_chunks = total_chunks;
            if let Some(total) = total_files {
                entry.total_files = total;
            }
            if let Some(pending) = files_to_process {
                entry.files_to_process = pending;
            }
            entry.last_updated = Some(Utc::now().to_rfc3339());
        })
    }

    /// Mark a repository as currently indexing.
    pub fn mark_indexing(&self, path: &str) -> Result<()> {
        self.set_status(CodebaseStatus {
            status: IndexStatus::Indexing,
            current_stage: IndexStage::Preparing,
            ..CodebaseStatus::new(path, IndexStatus::Indexing)
        })
    }

    /// Mark a repository as fully indexed with its final stats.
    pub fn mark_indexed(
        &self,
        path: &str,
        merkle_root: &str,
        indexed_files: usize,
        total_chunks: usize,
    ) -> Result<()> {
        self.set_status(CodebaseStatus {
            status: IndexStatus::Indexed,
            progress: 100,
            current_stage: IndexStage::Complete,
            merkle_root: Some(merkle_root.to_string()),
            indexed_files,
            total_chunks,
            ..CodebaseStatus::new(path, IndexStatus::Indexed)
        })
    }

    /// Mark a repository as failed with the worker's error message.
    pub fn mark_failed(&self, path: &str, error_message: &str, progress: u8) -> Result<()> {
        self.set_status(CodebaseStatus {
            status: IndexStatus::Failed,
            progress,
            error_message: Some(error_message.to_string()),
            ..CodebaseStatus::new(path, IndexStatus::Failed)
        })
    }

    /// Remove a repository from tracking. Returns whether it was present.
    pub fn remove_codebase(&self, path: &str) -> Result<bool> {
        self.with_file(|data| data.codebases.remove(path).is_some())
    }

    /// Whether a repository is currently being indexed.
    pub fn is_indexing(&self, path: &str) -> bool {
        self.get_status(path).status == IndexStatus::Indexing
    }

    /// Whether any repository is tracked at all.
    pub fn has_any_codebases(&self) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        !self.read_file().codebases.is_empty()
    }

    /// All tracked repositories, keyed by path.
    pub fn get_all_codebases(&self) -> BTreeMap<String, CodebaseStatus> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read_file().codebases
    }

    /// Demote `indexing` entries whose `last_updated` is older than
    /// `max_age` to `failed("abandoned")`. Returns the demoted paths.
    ///
    /// Invoked explicitly by the engine, never automatically; see the
    /// stale-indexing recovery notes in DESIGN.md.
    pub fn sweep_stale(&self, max_age: chrono::Duration) -> Result<Vec<String>> {
        self.with_file(|data| {
            let now = Utc::now();
            let mut demoted = Vec::new();
            for (path, entry) in data.codebases.iter_mut() {
                if entry.status != IndexStatus::Indexing {
                    continue;
                }
                let stale = entry
                    .last_updated
                    .as_deref()
                    .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
                    .map(|ts| now.signed_duration_since(ts) > max_age)
                    .unwrap_or(true);
                if stale {
                    entry.status = IndexStatus::Failed;
                    entry.error_message = Some("abandoned".to_string());
                    entry.last_updated = Some(now.to_rfc3339());
                    demoted.push(path.clone());
                }
            }
            demoted
        })
    }

    /// Stable 16-hex-char prefix of SHA-256 over the repository path.
    pub fn path_to_hash(path: &str) -> String {
        crate::layout::hash16(path)
    }
}
