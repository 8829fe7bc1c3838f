//! Staged indexing pipeline.
//!
//! Pre-flight runs synchronously and answers the caller immediately; the
//! actual work happens on a spawned worker task, one per repository. The
//! worker owns all writes for its repository; the registry is the only
//! shared state and carries the staged progress other threads observe.
//!
//! Stages and reported progress:
//!
//! | stage     | %        | action                                        |
//! |-----------|----------|-----------------------------------------------|
//! | preparing | 0 → 10   | scan, build Merkle snapshot, load prior one   |
//! | deleting  | 10 → 20  | drop stale chunks and vectors                 |
//! | chunking  | 20 → 40  | chunk added/modified files                    |
//! | embedding | 40 → 80  | embed chunk contents in batches               |
//! | indexing  | 80 → 100 | insert chunks, bind vectors, persist, finish  |

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::chunking;
use crate::chunking::SplitterKind;
use crate::config::CodiiConfig;
use crate::error::CodiiErr;
use crate::error::Result;
use crate::indexing::walker;
use crate::layout::Layout;
use crate::merkle::MerkleSnapshot;
use crate::registry::IndexStage;
use crate::registry::IndexStatus;
use crate::registry::SnapshotRegistry;
use crate::storage::ChunkStore;
use crate::storage::VectorStore;
use crate::traits::Embedder;
use crate::types::detect_language;

/// Parameters for one indexing call.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// Repository path; resolved to absolute during pre-flight
    pub path: PathBuf,
    /// Chunking strategy
    pub splitter: SplitterKind,
    /// Extra file extensions for this call (dot optional)
    pub custom_extensions: Vec<String>,
    /// Extra ignore patterns for this call
    pub ignore_patterns: Vec<String>,
    /// Clear the existing index and rebuild from scratch
    pub force: bool,
}

impl IndexRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            splitter: SplitterKind::default(),
            custom_extensions: Vec::new(),
            ignore_patterns: Vec::new(),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_splitter(mut self, splitter: SplitterKind) -> Self {
        self.splitter = splitter;
        self
    }
}

/// What pre-flight decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// A worker was spawned; progress is observable through the registry
    Started,
    /// Merkle root unchanged; nothing to do
    NoChanges,
    /// Indexed, but no prior snapshot exists to diff against; a forced
    /// rebuild is required to proceed
    AlreadyIndexed,
}

/// Orchestrates scan → diff → delete → chunk → embed → insert → persist.
pub struct IndexPipeline {
    config: CodiiConfig,
    layout: Layout,
    registry: Arc<SnapshotRegistry>,
    embedder: Arc<dyn Embedder>,
}

impl IndexPipeline {
    pub fn new(
        config: CodiiConfig,
        layout: Layout,
        registry: Arc<SnapshotRegistry>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            layout,
            registry,
            embedder,
        }
    }

    /// Pre-flight checks, then spawn the background worker.
    ///
    /// Returns immediately after the spawn; callers poll the registry for
    /// progress.
    pub async fn start(&self, request: IndexRequest) -> Result<IndexOutcome> {
        let repo_path = request
            .path
            .canonicalize()
            .map_err(|e| CodiiErr::PathError {
                path: request.path.clone(),
                cause: e.to_string(),
            })?;
        if !repo_path.is_dir() {
            return Err(CodiiErr::PathError {
                path: repo_path,
                cause: "not a directory".to_string(),
            });
        }
        let path_str = repo_path.to_string_lossy().to_string();

        if self.registry.is_indexing(&path_str) {
            return Err(CodiiErr::AlreadyIndexing { path: repo_path });
        }

        let status = self.registry.get_status(&path_str);

        if status.status == IndexStatus::Indexed && !request.force {
            match MerkleSnapshot::load(&self.layout.merkle_file(&path_str)) {
                Some(old_merkle) => {
                    let files = self.scan(&repo_path, &request)?;
                    let mut new_merkle = build_snapshot(&files);
                    let new_root = new_merkle.compute_root();
                    if old_merkle.root_hash.as_deref() == Some(new_root.as_str()) {
                        tracing::info!(path = %path_str, "No changes detected");
                        return Ok(IndexOutcome::NoChanges);
                    }
                    // Root differs: fall through to incremental indexing.
                }
                None => return Ok(IndexOutcome::AlreadyIndexed),
            }
        }

        if request.force && status.status == IndexStatus::Indexed {
            clear_repository_state(&self.layout, &self.registry, &path_str)?;
        }

        let worker = Worker {
            config: self.config.clone(),
            layout: self.layout.clone(),
            registry: self.registry.clone(),
            embedder: self.embedder.clone(),
            path_str: path_str.clone(),
            repo_path,
            request,
        };

        tokio::spawn(async move {
            let path = worker.path_str.clone();
            let registry = worker.registry.clone();
            if let Err(e) = worker.run().await {
                tracing::error!(path = %path, error = %e, "Indexing failed");
                let _ = registry.mark_failed(&path, &e.to_string(), 0);
            }
        });

        Ok(IndexOutcome::Started)
    }

    fn scan(&self, repo_path: &Path, request: &IndexRequest) -> Result<Vec<walker::ScannedFile>> {
        walker::scan_repository(
            repo_path,
            &self.config.indexing.extensions,
            &self.config.indexing.ignore_patterns,
            &request.custom_extensions,
            &request.ignore_patterns,
        )
    }
}

/// Delete a repository's persisted index state: chunk store, vector store,
/// Merkle snapshot, and the registry entry.
pub(crate) fn clear_repository_state(
    layout: &Layout,
    registry: &SnapshotRegistry,
    path_str: &str,
) -> Result<bool> {
    let mut removed_any = false;

    let index_dir = layout.indexes_dir(path_str);
    for file in ["chunks.db", "vectors.bin", "vectors.meta.json"] {
        let file_path = index_dir.join(file);
        if file_path.exists() {
            std::fs::remove_file(&file_path)?;
            removed_any = true;
        }
    }

    let merkle_file = layout.merkle_file(path_str);
    if merkle_file.exists() {
        std::fs::remove_file(&merkle_file)?;
        removed_any = true;
    }

    if registry.remove_codebase(path_str)? {
        removed_any = true;
    }

    tracing::info!(path = %path_str, "Cleared index state");
    Ok(removed_any)
}

fn build_snapshot(files: &[walker::ScannedFile]) -> MerkleSnapshot {
    let mut snapshot = MerkleSnapshot::new();
    for (path, hash) in files {
        snapshot.add_file(path.to_string_lossy().to_string(), hash.clone());
    }
    snapshot
}

/// Background worker owning one indexing run.
struct Worker {
    config: CodiiConfig,
    layout: Layout,
    registry: Arc<SnapshotRegistry>,
    embedder: Arc<dyn Embedder>,
    path_str: String,
    repo_path: PathBuf,
    request: IndexRequest,
}

impl Worker {
    async fn run(&self) -> Result<()> {
        self.registry.mark_indexing(&self.path_str)?;
        self.layout.ensure_repo_dirs(&self.path_str)?;

        let chunk_store = ChunkStore::open(&self.layout.chunks_db(&self.path_str))?;
        let vector_store = VectorStore::open(
            &self.layout.indexes_dir(&self.path_str),
            self.config.vector,
        )?;

        // Stage 1: preparing (0-10%)
        self.progress(5, IndexStage::Preparing, 0, 0, None, None)?;

        let files = walker::scan_repository(
            &self.repo_path,
            &self.config.indexing.extensions,
            &self.config.indexing.ignore_patterns,
            &self.request.custom_extensions,
            &self.request.ignore_patterns,
        )?;
        let total_files = files.len();
        self.progress(10, IndexStage::Preparing, 0, 0, Some(total_files), Some(0))?;

        if files.is_empty() {
            self.registry
                .mark_failed(&self.path_str, "No files found to index", 10)?;
            return Ok(());
        }

        let old_merkle = MerkleSnapshot::load(&self.layout.merkle_file(&self.path_str));
        let mut new_merkle = build_snapshot(&files);
        let new_root = new_merkle.compute_root();

        let hash_by_path: BTreeMap<String, String> = files
            .iter()
            .map(|(path, hash)| (path.to_string_lossy().to_string(), hash.clone()))
            .collect();

        // Diff against the prior snapshot; a forced run or a fresh
        // repository treats every file as added.
        let (added, removed, modified) = match (&old_merkle, self.request.force) {
            (Some(old), false) => {
                let diff = new_merkle.diff(old);
                (diff.added, diff.removed, diff.modified)
            }
            _ => (
                hash_by_path.keys().cloned().collect::<BTreeSet<_>>(),
                BTreeSet::new(),
                BTreeSet::new(),
            ),
        };

        let files_to_delete: BTreeSet<String> = removed.union(&modified).cloned().collect();
        let files_to_add: BTreeSet<String> = added.union(&modified).cloned().collect();
        let files_to_process = files_to_add.len();

        tracing::info!(
            path = %self.path_str,
            added = added.len(),
            removed = removed.len(),
            modified = modified.len(),
            "Change detection complete"
        );

        if files_to_delete.is_empty() && files_to_add.is_empty() {
            let total_chunks = chunk_store.chunk_count().await?;
            self.registry
                .mark_indexed(&self.path_str, &new_root, total_files, total_chunks)?;
            return Ok(());
        }

        // Stage 2: deleting (10-20%)
        if !files_to_delete.is_empty() {
            self.progress(
                15,
                IndexStage::Deleting,
                0,
                0,
                Some(total_files),
                Some(files_to_process),
            )?;

            for file_path in &files_to_delete {
                let chunk_ids = chunk_store.get_chunk_ids_by_path(file_path).await?;
                if !chunk_ids.is_empty() {
                    vector_store.remove_by_chunk_ids(&chunk_ids);
                }
                chunk_store.delete_chunks_by_path(file_path).await?;
                chunk_store.delete_file_hash(file_path).await?;
            }

            self.progress(
                20,
                IndexStage::Deleting,
                0,
                0,
                Some(total_files),
                Some(files_to_process),
            )?;
        }

        // Stage 3: chunking (20-40%)
        self.progress(
            20,
            IndexStage::Chunking,
            0,
            0,
            Some(total_files),
            Some(files_to_process),
        )?;

        let mut all_chunks = Vec::new();
        for (i, file_path) in files_to_add.iter().enumerate() {
            let Some(content) = walker::read_file_content(Path::new(file_path)) else {
                continue;
            };
            let language = detect_language(Path::new(file_path));
            let chunks = chunking::chunk_source(
                &content,
                file_path,
                &language,
                self.config.chunking,
                self.request.splitter,
            );
            all_chunks.extend(chunks);

            let pct = 20 + ((i + 1) * 20 / files_to_process.max(1)) as u8;
            self.progress(
                pct,
                IndexStage::Chunking,
                i + 1,
                all_chunks.len(),
                Some(total_files),
                Some(files_to_process),
            )?;
        }

        // Stage 4: embedding (40-80%)
        self.progress(
            40,
            IndexStage::Embedding,
            files_to_process,
            all_chunks.len(),
            Some(total_files),
            Some(files_to_process),
        )?;

        let mut all_vectors: Vec<Vec<f32>> = Vec::with_capacity(all_chunks.len());
        if !all_chunks.is_empty() {
            let texts: Vec<String> = all_chunks.iter().map(|c| c.content.clone()).collect();
            let batch_size = self.config.indexing.embedding_batch_size.max(1);
            let total_batches = texts.len().div_ceil(batch_size);

            for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
                let vectors = self.embedder.embed_batch(batch).await?;
                all_vectors.extend(vectors);

                let pct = 40 + (batch_idx * 40 / total_batches.max(1)) as u8;
                self.progress(
                    pct,
                    IndexStage::Embedding,
                    files_to_process,
                    all_chunks.len(),
                    Some(total_files),
                    Some(files_to_process),
                )?;
            }
        }

        // Stage 5: indexing (80-100%)
        self.progress(
            80,
            IndexStage::Indexing,
            files_to_process,
            all_chunks.len(),
            Some(total_files),
            Some(files_to_process),
        )?;

        if !all_chunks.is_empty() {
            let chunk_count = all_chunks.len();
            let new_ids = chunk_store.insert_chunks_batch(all_chunks).await?;

            self.progress(
                90,
                IndexStage::Indexing,
                files_to_process,
                chunk_count,
                Some(total_files),
                Some(files_to_process),
            )?;

            if new_ids.len() == all_vectors.len() {
                vector_store.add_vectors(&new_ids, all_vectors)?;
            } else {
                return Err(CodiiErr::VectorStoreError {
                    cause: format!(
                        "chunk/vector count diverged: {} ids, {} vectors",
                        new_ids.len(),
                        all_vectors.len()
                    ),
                });
            }
        }

        // Persist even on deletion-only runs so tombstones survive a
        // restart; the maps must stay consistent with the chunk store.
        vector_store.save()?;

        // Keep the file-hash mirror aligned with the new snapshot.
        for file_path in &files_to_add {
            if let Some(hash) = hash_by_path.get(file_path) {
                chunk_store.upsert_file_hash(file_path, hash).await?;
            }
        }

        // Merkle persistence is the last write of a successful run.
        new_merkle.save(&self.layout.merkle_file(&self.path_str))?;

        let total_chunks = chunk_store.chunk_count().await?;
        self.registry
            .mark_indexed(&self.path_str, &new_root, total_files, total_chunks)?;

        tracing::info!(
            path = %self.path_str,
            files = total_files,
            chunks = total_chunks,
            "Indexing complete"
        );
        Ok(())
    }

    fn progress(
        &self,
        pct: u8,
        stage: IndexStage,
        indexed_files: usize,
        total_chunks: usize,
        total_files: Option<usize>,
        files_to_process: Option<usize>,
    ) -> Result<()> {
        self.registry.update_progress(
            &self.path_str,
            pct,
            stage,
            indexed_files,
            total_chunks,
            total_files,
            files_to_process,
        )
    }
}
