//! Engine façade.
//!
//! Wires the configuration, layout, registry and capability handles into
//! one object exposing the index, search, status and clear operations.
//! All subcomponents receive their configuration from here; nothing is
//! process-global.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::CodiiConfig;
use crate::error::CodiiErr;
use crate::error::Result;
use crate::indexing::pipeline::clear_repository_state;
use crate::indexing::IndexOutcome;
use crate::indexing::IndexPipeline;
use crate::indexing::IndexRequest;
use crate::layout::Layout;
use crate::registry::CodebaseStatus;
use crate::registry::IndexStatus;
use crate::registry::SnapshotRegistry;
use crate::search::HybridSearcher;
use crate::storage::ChunkStore;
use crate::storage::VectorStore;
use crate::traits::CrossEncoder;
use crate::traits::Embedder;
use crate::types::SearchResult;

/// Search output with its completeness signal.
#[derive(Debug)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Set when the repository was mid-indexing at query time
    pub may_be_incomplete: bool,
}

/// The indexing and retrieval engine for one base directory.
pub struct IndexEngine {
    config: CodiiConfig,
    layout: Layout,
    registry: Arc<SnapshotRegistry>,
    embedder: Arc<dyn Embedder>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    pipeline: IndexPipeline,
}

impl IndexEngine {
    /// Build an engine from explicit configuration and capability handles.
    pub fn new(
        config: CodiiConfig,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
    ) -> Result<Self> {
        for warning in config.validate() {
            tracing::warn!(warning = %warning, "Configuration warning");
        }

        let layout = Layout::new(config.base_dir.clone());
        let registry = Arc::new(SnapshotRegistry::open(layout.snapshot_file())?);
        let pipeline = IndexPipeline::new(
            config.clone(),
            layout.clone(),
            registry.clone(),
            embedder.clone(),
        );

        Ok(Self {
            config,
            layout,
            registry,
            embedder,
            cross_encoder,
            pipeline,
        })
    }

    /// Start indexing a repository. See [`IndexOutcome`] for what the
    /// caller may observe; progress is polled via [`Self::get_status`].
    pub async fn index_codebase(&self, request: IndexRequest) -> Result<IndexOutcome> {
        self.pipeline.start(request).await
    }

    /// Hybrid search over one indexed repository.
    ///
    /// Searching while the repository is `indexing` is allowed but flagged
    /// as possibly incomplete.
    pub async fn search(
        &self,
        repo_path: &Path,
        query: &str,
        limit: Option<usize>,
        path_filter: Option<&str>,
        rerank: Option<bool>,
    ) -> Result<SearchResponse> {
        let path_str = canonical_string(repo_path);
        let status = self.registry.get_status(&path_str);
        if status.status == IndexStatus::NotFound {
            return Err(CodiiErr::NotIndexed {
                path: repo_path.to_path_buf(),
            });
        }

        let may_be_incomplete = status.status == IndexStatus::Indexing;
        if may_be_incomplete {
            tracing::warn!(path = %path_str, "Searching while indexing; results may be incomplete");
        }

        let chunk_store = Arc::new(ChunkStore::open(&self.layout.chunks_db(&path_str))?);
        let vector_store = Arc::new(VectorStore::open(
            &self.layout.indexes_dir(&path_str),
            self.config.vector,
        )?);

        let mut searcher = HybridSearcher::new(
            chunk_store,
            vector_store,
            self.embedder.clone(),
            self.config.search,
            self.config.reranker,
        );
        if let Some(encoder) = &self.cross_encoder {
            searcher = searcher.with_cross_encoder(encoder.clone());
        }

        let limit = limit.unwrap_or(self.config.search.default_limit);
        let results = searcher.search(query, limit, path_filter, rerank).await?;

        Ok(SearchResponse {
            results,
            may_be_incomplete,
        })
    }

    /// Status of one repository (synthetic `not_found` when untracked).
    pub fn get_status(&self, repo_path: &Path) -> CodebaseStatus {
        self.registry.get_status(&canonical_string(repo_path))
    }

    /// All tracked repositories.
    pub fn get_all_codebases(&self) -> BTreeMap<String, CodebaseStatus> {
        self.registry.get_all_codebases()
    }

    /// Whether any repository is tracked.
    pub fn has_any_codebases(&self) -> bool {
        self.registry.has_any_codebases()
    }

    /// Delete a repository's entire index state. Returns whether anything
    /// was removed.
    pub async fn clear_index(&self, repo_path: &Path) -> Result<bool> {
        let path_str = canonical_string(repo_path);
        if self.registry.is_indexing(&path_str) {
            return Err(CodiiErr::AlreadyIndexing {
                path: repo_path.to_path_buf(),
            });
        }
        clear_repository_state(&self.layout, &self.registry, &path_str)
    }

    /// Demote abandoned `indexing` entries older than `max_age` to
    /// `failed("abandoned")`. Explicit recovery, never automatic.
    pub fn recover_stale(&self, max_age: chrono::Duration) -> Result<Vec<String>> {
        self.registry.sweep_stale(max_age)
    }
}

/// Canonical absolute form of a repository path, matching what the
/// pipeline records; falls back to the given path when resolution fails.
fn canonical_string(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}
