//! Error types for the indexing and retrieval engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CodiiErr>;

/// Errors surfaced by the indexing and retrieval engine.
///
/// Degradations that are recovered locally (syntax parser failure, vector
/// store load failure, reranker failure) do not appear here as caller-visible
/// variants; they are absorbed at the call boundary and logged.
#[derive(Debug, Error)]
pub enum CodiiErr {
    /// Path does not exist, is not a directory, or is unreadable.
    #[error("invalid path {path}: {cause}")]
    PathError { path: PathBuf, cause: String },

    /// Another worker is already indexing this repository.
    #[error("codebase is currently being indexed: {path}")]
    AlreadyIndexing { path: PathBuf },

    /// The scan produced zero indexable files.
    #[error("no files found to index under {path}")]
    NoFilesFound { path: PathBuf },

    /// The repository has no index yet.
    #[error("codebase is not indexed: {path}")]
    NotIndexed { path: PathBuf },

    /// Chunk store I/O or SQL failure.
    #[error("chunk store error at {path}: {cause}")]
    StoreError { path: PathBuf, cause: String },

    /// Vector store failure that is not recoverable by reinitialising.
    #[error("vector store error: {cause}")]
    VectorStoreError { cause: String },

    /// Embedding call failed; invalidates the current indexing run.
    #[error("embedding failed: {cause}")]
    EmbeddingFailed { cause: String },

    /// Cross-encoder scoring failed. Recovered by the hybrid searcher.
    #[error("reranking failed: {cause}")]
    RerankFailed { cause: String },

    /// A configuration field holds an unusable value.
    #[error("invalid config '{field}': {cause}")]
    ConfigError { field: String, cause: String },

    /// A configuration file could not be parsed.
    #[error("failed to parse config {path}: {cause}")]
    ConfigParseError { path: PathBuf, cause: String },

    /// Registry file could not be read or written.
    #[error("registry error at {path}: {cause}")]
    RegistryError { path: PathBuf, cause: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodiiErr {
    /// Build a store error with path context from a rusqlite error.
    pub fn store_error(path: &std::path::Path, e: impl std::fmt::Display) -> Self {
        CodiiErr::StoreError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        }
    }
}
