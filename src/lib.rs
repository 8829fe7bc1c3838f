//! Incremental hybrid code search for local repositories.
//!
//! Maintains a dual index per repository (a BM25 full-text index in
//! SQLite FTS5 and an HNSW vector index over dense embeddings), kept
//! incrementally up to date through Merkle-root change detection, and
//! serves queries as a Reciprocal Rank Fusion of both signals with
//! optional cross-encoder re-ranking.
//!
//! ## Layout on disk
//!
//! ```text
//! B/snapshots/snapshot.json            registry of per-repository state
//! B/indexes/<hash16>/chunks.db          chunk store (SQLite + FTS5)
//! B/indexes/<hash16>/vectors.bin        vector payload
//! B/indexes/<hash16>/vectors.meta.json  vector id mappings
//! B/merkle/<hash16>.json                merkle snapshot
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use codii::config::CodiiConfig;
//! use codii::engine::IndexEngine;
//! use codii::indexing::IndexRequest;
//! # use codii::traits::Embedder;
//! # async fn run(embedder: Arc<dyn Embedder>) -> codii::error::Result<()> {
//! let engine = IndexEngine::new(CodiiConfig::default(), embedder, None)?;
//! engine.index_codebase(IndexRequest::new("/path/to/repo")).await?;
//! let response = engine
//!     .search(std::path::Path::new("/path/to/repo"), "page table walk", None, None, None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod layout;
pub mod merkle;
pub mod registry;
pub mod traits;
pub mod types;

// Subsystems
pub mod chunking;
pub mod embeddings;
pub mod indexing;
pub mod query;
pub mod reranker;
pub mod search;
pub mod storage;

// Re-exports
pub use config::CodiiConfig;
pub use engine::IndexEngine;
pub use engine::SearchResponse;
pub use error::CodiiErr;
pub use error::Result;
pub use merkle::MerkleDiff;
pub use merkle::MerkleSnapshot;
pub use registry::CodebaseStatus;
pub use registry::IndexStage;
pub use registry::IndexStatus;
pub use registry::SnapshotRegistry;
pub use traits::CrossEncoder;
pub use traits::Embedder;
pub use types::CodeChunk;
pub use types::SearchResult;
pub use types::StoredChunk;

// Indexing exports
pub use indexing::IndexOutcome;
pub use indexing::IndexRequest;
pub use search::HybridSearcher;
