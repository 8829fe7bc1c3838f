//! Storage backends.
//!
//! SQLite holds the chunks with their FTS5 shadow for BM25 search; the
//! vector store holds the HNSW index with its chunk-id mappings. The two
//! are linked only by chunk id.

pub mod chunk_store;
pub mod vector_store;

pub use chunk_store::Bm25Match;
pub use chunk_store::ChunkStore;
pub use vector_store::VectorStore;
