//! Core data types for the indexing and retrieval engine.

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;

/// A contiguous span of source text treated as an indexing unit.
///
/// Produced by the chunkers during indexing and immutable thereafter; a
/// chunk is destroyed only when its owning file leaves the index or the
/// whole index is cleared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeChunk {
    /// Chunk content (UTF-8 text)
    pub content: String,
    /// Absolute path of the owning repository file
    pub path: String,
    /// Start line number (1-indexed, inclusive)
    pub start_line: i64,
    /// End line number (1-indexed, inclusive)
    pub end_line: i64,
    /// Detected language tag (e.g. "python", "rust", "text")
    pub language: String,
    /// Semantic kind: "function", "class", "struct", "text_block", "module", …
    pub chunk_type: String,
    /// Symbol name for semantic chunks, when the parser exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub name: Option<String>,
}

/// A chunk persisted in the chunk store, addressed by its assigned id.
///
/// The id is monotonically assigned at insertion and is the sole identity
/// used for cross-linking into the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    /// Store-local integer id
    pub id: i64,
    /// The chunk payload
    pub chunk: CodeChunk,
}

/// A ranked search hit.
///
/// `bm25_score` and `vector_score` are the per-retriever RRF components;
/// `combined_score` is their sum. `rerank_score` is the sigmoid-normalised
/// cross-encoder score when reranking ran, otherwise 0.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: i64,
    pub chunk: CodeChunk,
    pub bm25_score: f32,
    pub vector_score: f32,
    pub combined_score: f32,
    pub rerank_score: f32,
    /// 1-based rank in the final result list
    pub rank: usize,
}

impl SearchResult {
    /// Start a result from a stored chunk with zeroed scores.
    pub fn from_stored(stored: StoredChunk) -> Self {
        Self {
            id: stored.id,
            chunk: stored.chunk,
            bm25_score: 0.0,
            vector_score: 0.0,
            combined_score: 0.0,
            rerank_score: 0.0,
            rank: 0,
        }
    }
}

/// Detect the language tag from a file extension.
///
/// Unknown extensions map to "text", which routes the file to the
/// line-window chunker.
pub fn detect_language(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "cpp",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" => "markdown",
        "rst" => "rst",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "proto" => "protobuf",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        _ => "text",
    }
    .to_string()
}
