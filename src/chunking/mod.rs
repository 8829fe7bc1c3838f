//! Code chunking.
//!
//! Syntax-aware chunking via tree-sitter for recognised languages, with a
//! line-window fallback for everything else. The syntax chunker reports
//! failure as a typed outcome rather than an error; the fallback choice is
//! made explicitly here.

pub mod syntax;
pub mod text;

pub use syntax::ChunkOutcome;
pub use syntax::SyntaxChunker;
pub use text::TextChunker;

use crate::config::ChunkingConfig;
use crate::types::CodeChunk;

/// Which chunking strategy an indexing call requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitterKind {
    /// Syntax-tree chunking with line-window fallback
    #[default]
    Syntax,
    /// Line-window chunking only
    Text,
}

/// Chunk one file's content, applying the fallback policy.
///
/// Every non-empty file yields at least one chunk.
pub fn chunk_source(
    content: &str,
    path: &str,
    language: &str,
    config: ChunkingConfig,
    splitter: SplitterKind,
) -> Vec<CodeChunk> {
    let text_chunker = TextChunker::new(
        config.max_chunk_size,
        config.min_chunk_size,
        config.chunk_overlap,
    );

    if splitter == SplitterKind::Text || !SyntaxChunker::is_language_supported(language) {
        return text_chunker.chunk_file(content, path, language);
    }

    let chunker = SyntaxChunker::new();
    match chunker.chunk_file(
        content,
        path,
        language,
        config.max_chunk_size,
        config.min_chunk_size,
    ) {
        ChunkOutcome::Parsed(chunks) => chunks,
        ChunkOutcome::ParseFailed { reason } => {
            tracing::warn!(
                path = %path,
                language = %language,
                reason = %reason,
                "Syntax chunking failed, falling back to line-window chunker"
            );
            text_chunker.chunk_file(content, path, language)
        }
    }
}
