//! Reciprocal Rank Fusion.
//!
//! Each retriever contributes `weight / (k + rank)` for every chunk it
//! returns (rank is 1-based); a chunk's combined score is the sum of its
//! contributions. With k = 60 the fusion is robust to score-scale
//! differences between BM25 and cosine distance, and degenerates cleanly
//! to a single retriever's ranking when the other is empty.

use crate::types::SearchResult;

/// Fusion configuration.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// RRF constant (typically 60)
    pub k: f32,
    /// Weight for BM25 ranks
    pub bm25_weight: f32,
    /// Weight for vector ranks
    pub vector_weight: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            bm25_weight: 0.5,
            vector_weight: 0.5,
        }
    }
}

/// RRF contribution of a 1-based rank under the given weight.
pub fn rrf_component(rank: usize, weight: f32, k: f32) -> f32 {
    weight / (k + rank as f32)
}

/// Sort by combined score descending, truncate, and assign 1-based ranks.
pub fn finalize_by_combined_score(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    results
}
