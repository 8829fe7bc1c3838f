//! Cross-encoder reranking.
//!
//! Scores (query, passage) pairs with a cross-encoder, normalises the raw
//! logits through a sigmoid, filters by threshold, and reorders the
//! shortlist. Failures propagate to the caller, which falls back to the
//! fused RRF order.

use std::sync::Arc;

use crate::error::Result;
use crate::traits::CrossEncoder;
use crate::types::SearchResult;

/// Logistic normalisation of a logit into [0, 1].
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Reranker backed by a [`CrossEncoder`] capability.
pub struct CrossEncoderReranker {
    encoder: Arc<dyn CrossEncoder>,
    threshold: f32,
}

impl CrossEncoderReranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, threshold: f32) -> Self {
        Self { encoder, threshold }
    }

    /// Rerank candidates against the query.
    ///
    /// Results are sorted by normalised score descending; entries scoring
    /// below the threshold are dropped, the rest truncated to `top_k` and
    /// re-ranked 1-based.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let passages: Vec<String> = candidates.iter().map(|c| c.chunk.content.clone()).collect();
        let logits = self.encoder.score(query, &passages).await?;

        let mut scored: Vec<SearchResult> = candidates
            .into_iter()
            .zip(logits)
            .map(|(mut candidate, logit)| {
                candidate.rerank_score = sigmoid(logit);
                candidate
            })
            .collect();

        scored.sort_by(|a, b| {
            b.rerank_score
                .partial_cmp(&a.rerank_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut results: Vec<SearchResult> = scored
            .into_iter()
            .filter(|c| c.rerank_score >= self.threshold)
            .take(top_k)
            .collect();

        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }
        Ok(results)
    }
}
