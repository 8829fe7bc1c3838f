//! Capability traits for the neural components.
//!
//! The engine never owns model weights; it consumes embedding and
//! cross-encoder capabilities through these traits, passed by handle into
//! the components that need them. Implementations are expected to
//! initialise lazily on first use.

use async_trait::async_trait;

use crate::error::Result;

/// Text → dense vector capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of the vectors this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// (query, passage) → relevance logit capability.
///
/// Scores are raw logits; callers normalise via sigmoid.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Score each passage against the query, preserving input order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}
