//! Hybrid search combining BM25 and vector retrieval.
//!
//! The two legs run in parallel; their rankings are fused with Reciprocal
//! Rank Fusion and optionally re-ordered by a cross-encoder. Either leg
//! returning nothing leaves the other's ranking in charge.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RerankerConfig;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::reranker::CrossEncoderReranker;
use crate::search::fusion::finalize_by_combined_score;
use crate::search::fusion::rrf_component;
use crate::search::fusion::RrfConfig;
use crate::storage::ChunkStore;
use crate::storage::VectorStore;
use crate::traits::CrossEncoder;
use crate::traits::Embedder;
use crate::types::SearchResult;

/// Hybrid searcher over one repository's chunk and vector stores.
pub struct HybridSearcher {
    chunk_store: Arc<ChunkStore>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<CrossEncoderReranker>,
    search_config: SearchConfig,
    reranker_config: RerankerConfig,
}

impl HybridSearcher {
    pub fn new(
        chunk_store: Arc<ChunkStore>,
        vector_store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        search_config: SearchConfig,
        reranker_config: RerankerConfig,
    ) -> Self {
        Self {
            chunk_store,
            vector_store,
            embedder,
            reranker: None,
            search_config,
            reranker_config,
        }
    }

    /// Attach a cross-encoder for result reranking.
    pub fn with_cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.reranker = Some(CrossEncoderReranker::new(
            encoder,
            self.reranker_config.threshold,
        ));
        self
    }

    /// Whether a reranker is attached.
    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    /// Run a hybrid search.
    ///
    /// `rerank` overrides the configured default when set. `path_filter`
    /// restricts BM25 hits to chunks whose path contains the substring
    /// (vector hits from other paths still surface through fusion and are
    /// then subject to the same payload lookup).
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        path_filter: Option<&str>,
        rerank: Option<bool>,
    ) -> Result<Vec<SearchResult>> {
        let limit = limit.max(1).min(self.search_config.max_limit.max(1));
        let use_rerank =
            rerank.unwrap_or(self.reranker_config.enabled) && self.reranker.is_some();

        let candidate_k = if use_rerank {
            self.reranker_config.candidates
        } else {
            (limit * 2).min(50)
        };

        let (bm25_results, vector_results) = tokio::join!(
            self.chunk_store.search_bm25(
                query,
                candidate_k,
                path_filter.map(|s| s.to_string()),
            ),
            self.vector_leg(query, candidate_k),
        );
        let bm25_results = bm25_results?;

        let fused = self.fuse(bm25_results, vector_results).await?;

        if use_rerank {
            if let Some(reranker) = &self.reranker {
                match reranker.rerank(query, fused.clone(), limit).await {
                    Ok(reranked) => return Ok(reranked),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Re-ranking failed, falling back to RRF order"
                        );
                    }
                }
            }
        }

        Ok(finalize_by_combined_score(fused, limit))
    }

    /// Embed the query and search the vector store.
    ///
    /// A failed embedding degrades to an empty vector leg with a warning;
    /// the BM25 ranking alone then determines the results.
    async fn vector_leg(&self, query: &str, k: usize) -> Vec<(i64, f32)> {
        match self.embedder.embed(query).await {
            Ok(query_vector) => self.vector_store.search(&query_vector, k),
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, vector leg skipped");
                Vec::new()
            }
        }
    }

    /// Reciprocal Rank Fusion over both rankings.
    ///
    /// Chunks only present in the vector ranking have their payload fetched
    /// from the chunk store; a missing payload skips that entry.
    async fn fuse(
        &self,
        bm25_results: Vec<crate::storage::Bm25Match>,
        vector_results: Vec<(i64, f32)>,
    ) -> Result<Vec<SearchResult>> {
        let rrf = RrfConfig {
            k: self.search_config.rrf_k,
            bm25_weight: self.search_config.bm25_weight,
            vector_weight: self.search_config.vector_weight,
        };

        let mut by_id: HashMap<i64, SearchResult> = HashMap::new();

        for (rank, hit) in bm25_results.into_iter().enumerate() {
            let component = rrf_component(rank + 1, rrf.bm25_weight, rrf.k);
            by_id
                .entry(hit.chunk.id)
                .or_insert_with(|| SearchResult::from_stored(hit.chunk))
                .bm25_score = component;
        }

        for (rank, (chunk_id, _distance)) in vector_results.into_iter().enumerate() {
            let component = rrf_component(rank + 1, rrf.vector_weight, rrf.k);
            if let Some(existing) = by_id.get_mut(&chunk_id) {
                existing.vector_score = component;
                continue;
            }
            match self.chunk_store.get_chunk_by_id(chunk_id).await? {
                Some(stored) => {
                    let mut result = SearchResult::from_stored(stored);
                    result.vector_score = component;
                    by_id.insert(chunk_id, result);
                }
                None => {
                    tracing::warn!(chunk_id, "Vector hit has no chunk payload, skipping");
                }
            }
        }

        let mut results: Vec<SearchResult> = by_id.into_values().collect();
        for result in &mut results {
            result.combined_score = result.bm25_score + result.vector_score;
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorConfig;
    use crate::error::CodiiErr;
    use crate::types::CodeChunk;
    use async_trait::async_trait;

    /// Deterministic embedder: maps known phrases onto axis vectors.
    #[derive(Debug)]
    struct AxisEmbedder;

    fn axis(index: usize) -> Vec<f32> {
        let mut v = vec![0.0; 8];
        v[index] = 1.0;
        v
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn dimension(&self) -> usize {
            8
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let index = if text.contains("alpha") {
                0
            } else if text.contains("beta") {
                1
            } else {
                7
            };
            Ok(axis(index))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }

    /// Cross-encoder that always fails, for fallback tests.
    #[derive(Debug)]
    struct BrokenCrossEncoder;

    #[async_trait]
    impl CrossEncoder for BrokenCrossEncoder {
        async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>> {
            Err(CodiiErr::RerankFailed {
                cause: "model unavailable".to_string(),
            })
        }
    }

    fn make_chunk(content: &str, path: &str) -> CodeChunk {
        CodeChunk {
            content: content.to_string(),
            path: path.to_string(),
            start_line: 1,
            end_line: 2,
            language: "python".to_string(),
            chunk_type: "function".to_string(),
            name: None,
        }
    }

    async fn searcher_with_corpus() -> (tempfile::TempDir, HybridSearcher) {
        let dir = tempfile::tempdir().unwrap();
        let chunk_store = Arc::new(ChunkStore::open(&dir.path().join("chunks.db")).unwrap());
        let vector_store =
            Arc::new(VectorStore::open(dir.path(), VectorConfig::default()).unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(AxisEmbedder);

        let ids = chunk_store
            .insert_chunks_batch(vec![
                make_chunk("def alpha_handler(): dispatch()", "/repo/alpha.py"),
                make_chunk("def beta_handler(): dispatch()", "/repo/beta.py"),
            ])
            .await
            .unwrap();
        // alpha embeds on axis 0, beta on axis 1.
        vector_store
            .add_vectors(&ids, vec![axis(0), axis(1)])
            .unwrap();

        let searcher = HybridSearcher::new(
            chunk_store,
            vector_store,
            embedder,
            SearchConfig::default(),
            RerankerConfig::default(),
        );
        (dir, searcher)
    }

    #[tokio::test]
    async fn hybrid_search_ranks_doubly_matched_chunk_first() {
        let (_dir, searcher) = searcher_with_corpus().await;

        // "alpha" matches chunk 1 in both BM25 and vector space.
        let results = searcher.search("alpha handler", 2, None, Some(false)).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.path, "/repo/alpha.py");
        assert_eq!(results[0].rank, 1);
        assert!(results[0].combined_score >= results.last().unwrap().combined_score);
    }

    #[tokio::test]
    async fn bm25_alone_when_vector_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let chunk_store = Arc::new(ChunkStore::open(&dir.path().join("chunks.db")).unwrap());
        let vector_store =
            Arc::new(VectorStore::open(dir.path(), VectorConfig::default()).unwrap());
        chunk_store
            .insert_chunks_batch(vec![make_chunk("def lonely_token(): ok()", "/repo/a.py")])
            .await
            .unwrap();

        let searcher = HybridSearcher::new(
            chunk_store,
            vector_store,
            Arc::new(AxisEmbedder),
            SearchConfig::default(),
            RerankerConfig::default(),
        );

        let results = searcher.search("lonely_token", 5, None, Some(false)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].bm25_score > 0.0);
        assert_eq!(results[0].vector_score, 0.0);
    }

    #[tokio::test]
    async fn both_retrievers_empty_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let chunk_store = Arc::new(ChunkStore::open(&dir.path().join("chunks.db")).unwrap());
        let vector_store =
            Arc::new(VectorStore::open(dir.path(), VectorConfig::default()).unwrap());
        let searcher = HybridSearcher::new(
            chunk_store,
            vector_store,
            Arc::new(AxisEmbedder),
            SearchConfig::default(),
            RerankerConfig::default(),
        );

        let results = searcher.search("anything", 5, None, Some(false)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn broken_cross_encoder_falls_back_to_rrf_order() {
        let (_dir, searcher) = searcher_with_corpus().await;
        let searcher = searcher.with_cross_encoder(Arc::new(BrokenCrossEncoder));
        assert!(searcher.has_reranker());

        let results = searcher.search("alpha handler", 2, None, Some(true)).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.path, "/repo/alpha.py");
        // Fallback keeps RRF scores, no rerank scores.
        assert_eq!(results[0].rerank_score, 0.0);
    }

    #[tokio::test]
    async fn path_filter_restricts_bm25_hits() {
        let (_dir, searcher) = searcher_with_corpus().await;
        let results = searcher
            .search("handler dispatch", 5, Some("beta"), Some(false))
            .await
            .unwrap();
        assert!(results
            .iter()
            .all(|r| r.bm25_score == 0.0 || r.chunk.path.contains("beta")));
    }
}
