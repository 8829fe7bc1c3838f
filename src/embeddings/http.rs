//! HTTP embedding provider.
//!
//! Talks to any OpenAI-compatible embeddings endpoint. Responses are
//! re-ordered by the returned index so batch output always matches input
//! order.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::config::EmbeddingConfig;
use crate::error::CodiiErr;
use crate::error::Result;
use crate::traits::Embedder;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Embedder backed by an OpenAI-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(api_key: impl Into<String>, config: &EmbeddingConfig) -> Self {
        Self {
            api_key: api_key.into(),
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: reqwest::Client::new(),
        }
    }

    /// Override the base URL (e.g. for a local inference server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request_embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            dimensions: Some(self.dimension),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CodiiErr::EmbeddingFailed {
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CodiiErr::EmbeddingFailed {
                cause: format!("API error {status}: {error_text}"),
            });
        }

        let result: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| CodiiErr::EmbeddingFailed {
                    cause: e.to_string(),
                })?;

        let mut embeddings: Vec<(usize, Vec<f32>)> = result
            .data
            .into_iter()
            .map(|e| (e.index, e.embedding))
            .collect();
        embeddings.sort_by_key(|(index, _)| *index);

        Ok(embeddings.into_iter().map(|(_, e)| e).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.request_embeddings(vec![text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| CodiiErr::EmbeddingFailed {
                cause: "empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts.to_vec()).await
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
