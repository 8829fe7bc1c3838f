//! Configuration for the indexing and retrieval engine.

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// Main engine configuration.
///
/// Built once and passed by value into [`crate::engine::IndexEngine`];
/// subcomponents receive the pieces they need. There is no process-global
/// config instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodiiConfig {
    /// Base directory for all persistent state
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Indexing configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub vector: VectorConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Reranker configuration
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Embedding provider configuration (optional; a provider may also be
    /// constructed directly and handed to the engine)
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
}

impl Default for CodiiConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            indexing: IndexingConfig::default(),
            chunking: ChunkingConfig::default(),
            vector: VectorConfig::default(),
            search: SearchConfig::default(),
            reranker: RerankerConfig::default(),
            embedding: None,
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codii")
}

/// Indexing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingConfig {
    /// File extensions included in a scan
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Ignore patterns applied in addition to gitignore
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Number of chunk contents per embedding call
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore_patterns: default_ignore_patterns(),
            embedding_batch_size: default_embedding_batch_size(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        ".py", ".js", ".jsx", ".ts", ".tsx", ".go", ".rs", ".java", ".c", ".cpp", ".cc", ".cxx",
        ".h", ".hpp", ".hxx", ".json", ".yaml", ".yml", ".toml", ".md", ".rst", ".txt", ".sh",
        ".bash", ".zsh", ".sql", ".proto", ".html", ".css", ".scss", ".less",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignore_patterns() -> Vec<String> {
    [
        ".git/",
        "__pycache__/",
        "node_modules/",
        ".venv/",
        "venv/",
        ".env/",
        "dist/",
        "build/",
        "target/",
        ".tox/",
        ".pytest_cache/",
        ".mypy_cache/",
        ".ruff_cache/",
        "coverage/",
        ".idea/",
        ".vscode/",
        "*.pyc",
        "*.pyo",
        "*.so",
        "*.dll",
        "*.dylib",
        "*.exe",
        "*.bin",
        "*.jpg",
        "*.jpeg",
        "*.png",
        "*.gif",
        "*.svg",
        "*.ico",
        "*.pdf",
        "*.zip",
        "*.tar",
        "*.gz",
        "*.rar",
        "*.7z",
        "*.log",
        "*.tmp",
        "*.swp",
        "*.swo",
        ".DS_Store",
        "Thumbs.db",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_embedding_batch_size() -> usize {
    32
}

/// Chunking configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Maximum chunk size in bytes
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Minimum chunk size in bytes
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Suffix overlap carried into the next line-window chunk, in bytes
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    1500
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_chunk_overlap() -> usize {
    200
}

/// Vector index (HNSW) configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VectorConfig {
    /// HNSW M parameter (max connections per node)
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: usize,

    /// HNSW ef parameter used at construction time
    #[serde(default = "default_hnsw_ef_construction")]
    pub hnsw_ef_construction: usize,

    /// HNSW ef parameter used at query time. Kept high so multi-term
    /// queries do not hit recall cliffs.
    #[serde(default = "default_hnsw_ef_search")]
    pub hnsw_ef_search: usize,

    /// Maximum number of elements the index is sized for
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef_construction(),
            hnsw_ef_search: default_hnsw_ef_search(),
            max_elements: default_max_elements(),
        }
    }
}

fn default_hnsw_m() -> usize {
    16
}
fn default_hnsw_ef_construction() -> usize {
    200
}
fn default_hnsw_ef_search() -> usize {
    100
}
fn default_max_elements() -> usize {
    1_000_000
}

/// Search configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Default number of results to return
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Hard cap on the number of results
    #[serde(default = "default_max_search_limit")]
    pub max_limit: usize,

    /// Weight for BM25 ranks in RRF
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,

    /// Weight for vector ranks in RRF
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Minimum query-term length kept by the query processor
    #[serde(default = "default_min_term_length")]
    pub min_term_length: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            max_limit: default_max_search_limit(),
            bm25_weight: default_bm25_weight(),
            vector_weight: default_vector_weight(),
            rrf_k: default_rrf_k(),
            min_term_length: default_min_term_length(),
        }
    }
}

fn default_search_limit() -> usize {
    10
}
fn default_max_search_limit() -> usize {
    50
}
fn default_bm25_weight() -> f32 {
    0.5
}
fn default_vector_weight() -> f32 {
    0.5
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_min_term_length() -> usize {
    2
}

/// Reranker configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RerankerConfig {
    /// Whether cross-encoder reranking runs by default
    #[serde(default = "default_rerank_enabled")]
    pub enabled: bool,

    /// Number of fused candidates handed to the cross-encoder
    #[serde(default = "default_rerank_candidates")]
    pub candidates: usize,

    /// Minimum sigmoid-normalised score kept after reranking
    #[serde(default = "default_rerank_threshold")]
    pub threshold: f32,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: default_rerank_enabled(),
            candidates: default_rerank_candidates(),
            threshold: default_rerank_threshold(),
        }
    }
}

fn default_rerank_enabled() -> bool {
    true
}
fn default_rerank_candidates() -> usize {
    20
}
fn default_rerank_threshold() -> f32 {
    0.5
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Model name (e.g. "text-embedding-3-small")
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// API base URL for OpenAI-compatible endpoints
    #[serde(default)]
    pub base_url: Option<String>,
}

impl CodiiConfig {
    /// Load configuration from config files.
    ///
    /// Search order (first found wins):
    /// 1. `{workdir}/.codii.toml` (project-level)
    /// 2. `~/.codii/config.toml` (global)
    /// 3. Defaults
    pub fn load(workdir: &Path) -> crate::error::Result<Self> {
        let project_config = workdir.join(".codii.toml");
        if project_config.exists() {
            return Self::from_file(&project_config);
        }

        if let Some(home) = dirs::home_dir() {
            let global_config = home.join(".codii/config.toml");
            if global_config.exists() {
                return Self::from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::CodiiErr::ConfigParseError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Validate configuration consistency.
    ///
    /// Returns warnings for values that are usable but suspicious.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.chunking.max_chunk_size == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "chunking.max_chunk_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.chunking.chunk_overlap >= self.chunking.max_chunk_size {
            warnings.push(ConfigWarning::InvalidValue {
                field: "chunking.chunk_overlap",
                reason: format!(
                    "must be < max_chunk_size ({}), got {}",
                    self.chunking.max_chunk_size, self.chunking.chunk_overlap
                ),
            });
        }
        if self.indexing.embedding_batch_size == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "indexing.embedding_batch_size",
                reason: "must be > 0".to_string(),
            });
        }

        let total_weight = self.search.bm25_weight + self.search.vector_weight;
        if (total_weight - 1.0).abs() > 0.01 {
            warnings.push(ConfigWarning::WeightSumNotOne {
                actual: total_weight,
            });
        }

        if self.search.max_limit == 0 || self.search.default_limit > self.search.max_limit {
            warnings.push(ConfigWarning::InvalidValue {
                field: "search.default_limit",
                reason: format!(
                    "must be <= max_limit ({}), got {}",
                    self.search.max_limit, self.search.default_limit
                ),
            });
        }

        if self.vector.hnsw_ef_search < 100 {
            warnings.push(ConfigWarning::LowEfSearch {
                actual: self.vector.hnsw_ef_search,
            });
        }

        warnings
    }
}

/// Configuration warning.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Search weights don't sum to 1.0
    WeightSumNotOne { actual: f32 },
    /// ef_search low enough to risk recall cliffs on multi-term queries
    LowEfSearch { actual: usize },
    /// Invalid numeric value
    InvalidValue { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::WeightSumNotOne { actual } => {
                write!(f, "Search weights sum to {actual:.2}, expected 1.0")
            }
            ConfigWarning::LowEfSearch { actual } => {
                write!(f, "vector.hnsw_ef_search = {actual} is below the recommended 100")
            }
            ConfigWarning::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{field}': {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = CodiiConfig::default();
        assert_eq!(config.chunking.max_chunk_size, 1500);
        assert_eq!(config.chunking.min_chunk_size, 100);
        assert_eq!(config.vector.hnsw_m, 16);
        assert_eq!(config.search.rrf_k, 60.0);
        assert!(config.reranker.enabled);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: CodiiConfig = toml::from_str(
            r#"
            [chunking]
            max_chunk_size = 800
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_chunk_size, 800);
        assert_eq!(config.chunking.min_chunk_size, 100);
        assert_eq!(config.search.bm25_weight, 0.5);
    }

    #[test]
    fn validate_flags_bad_weights() {
        let mut config = CodiiConfig::default();
        config.search.bm25_weight = 0.9;
        let warnings = config.validate();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::WeightSumNotOne { .. })));
    }

    #[test]
    fn validate_flags_overlap_exceeding_chunk_size() {
        let mut config = CodiiConfig::default();
        config.chunking.chunk_overlap = 2000;
        let warnings = config.validate();
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::InvalidValue { field, .. } if *field == "chunking.chunk_overlap")));
    }
}
