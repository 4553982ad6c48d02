//! Layered configuration over the closed key set in the external-interfaces
//! spec: defaults, then an optional JSON file, then `APP_*`/`LLM_*`
//! environment overrides. Unknown keys are rejected (`deny_unknown_fields`)
//! rather than silently ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocsConfig {
    pub parsed_dir: PathBuf,
    pub index_dir: PathBuf,
    pub jdk_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RagConfigSection {
    pub search_top_k: usize,
    pub search_return_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QdrantCollections {
    pub docs: String,
    pub pdfs: String,
    pub books: String,
    pub articles: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QdrantConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub api_key: Option<String>,
    pub collections: QdrantCollections,
    pub dense_vector_name: String,
    pub sparse_vector_name: String,
    pub prefetch_limit: usize,
    pub rrf_k: usize,
    pub query_timeout_secs: u64,
    pub fail_on_partial_search_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    pub primary_provider: String,
    pub primary_backoff_seconds: u64,
    pub streaming_request_timeout_seconds: u64,
    pub streaming_read_timeout_seconds: u64,
    pub reasoning_effort: Option<String>,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RagCoreConfig {
    pub docs: DocsConfig,
    pub rag: RagConfigSection,
    pub qdrant: QdrantConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
}

impl RagCoreConfig {
    /// Validates cross-field constraints the individual structs can't.
    /// Mirrors the teacher's `RAGConfig::validate()` shape: collect the
    /// first violated constraint and fail fast.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qdrant.prefetch_limit == 0 {
            return Err(ConfigError::Invalid("qdrant.prefetch-limit must be > 0".into()));
        }
        if self.qdrant.rrf_k == 0 {
            return Err(ConfigError::Invalid("qdrant.rrf-k must be > 0".into()));
        }
        if self.qdrant.query_timeout_secs == 0 {
            return Err(ConfigError::Invalid("qdrant.query-timeout must be > 0".into()));
        }
        if self.rag.search_return_k > self.rag.search_top_k {
            return Err(ConfigError::Invalid(
                "rag.search-return-k must be <= rag.search-top-k".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding.dimensions must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch-size must be > 0".into()));
        }
        if self.llm.primary_backoff_seconds == 0 {
            return Err(ConfigError::Invalid(
                "llm.primary-backoff-seconds must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Loads from an optional JSON file (defaults used for any field the
    /// file doesn't override via a full re-specification — since the schema
    /// is closed, a provided file must be complete) and applies `APP_*`/
    /// `LLM_*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p).map_err(|e| ConfigError::Read {
                    path: p.display().to_string(),
                    source: e,
                })?;
                serde_json::from_str::<Self>(&content).map_err(|e| ConfigError::Parse {
                    path: p.display().to_string(),
                    source: e,
                })?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("APP_QDRANT_HOST") {
            self.qdrant.host = v;
        }
        if let Ok(v) = std::env::var("APP_QDRANT_PORT") {
            if let Ok(port) = v.parse() {
                self.qdrant.port = port;
            }
        }
        if let Ok(v) = std::env::var("APP_QDRANT_API_KEY") {
            self.qdrant.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_PRIMARY_PROVIDER") {
            self.llm.primary_provider = v;
        }
        if let Ok(v) = std::env::var("APP_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
    }
}

impl Default for RagCoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ragcore");

        Self {
            docs: DocsConfig {
                parsed_dir: data_dir.join("parsed"),
                index_dir: data_dir.join("ingested"),
                jdk_version: "21".to_string(),
            },
            rag: RagConfigSection {
                search_top_k: 40,
                search_return_k: 10,
            },
            qdrant: QdrantConfig {
                host: "localhost".to_string(),
                port: 6334,
                use_tls: false,
                api_key: None,
                collections: QdrantCollections {
                    docs: "docs".to_string(),
                    pdfs: "pdfs".to_string(),
                    books: "books".to_string(),
                    articles: "articles".to_string(),
                },
                dense_vector_name: "dense".to_string(),
                sparse_vector_name: "sparse".to_string(),
                prefetch_limit: 100,
                rrf_k: 60,
                query_timeout_secs: 5,
                fail_on_partial_search_error: false,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:8080".to_string(),
                model: "text-embedding-3-small".to_string(),
                dimensions: 1536,
                batch_size: 64,
            },
            llm: LlmConfig {
                primary_provider: "github_models".to_string(),
                primary_backoff_seconds: 600,
                streaming_request_timeout_seconds: 600,
                streaming_read_timeout_seconds: 75,
                reasoning_effort: None,
                max_output_tokens: 4000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RagCoreConfig::default().validate().is_ok());
    }

    #[test]
    fn search_return_k_over_top_k_is_invalid() {
        let mut config = RagCoreConfig::default();
        config.rag.search_return_k = config.rag.search_top_k + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_prefetch_limit_is_invalid() {
        let mut config = RagCoreConfig::default();
        config.qdrant.prefetch_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_with_missing_path_falls_back_to_default() {
        let config = RagCoreConfig::load(Some(Path::new("/nonexistent/path.json"))).unwrap();
        assert_eq!(config.qdrant.rrf_k, 60);
    }
}
