use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

use crate::chunking::{BreakpointType, ChunkingConfig, ChunkingStrategy, ConfigurationError};

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Chunking variables describe an impossible configuration.
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ConfigurationError),
}

/// Runtime configuration for the docrag binaries.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Collections searched when a query does not name any.
    pub collections: Vec<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime, when used for embeddings or completions.
    pub ollama_url: Option<String>,
    /// API key for OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: Option<String>,
    /// Provider answering generation prompts.
    pub llm_provider: LlmProvider,
    /// Chat model identifier passed to the LLM provider.
    pub llm_model: String,
    /// Upper bound on a single completion call.
    pub llm_timeout_secs: u64,
    /// Chunking strategy applied during ingestion.
    pub chunking_strategy: ChunkingStrategy,
    /// Target chunk size (characters or tokens, per strategy).
    pub chunk_size: usize,
    /// Overlap between adjacent chunks.
    pub chunk_overlap: usize,
    /// Minimum chunk size.
    pub min_chunk_size: usize,
    /// Breakpoint type used by the semantic strategy.
    pub semantic_breakpoint_type: BreakpointType,
    /// Default top-k used for generation.
    pub max_retrieved_documents: usize,
    /// Token budget for the assembled context.
    pub max_context_tokens: usize,
    /// Global deadline for the per-collection search fan-out.
    pub search_timeout_ms: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic offline hashing embedder.
    Hash,
}

/// Supported completion backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible chat completions API.
    OpenAI,
}

const DEFAULT_COLLECTIONS: &str = "documents,images,web_pages";

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            collections: parse_collections(
                &load_env_optional("DOCRAG_COLLECTIONS")
                    .unwrap_or_else(|| DEFAULT_COLLECTIONS.to_string()),
            ),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_parsed("EMBEDDING_DIMENSION")?
                .ok_or_else(|| ConfigError::MissingVariable("EMBEDDING_DIMENSION".to_string()))?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            llm_provider: load_env_optional("LLM_PROVIDER")
                .map(|value| {
                    value
                        .parse::<LlmProvider>()
                        .map_err(|()| ConfigError::InvalidValue("LLM_PROVIDER".to_string()))
                })
                .transpose()?
                .unwrap_or(LlmProvider::Ollama),
            llm_model: load_env_optional("LLM_MODEL").unwrap_or_else(|| "llama3.1".to_string()),
            llm_timeout_secs: load_parsed("LLM_TIMEOUT_SECS")?.unwrap_or(60),
            chunking_strategy: load_env_optional("CHUNKING_STRATEGY")
                .map(|value| {
                    value
                        .parse::<ChunkingStrategy>()
                        .map_err(|_| ConfigError::InvalidValue("CHUNKING_STRATEGY".to_string()))
                })
                .transpose()?
                .unwrap_or(ChunkingStrategy::Recursive),
            chunk_size: load_parsed("CHUNK_SIZE")?.unwrap_or(1000),
            chunk_overlap: load_parsed("CHUNK_OVERLAP")?.unwrap_or(200),
            min_chunk_size: load_parsed("MIN_CHUNK_SIZE")?.unwrap_or(100),
            semantic_breakpoint_type: load_env_optional("SEMANTIC_BREAKPOINT_TYPE")
                .map(|value| {
                    value.parse::<BreakpointType>().map_err(|_| {
                        ConfigError::InvalidValue("SEMANTIC_BREAKPOINT_TYPE".to_string())
                    })
                })
                .transpose()?
                .unwrap_or(BreakpointType::Percentile),
            max_retrieved_documents: load_parsed("MAX_RETRIEVED_DOCUMENTS")?.unwrap_or(5),
            max_context_tokens: load_parsed("MAX_CONTEXT_TOKENS")?.unwrap_or(3000),
            search_timeout_ms: load_parsed("SEARCH_TIMEOUT_MS")?.unwrap_or(5000),
            server_port: load_parsed("SERVER_PORT")?,
        };

        if config.max_retrieved_documents == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_RETRIEVED_DOCUMENTS".to_string(),
            ));
        }
        if config.collections.is_empty() {
            return Err(ConfigError::InvalidValue("DOCRAG_COLLECTIONS".to_string()));
        }
        config.chunking_config()?;
        Ok(config)
    }

    /// Build the validated chunking configuration described by the environment.
    pub fn chunking_config(&self) -> Result<ChunkingConfig, ConfigurationError> {
        ChunkingConfig::builder(self.chunking_strategy)
            .target_size(self.chunk_size)
            .overlap(self.chunk_overlap)
            .min_chunk_size(self.min_chunk_size)
            .breakpoint_type(self.semantic_breakpoint_type)
            .build()
    }

    /// Collection used for documents that are not images or web pages.
    pub fn default_collection(&self) -> &str {
        self.collections
            .first()
            .map(String::as_str)
            .unwrap_or("documents")
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_collections(raw: &str) -> Vec<String> {
    let mut collections: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        if !collections.iter().any(|existing| existing == name) {
            collections.push(name.to_string());
        }
    }
    collections
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collections = ?config.collections,
        server_port = ?config.server_port,
        embedding_provider = ?config.embedding_provider,
        llm_provider = ?config.llm_provider,
        chunking_strategy = %config.chunking_strategy,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_collections_trims_and_dedupes() {
        let collections = parse_collections(" documents, web_pages,,documents ");
        assert_eq!(collections, vec!["documents", "web_pages"]);
    }

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::OpenAI));
        assert_eq!("hash".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Hash));
        assert_eq!("Ollama".parse::<LlmProvider>(), Ok(LlmProvider::Ollama));
        assert!("bedrock".parse::<LlmProvider>().is_err());
    }
}
