use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "papers".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: default_chunk_size(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    100
}

/// Which hosted embedding API backs the index.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Voyage,
    #[serde(rename = "openai")]
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Voyage => "voyage",
            ProviderKind::OpenAI => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Voyage => "voyage-2",
            ProviderKind::OpenAI => "text-embedding-3-small",
        }
    }

    pub fn default_batch_size(&self) -> usize {
        match self {
            ProviderKind::Voyage => 32,
            ProviderKind::OpenAI => 16,
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::Voyage => "VOYAGE_API_KEY",
            ProviderKind::OpenAI => "OPENAI_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Voyage => "https://api.voyageai.com/v1",
            ProviderKind::OpenAI => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides the provider's API root, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: None,
            api_key_env: None,
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::Voyage
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

impl EmbeddingConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
            .unwrap_or_else(|| self.provider.default_batch_size())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_paper_k")]
    pub paper_k: usize,
    #[serde(default = "default_library_k")]
    pub library_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            paper_k: default_paper_k(),
            library_k: default_library_k(),
        }
    }
}

fn default_paper_k() -> usize {
    5
}
fn default_library_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Configuration for a database at `path` with every other section defaulted.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: path.into(),
                collection: default_collection(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingestion: IngestionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.db.collection.trim().is_empty() {
            anyhow::bail!("db.collection must not be empty");
        }

        if self.chunking.chunk_size_tokens == 0 {
            anyhow::bail!("chunking.chunk_size_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_size_tokens {
            anyhow::bail!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.chunk_size_tokens ({})",
                self.chunking.overlap_tokens,
                self.chunking.chunk_size_tokens
            );
        }

        let batch_size = self.embedding.batch_size();
        if !(1..=128).contains(&batch_size) {
            anyhow::bail!("embedding.batch_size must be in [1, 128], got {}", batch_size);
        }
        if self.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when set");
        }
        if self.embedding.timeout_secs == 0 {
            anyhow::bail!("embedding.timeout_secs must be > 0");
        }

        if self.retrieval.paper_k < 1 || self.retrieval.library_k < 1 {
            anyhow::bail!("retrieval.paper_k and retrieval.library_k must be >= 1");
        }

        if self.ingestion.workers < 1 {
            anyhow::bail!("ingestion.workers must be >= 1");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"./data/x.sqlite\"\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.db.collection, "papers");
        assert_eq!(config.chunking.chunk_size_tokens, 800);
        assert_eq!(config.chunking.overlap_tokens, 100);
        assert_eq!(config.embedding.provider, ProviderKind::Voyage);
        assert_eq!(config.embedding.model(), "voyage-2");
        assert_eq!(config.embedding.batch_size(), 32);
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.retrieval.paper_k, 5);
        assert_eq!(config.retrieval.library_k, 10);
        assert_eq!(config.ingestion.workers, 4);
    }

    #[test]
    fn test_openai_defaults() {
        let config: Config = toml::from_str(
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"openai\"\nbase_url = \"http://localhost:9/v1/\"\n",
        )
        .unwrap();
        assert_eq!(config.embedding.provider, ProviderKind::OpenAI);
        assert_eq!(config.embedding.model(), "text-embedding-3-small");
        assert_eq!(config.embedding.batch_size(), 16);
        assert_eq!(config.embedding.api_key_env(), "OPENAI_API_KEY");
        assert_eq!(config.embedding.base_url(), "http://localhost:9/v1");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let parsed: Result<Config, _> =
            toml::from_str("[db]\npath = \"x\"\n[embedding]\nprovider = \"cohere\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = Config::with_db_path("x.sqlite");
        config.chunking.chunk_size_tokens = 100;
        config.chunking.overlap_tokens = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn test_batch_size_bounds() {
        let mut config = Config::with_db_path("x.sqlite");
        config.embedding.batch_size = Some(0);
        assert!(config.validate().is_err());
        config.embedding.batch_size = Some(129);
        assert!(config.validate().is_err());
        config.embedding.batch_size = Some(64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/paperx.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
