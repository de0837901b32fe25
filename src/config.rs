//! Configuration
//!
//! `~/.docqa/config.toml`, every section optional:
//!
//! ```toml
//! [chunking]
//! max_tokens = 500
//! overlap_tokens = 10
//!
//! [retrieval]
//! top_k = 7
//!
//! [embedding]
//! provider = "openai"   # or "hashing" for a local, offline embedder
//! model = "text-embedding-3-small"
//!
//! [chat]
//! model = "gpt-3.5-turbo"
//! temperature = 0.7
//! ```
//!
//! API keys are never read from this file or from the environment here; the
//! caller supplies them as [`Credentials`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::documents::chunker::ChunkerConfig;
use crate::documents::index::DEFAULT_BATCH_SIZE;
use crate::documents::retriever::DEFAULT_TOP_K;
use crate::openai::{
    DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_MAX_INPUT_TOKENS, DEFAULT_TEMPERATURE,
};

pub const DEFAULT_MAX_CONCURRENT_QUESTIONS: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("API key required for {0}")]
    MissingApiKey(&'static str),
}

impl Serialize for ConfigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub chunking: ChunkerConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Hashing,
}

impl EmbeddingProvider {
    pub fn is_remote(&self) -> bool {
        matches!(self, EmbeddingProvider::OpenAi)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimensions: usize,
    pub base_url: String,
    pub batch_size: usize,
    pub max_input_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAi,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            base_url: DEFAULT_BASE_URL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub temperature: f32,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

impl ChatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_questions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_concurrent_questions: DEFAULT_MAX_CONCURRENT_QUESTIONS }
    }
}

impl QaConfig {
    /// Load from the default path, or defaults if no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docqa")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be positive".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding.dimensions must be positive".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be positive".into()));
        }
        if self.pipeline.max_concurrent_questions == 0 {
            return Err(ConfigError::Invalid("pipeline.max_concurrent_questions must be positive".into()));
        }
        Ok(())
    }
}

/// Backend credentials, injected by the caller.
#[derive(Clone, Default)]
pub struct Credentials {
    api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            api_key: if api_key.trim().is_empty() { None } else { Some(api_key) },
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn require(&self, purpose: &'static str) -> Result<&str, ConfigError> {
        self.api_key().ok_or(ConfigError::MissingApiKey(purpose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QaConfig::default();
        assert_eq!(config.chunking.max_tokens, 500);
        assert_eq!(config.chunking.overlap_tokens, 10);
        assert_eq!(config.chunking.separators, vec!["\n\n", "\n", " ", ""]);
        assert_eq!(config.retrieval.top_k, 7);
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.chat.model, "gpt-3.5-turbo");
        assert!((config.chat.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.pipeline.max_concurrent_questions, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        assert_eq!(QaConfig::from_toml("").unwrap(), QaConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = QaConfig::from_toml(
            r#"
            [retrieval]
            top_k = 3

            [embedding]
            provider = "hashing"
            dimensions = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
        assert_eq!(config.embedding.dimensions, 128);
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.chunking.max_tokens, 500);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "[chunking]\nmax_tokens = 0",
            "[chunking]\nmax_tokens = 10\noverlap_tokens = 10",
            "[chunking]\nseparators = []",
            "[retrieval]\ntop_k = 0",
            "[embedding]\ndimensions = 0",
            "[embedding]\nbatch_size = 0",
        ];
        for case in cases {
            assert!(
                matches!(QaConfig::from_toml(case), Err(ConfigError::Invalid(_))),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(QaConfig::from_toml("[retrieval\n"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            QaConfig::from_toml("[embedding]\nprovider = \"cohere\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chat]\nmodel = \"gpt-4o-mini\"\n").unwrap();

        let config = QaConfig::load_from(&path).unwrap();
        assert_eq!(config.chat.model, "gpt-4o-mini");

        let missing = QaConfig::load_from(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_default_path() {
        assert!(QaConfig::default_path().ends_with(".docqa/config.toml"));
    }

    #[test]
    fn test_credentials() {
        assert!(Credentials::none().require("chat").is_err());
        assert!(Credentials::new("   ").api_key().is_none());

        let creds = Credentials::new("sk-test");
        assert_eq!(creds.require("chat").unwrap(), "sk-test");
        assert!(!format!("{:?}", creds).contains("sk-test"));
    }
}
