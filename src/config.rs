//! Configuration for the retrieval evaluator.
//!
//! Supports both environment variables and a YAML config file.
//! Environment variables take precedence over config file values.
//!
//! ```yaml
//! embedding:
//!   provider: voyage
//!   model: voyage-3-lite
//! rerank:
//!   provider: jina
//!   model: jina-reranker-v2-base-multilingual
//! search:
//!   top_k: 3
//!   min_similarity: 0.4
//! ```

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Embedding vendors the harness can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/v1/embeddings`.
    #[default]
    OpenAi,
    /// Voyage AI embeddings with document/query input types.
    Voyage,
    /// Local sentence-transformers model (requires the `local` feature).
    Local,
}

impl EmbeddingBackend {
    /// Default API base URL.
    pub fn default_api_base(&self) -> &'static str {
        match self {
            EmbeddingBackend::OpenAi => "https://api.openai.com",
            EmbeddingBackend::Voyage => "https://api.voyageai.com",
            EmbeddingBackend::Local => "",
        }
    }

    /// Default model name.
    pub fn default_model(&self) -> &'static str {
        match self {
            EmbeddingBackend::OpenAi => "text-embedding-3-small",
            EmbeddingBackend::Voyage => "voyage-3-lite",
            EmbeddingBackend::Local => "sentence-transformers/all-MiniLM-L6-v2",
        }
    }

    /// Vendor-specific environment variable holding the API key.
    fn key_env_var(&self) -> Option<&'static str> {
        match self {
            EmbeddingBackend::OpenAi => Some("OPENAI_API_KEY"),
            EmbeddingBackend::Voyage => Some("VOYAGE_API_KEY"),
            EmbeddingBackend::Local => None,
        }
    }

    fn requires_api_key(&self) -> bool {
        !matches!(self, EmbeddingBackend::Local)
    }
}

impl FromStr for EmbeddingBackend {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(EmbeddingBackend::OpenAi),
            "voyage" => Ok(EmbeddingBackend::Voyage),
            "local" => Ok(EmbeddingBackend::Local),
            other => Err(EvalError::Configuration(format!(
                "Unknown embedding provider '{other}' (expected openai, voyage or local)"
            ))),
        }
    }
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmbeddingBackend::OpenAi => "openai",
            EmbeddingBackend::Voyage => "voyage",
            EmbeddingBackend::Local => "local",
        };
        f.write_str(name)
    }
}

/// Reranking vendors the harness can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankBackend {
    #[default]
    Voyage,
    Jina,
}

impl RerankBackend {
    /// Default API base URL.
    pub fn default_api_base(&self) -> &'static str {
        match self {
            RerankBackend::Voyage => "https://api.voyageai.com",
            RerankBackend::Jina => "https://api.jina.ai",
        }
    }

    /// Default model name.
    pub fn default_model(&self) -> &'static str {
        match self {
            RerankBackend::Voyage => "rerank-2-lite",
            RerankBackend::Jina => "jina-reranker-v2-base-multilingual",
        }
    }

    fn key_env_var(&self) -> &'static str {
        match self {
            RerankBackend::Voyage => "VOYAGE_API_KEY",
            RerankBackend::Jina => "JINA_API_KEY",
        }
    }
}

impl FromStr for RerankBackend {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "voyage" => Ok(RerankBackend::Voyage),
            "jina" => Ok(RerankBackend::Jina),
            other => Err(EvalError::Configuration(format!(
                "Unknown rerank provider '{other}' (expected voyage or jina)"
            ))),
        }
    }
}

impl fmt::Display for RerankBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RerankBackend::Voyage => "voyage",
            RerankBackend::Jina => "jina",
        })
    }
}

/// Published list prices in dollars per million tokens.
///
/// Unknown models cost nothing unless `price_per_million_tokens` is set.
pub fn default_price_per_million(model: &str) -> f64 {
    match model {
        "text-embedding-3-small" => 0.02,
        "text-embedding-3-large" => 0.13,
        "text-embedding-ada-002" => 0.10,
        "voyage-3" | "voyage-3.5" => 0.06,
        "voyage-3-lite" | "voyage-3.5-lite" => 0.02,
        "voyage-3-large" => 0.18,
        "rerank-2" => 0.05,
        "rerank-2-lite" => 0.02,
        "jina-reranker-v2-base-multilingual" => 0.02,
        _ => 0.0,
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingBackend,

    /// Model name; empty means the provider default.
    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// Base URL override; empty means the provider default.
    #[serde(default)]
    pub api_base: String,

    /// Overrides the built-in price table.
    #[serde(default)]
    pub price_per_million_tokens: Option<f64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let provider = EmbeddingBackend::default();
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: String::new(),
            api_base: String::new(),
            price_per_million_tokens: None,
        }
    }
}

impl EmbeddingConfig {
    /// Base URL with the provider default applied.
    pub fn resolved_api_base(&self) -> &str {
        if self.api_base.is_empty() {
            self.provider.default_api_base()
        } else {
            &self.api_base
        }
    }

    /// Dollars per million tokens for the configured model.
    pub fn price_per_million(&self) -> f64 {
        self.price_per_million_tokens
            .unwrap_or_else(|| default_price_per_million(&self.model))
    }
}

/// Reranker settings. Reranking is off when this section is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default)]
    pub provider: RerankBackend,

    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing)]
    pub api_key: String,

    #[serde(default)]
    pub api_base: String,

    #[serde(default)]
    pub price_per_million_tokens: Option<f64>,
}

impl RerankConfig {
    /// Settings for a provider with its default model.
    pub fn for_provider(provider: RerankBackend) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: String::new(),
            api_base: String::new(),
            price_per_million_tokens: None,
        }
    }

    /// Base URL with the provider default applied.
    pub fn resolved_api_base(&self) -> &str {
        if self.api_base.is_empty() {
            self.provider.default_api_base()
        } else {
            &self.api_base
        }
    }

    /// Dollars per million tokens for the configured model.
    pub fn price_per_million(&self) -> f64 {
        self.price_per_million_tokens
            .unwrap_or_else(|| default_price_per_million(&self.model))
    }
}

/// Retrieval and pacing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results kept when no threshold is set.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Similarity threshold; `<= 0` disables threshold mode.
    #[serde(default)]
    pub min_similarity: f64,

    /// Pause between evaluated queries.
    #[serde(default = "default_query_delay_ms")]
    pub query_delay_ms: u64,

    /// Pause between indexed documents.
    #[serde(default = "default_index_delay_ms")]
    pub index_delay_ms: u64,
}

fn default_top_k() -> usize {
    crate::shaping::DEFAULT_TOP_K
}

fn default_query_delay_ms() -> u64 {
    200
}

fn default_index_delay_ms() -> u64 {
    100
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: 0.0,
            query_delay_ms: default_query_delay_ms(),
            index_delay_ms: default_index_delay_ms(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub rerank: Option<RerankConfig>,

    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (EMBEDDING_*, RERANK_*, EVAL_*)
    /// 2. Config file (~/.config/retrieval-eval/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => Self::load_from_file(&path)?,
            _ => Config::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content).map_err(|e| {
            EvalError::Configuration(format!("Failed to parse config file: {}", e))
        })?;

        if config.embedding.model.is_empty() {
            config.embedding.model = config.embedding.provider.default_model().to_string();
        }
        if let Some(rerank) = config.rerank.as_mut() {
            if rerank.model.is_empty() {
                rerank.model = rerank.provider.default_model().to_string();
            }
        }
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in [`Config::load`]).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            let provider: EmbeddingBackend = provider.parse()?;
            if provider != self.embedding.provider {
                self.embedding.provider = provider;
                self.embedding.model = provider.default_model().to_string();
            }
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(api_base) = lookup("EMBEDDING_API_BASE") {
            self.embedding.api_base = api_base;
        }
        if let Some(api_key) = lookup("EMBEDDING_API_KEY") {
            self.embedding.api_key = api_key;
        }
        if self.embedding.api_key.is_empty() {
            if let Some(key) = self.embedding.provider.key_env_var().and_then(&lookup) {
                self.embedding.api_key = key;
            }
        }

        if let Some(provider) = lookup("RERANK_PROVIDER") {
            if provider.eq_ignore_ascii_case("none") {
                self.rerank = None;
            } else {
                let provider: RerankBackend = provider.parse()?;
                match self.rerank.as_mut() {
                    Some(rerank) if rerank.provider == provider => {}
                    _ => self.rerank = Some(RerankConfig::for_provider(provider)),
                }
            }
        }
        if let Some(rerank) = self.rerank.as_mut() {
            if let Some(model) = lookup("RERANK_MODEL") {
                rerank.model = model;
            }
            if let Some(api_key) = lookup("RERANK_API_KEY") {
                rerank.api_key = api_key;
            }
            if rerank.api_key.is_empty() {
                if let Some(key) = lookup(rerank.provider.key_env_var()) {
                    rerank.api_key = key;
                }
            }
        }

        if let Some(top_k) = lookup("EVAL_TOP_K") {
            self.search.top_k = top_k.trim().parse().map_err(|_| {
                EvalError::Configuration(format!(
                    "EVAL_TOP_K must be a positive integer, got '{top_k}'"
                ))
            })?;
        }
        if let Some(min_similarity) = lookup("EVAL_MIN_SIMILARITY") {
            self.search.min_similarity = min_similarity.trim().parse().map_err(|_| {
                EvalError::Configuration(format!(
                    "EVAL_MIN_SIMILARITY must be a number, got '{min_similarity}'"
                ))
            })?;
        }

        Ok(())
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "retrieval-eval")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.model.is_empty() {
            return Err(EvalError::Configuration(
                "Embedding model is required. Set EMBEDDING_MODEL or add it to the config file."
                    .to_string(),
            ));
        }

        if self.embedding.provider.requires_api_key() && self.embedding.api_key.is_empty() {
            return Err(EvalError::Configuration(format!(
                "API key for the {} embedding provider is required. Set EMBEDDING_API_KEY or {}.",
                self.embedding.provider,
                self.embedding.provider.key_env_var().unwrap_or("EMBEDDING_API_KEY")
            )));
        }

        if let Some(rerank) = &self.rerank {
            if rerank.model.is_empty() {
                return Err(EvalError::Configuration(
                    "Rerank model is required when reranking is enabled.".to_string(),
                ));
            }
            if rerank.api_key.is_empty() {
                return Err(EvalError::Configuration(format!(
                    "API key for the {} rerank provider is required. Set RERANK_API_KEY or {}.",
                    rerank.provider,
                    rerank.provider.key_env_var()
                )));
            }
        }

        if self.search.top_k == 0 {
            return Err(EvalError::Configuration(
                "top_k must be at least 1".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.search.min_similarity) {
            return Err(EvalError::Configuration(format!(
                "min_similarity must be within [-1, 1], got {}",
                self.search.min_similarity
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding.provider, EmbeddingBackend::OpenAi);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert!(config.rerank.is_none());
        assert_eq!(config.search.top_k, 3);
        assert_eq!(config.search.query_delay_ms, 200);
        assert_eq!(config.search.index_delay_ms, 100);
    }

    #[test]
    fn test_validate_fails_without_api_key() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(EvalError::Configuration(_))
        ));
    }

    #[test]
    fn test_local_backend_needs_no_key() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[("EMBEDDING_PROVIDER", "local")]))
            .unwrap();
        assert_eq!(config.embedding.model, "sentence-transformers/all-MiniLM-L6-v2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vendor_key_fallback() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("EMBEDDING_PROVIDER", "voyage"),
                ("VOYAGE_API_KEY", "vk"),
                ("RERANK_PROVIDER", "jina"),
                ("JINA_API_KEY", "jk"),
            ]))
            .unwrap();

        assert_eq!(config.embedding.api_key, "vk");
        assert_eq!(config.embedding.model, "voyage-3-lite");
        let rerank = config.rerank.as_ref().unwrap();
        assert_eq!(rerank.provider, RerankBackend::Jina);
        assert_eq!(rerank.api_key, "jk");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(lookup_from(&[("EMBEDDING_PROVIDER", "acme")]));
        assert!(matches!(result, Err(EvalError::Configuration(_))));
    }

    #[test]
    fn test_search_overrides_parse_or_fail() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup_from(&[
                ("EVAL_TOP_K", "5"),
                ("EVAL_MIN_SIMILARITY", " 0.35 "),
            ]))
            .unwrap();
        assert_eq!(config.search.top_k, 5);
        assert_eq!(config.search.min_similarity, 0.35);

        for (key, value) in [("EVAL_TOP_K", "five"), ("EVAL_MIN_SIMILARITY", "high")] {
            let mut config = Config::default();
            let result = config.apply_overrides(lookup_from(&[(key, value)]));
            assert!(
                matches!(result, Err(EvalError::Configuration(ref msg)) if msg.contains(key)),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_yaml_round_trip_fills_defaults() {
        let config = Config::from_yaml(
            r#"
embedding:
  provider: voyage
rerank:
  provider: voyage
search:
  min_similarity: 0.4
"#,
        )
        .unwrap();

        assert_eq!(config.embedding.model, "voyage-3-lite");
        assert_eq!(config.rerank.as_ref().unwrap().model, "rerank-2-lite");
        assert_eq!(config.search.min_similarity, 0.4);
        assert_eq!(config.search.top_k, 3);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let mut config = Config::default();
        config.embedding.api_key = "key".to_string();
        config.search.min_similarity = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pricing() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(config.price_per_million(), 0.02);
        config.price_per_million_tokens = Some(1.0);
        assert_eq!(config.price_per_million(), 1.0);
        assert_eq!(default_price_per_million("unknown-model"), 0.0);
    }
}
