//! Embedding and reranking capabilities.
//!
//! The evaluator only depends on the two traits defined here. Concrete
//! vendors are a closed set selected from configuration:
//! - [`HttpEmbedder`]: OpenAI-compatible and Voyage embedding APIs
//! - [`HttpReranker`]: Voyage and Jina rerank APIs
//! - `LocalEmbedder`: candle sentence-transformers model (`local` feature)

mod http;
#[cfg(feature = "local")]
mod local;

pub use http::{HttpEmbedder, HttpReranker};
#[cfg(feature = "local")]
pub use local::LocalEmbedder;

use crate::config::{EmbeddingBackend, EmbeddingConfig, RerankConfig};
use crate::error::Result;
use crate::shaping::{Candidate, RerankedCandidate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a piece of text is embedded as. Some vendors embed queries and
/// documents into asymmetric spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedPurpose {
    Document,
    Query,
}

impl EmbedPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedPurpose::Document => "document",
            EmbedPurpose::Query => "query",
        }
    }
}

/// A token count and whether it was reported by the vendor or estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub count: u64,
    pub estimated: bool,
}

impl TokenCount {
    /// A count reported by the provider.
    pub fn reported(count: u64) -> Self {
        Self {
            count,
            estimated: false,
        }
    }

    /// An approximate count from [`estimate_tokens`].
    pub fn estimated(text: &str) -> Self {
        Self {
            count: estimate_tokens(text),
            estimated: true,
        }
    }

    /// Use the vendor's usage figure if present, else estimate from `text`.
    pub fn reported_or_estimated(reported: Option<u64>, text: &str) -> Self {
        match reported {
            Some(count) => Self::reported(count),
            None => Self::estimated(text),
        }
    }

    /// Dollar cost at the given price per million tokens.
    pub fn cost(&self, price_per_million: f64) -> f64 {
        self.count as f64 * price_per_million / 1_000_000.0
    }
}

/// Approximate token count: words plus standalone punctuation marks.
pub fn estimate_tokens(text: &str) -> u64 {
    let mut tokens = 0u64;
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if !in_word {
                tokens += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !c.is_whitespace() {
                tokens += 1;
            }
        }
    }
    tokens
}

/// An embedding vector and the tokens it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens: TokenCount,
}

/// Reranked candidates (highest relevance first) and the tokens billed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reranking {
    pub ranked: Vec<RerankedCandidate>,
    pub tokens: TokenCount,
}

/// Turns text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Embed one text. Fails with a provider or HTTP error.
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Embedding>;
}

/// Rescores a candidate pool against a query with a cross-encoder.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Return up to `top_k` candidates ordered by relevance.
    async fn rerank(&self, query: &str, candidates: &[Candidate], top_k: usize)
    -> Result<Reranking>;
}

/// Build the embedding provider selected in configuration.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingBackend::OpenAi | EmbeddingBackend::Voyage => {
            Ok(Box::new(HttpEmbedder::new(config.clone())))
        }
        #[cfg(feature = "local")]
        EmbeddingBackend::Local => Ok(Box::new(LocalEmbedder::load(&config.model)?)),
        #[cfg(not(feature = "local"))]
        EmbeddingBackend::Local => Err(crate::error::EvalError::Configuration(
            "The local embedding provider requires building with --features local".to_string(),
        )),
    }
}

/// Build the reranker selected in configuration, if any.
pub fn build_reranker(config: Option<&RerankConfig>) -> Option<Box<dyn RerankProvider>> {
    config.map(|c| Box::new(HttpReranker::new(c.clone())) as Box<dyn RerankProvider>)
}
