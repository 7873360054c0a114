//! HTTP embedding and rerank providers.
//!
//! OpenAI and Voyage share the `/v1/embeddings` request shape; Voyage
//! additionally takes an `input_type`. Voyage and Jina rerank endpoints differ
//! only in the name of the result-count field and the result array.

use super::{EmbedPurpose, Embedding, EmbeddingProvider, RerankProvider, Reranking, TokenCount};
use crate::config::{EmbeddingBackend, EmbeddingConfig, RerankBackend, RerankConfig};
use crate::error::{EvalError, Result};
use crate::shaping::{Candidate, RerankedCandidate};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(alias = "data")]
    results: Vec<RerankHit>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    relevance_score: f64,
}

/// Vendor error bodies: OpenAI nests a message, Voyage and Jina send `detail`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiError {
    Nested { error: ApiErrorDetail },
    Detail { detail: serde_json::Value },
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError::Nested { error }) => format!("API error ({}): {}", status, error.message),
        Ok(ApiError::Detail { detail }) => match detail {
            serde_json::Value::String(message) => format!("API error ({}): {}", status, message),
            other => format!("API error ({}): {}", status, other),
        },
        Err(_) => format!("Request failed ({}): {}", status, body),
    }
}

/// POST a JSON body and return the raw response text, mapping non-2xx
/// statuses to provider errors.
async fn post_json<T: Serialize>(
    client: &Client,
    provider: &str,
    url: &str,
    api_key: &str,
    body: &T,
) -> Result<String> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(EvalError::provider(provider, api_error_message(status, &text)));
    }
    Ok(text)
}

/// Decode a 2xx vendor body; malformed replies are provider errors.
fn parse_body<T: serde::de::DeserializeOwned>(provider: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        EvalError::provider(provider, format!("Malformed response body: {}", e))
    })
}

/// Embedding provider for OpenAI-compatible and Voyage endpoints.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    /// Create a new embedder with the given configuration.
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.resolved_api_base().trim_end_matches('/');
        format!("{}/v1/embeddings", base)
    }

    fn input_type(&self, purpose: EmbedPurpose) -> Option<&'static str> {
        match self.config.provider {
            EmbeddingBackend::Voyage => Some(purpose.as_str()),
            _ => None,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn name(&self) -> &str {
        match self.config.provider {
            EmbeddingBackend::Voyage => "voyage",
            _ => "openai",
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Embedding> {
        let request = EmbeddingRequest {
            input: vec![text],
            model: &self.config.model,
            input_type: self.input_type(purpose),
        };

        debug!(
            provider = self.name(),
            model = %self.config.model,
            purpose = purpose.as_str(),
            "requesting embedding"
        );

        let body = post_json(
            &self.client,
            self.name(),
            &self.endpoint(),
            &self.config.api_key,
            &request,
        )
        .await?;

        let response: EmbeddingResponse = parse_body(self.name(), &body)?;
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EvalError::provider(self.name(), "No embedding in response"))?;

        if vector.is_empty() {
            return Err(EvalError::provider(self.name(), "Empty embedding in response"));
        }

        let tokens = TokenCount::reported_or_estimated(response.usage.map(|u| u.total_tokens), text);

        Ok(Embedding { vector, tokens })
    }
}

/// Rerank provider for Voyage and Jina endpoints.
#[derive(Clone)]
pub struct HttpReranker {
    client: Client,
    config: RerankConfig,
}

impl HttpReranker {
    /// Create a new reranker with the given configuration.
    pub fn new(config: RerankConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.resolved_api_base().trim_end_matches('/');
        format!("{}/v1/rerank", base)
    }
}

#[async_trait]
impl RerankProvider for HttpReranker {
    fn name(&self) -> &str {
        match self.config.provider {
            RerankBackend::Voyage => "voyage",
            RerankBackend::Jina => "jina",
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Reranking> {
        if candidates.is_empty() {
            return Ok(Reranking {
                ranked: Vec::new(),
                tokens: TokenCount::default(),
            });
        }

        let documents: Vec<String> = candidates.iter().map(Candidate::rerank_text).collect();
        let (top_k_field, top_n_field) = match self.config.provider {
            RerankBackend::Voyage => (Some(top_k), None),
            RerankBackend::Jina => (None, Some(top_k)),
        };

        debug!(
            provider = self.name(),
            model = %self.config.model,
            candidates = candidates.len(),
            "requesting rerank"
        );

        let request = RerankRequest {
            model: &self.config.model,
            query,
            documents,
            top_k: top_k_field,
            top_n: top_n_field,
        };

        let body = post_json(
            &self.client,
            self.name(),
            &self.endpoint(),
            &self.config.api_key,
            &request,
        )
        .await?;

        let response: RerankResponse = parse_body(self.name(), &body)?;

        let mut ranked = response
            .results
            .iter()
            .map(|hit| {
                candidates
                    .get(hit.index)
                    .map(|c| RerankedCandidate::from_candidate(c, hit.relevance_score))
                    .ok_or_else(|| {
                        EvalError::provider(
                            self.name(),
                            format!("Rerank result index {} out of range", hit.index),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        // Stable, so equal scores keep the vendor's order.
        ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        ranked.truncate(top_k);

        let billed_text = format!("{} {}", query, request.documents.join(" "));
        let tokens =
            TokenCount::reported_or_estimated(response.usage.map(|u| u.total_tokens), &billed_text);

        Ok(Reranking { ranked, tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedding_config(provider: EmbeddingBackend, api_base: String) -> EmbeddingConfig {
        EmbeddingConfig {
            provider,
            model: provider.default_model().to_string(),
            api_key: "test-key".to_string(),
            api_base,
            price_per_million_tokens: None,
        }
    }

    fn rerank_config(provider: RerankBackend, api_base: String) -> RerankConfig {
        RerankConfig {
            api_key: "test-key".to_string(),
            api_base,
            ..RerankConfig::for_provider(provider)
        }
    }

    fn candidate(id: u64, title: &str, score: f64) -> Candidate {
        Candidate {
            id,
            similarity_score: score,
            title: title.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_endpoint_construction() {
        let embedder = HttpEmbedder::new(embedding_config(
            EmbeddingBackend::OpenAi,
            "https://api.example.com/".to_string(),
        ));
        assert_eq!(embedder.endpoint(), "https://api.example.com/v1/embeddings");

        let reranker = HttpReranker::new(rerank_config(RerankBackend::Jina, String::new()));
        assert_eq!(reranker.endpoint(), "https://api.jina.ai/v1/rerank");
    }

    #[test]
    fn test_api_error_message_shapes() {
        let status = reqwest::StatusCode::UNAUTHORIZED;
        assert!(
            api_error_message(status, r#"{"error": {"message": "bad key"}}"#).contains("bad key")
        );
        assert!(api_error_message(status, r#"{"detail": "no quota"}"#).contains("no quota"));
        assert!(api_error_message(status, "oops").contains("oops"));
    }

    #[tokio::test]
    async fn test_openai_embedding_uses_reported_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.6, 0.8], "index": 0}],
                "model": "text-embedding-3-small",
                "usage": {"prompt_tokens": 7, "total_tokens": 7}
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(embedding_config(EmbeddingBackend::OpenAi, server.uri()));
        let embedding = embedder
            .embed("rust ownership", EmbedPurpose::Query)
            .await
            .unwrap();

        assert_eq!(embedding.vector, vec![0.6, 0.8]);
        assert_eq!(embedding.tokens, TokenCount::reported(7));
    }

    #[tokio::test]
    async fn test_voyage_embedding_sends_input_type_and_estimates_missing_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"input_type": "document"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(embedding_config(EmbeddingBackend::Voyage, server.uri()));
        let embedding = embedder
            .embed("three word text", EmbedPurpose::Document)
            .await
            .unwrap();

        assert_eq!(embedding.tokens.count, 3);
        assert!(embedding.tokens.estimated);
    }

    #[tokio::test]
    async fn test_embedding_error_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(json!({"error": {"message": "rate limited"}})),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(embedding_config(EmbeddingBackend::OpenAi, server.uri()));
        let err = embedder
            .embed("anything", EmbedPurpose::Query)
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::Provider { .. }));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_jina_rerank_maps_indices_back_to_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .and(body_partial_json(json!({"top_n": 3, "query": "bread"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"index": 2, "relevance_score": 0.91},
                    {"index": 0, "relevance_score": 0.40},
                    {"index": 1, "relevance_score": 0.05}
                ],
                "usage": {"total_tokens": 30}
            })))
            .mount(&server)
            .await;

        let candidates = vec![
            candidate(10, "Rust", 0.7),
            candidate(11, "Python", 0.6),
            candidate(12, "Sourdough", 0.5),
        ];
        let reranker = HttpReranker::new(rerank_config(RerankBackend::Jina, server.uri()));
        let reranking = reranker.rerank("bread", &candidates, 3).await.unwrap();

        let ids: Vec<u64> = reranking.ranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![12, 10, 11]);
        assert_eq!(reranking.ranked[0].original_similarity_score, 0.5);
        assert!(reranking.ranked.iter().all(|c| c.was_reranked));
        assert_eq!(reranking.tokens, TokenCount::reported(30));
    }

    #[tokio::test]
    async fn test_voyage_rerank_reads_data_array() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .and(body_partial_json(json!({"top_k": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 1, "relevance_score": 0.8}],
                "usage": {"total_tokens": 12}
            })))
            .mount(&server)
            .await;

        let candidates = vec![candidate(1, "a", 0.9), candidate(2, "b", 0.8)];
        let reranker = HttpReranker::new(rerank_config(RerankBackend::Voyage, server.uri()));
        let reranking = reranker.rerank("q", &candidates, 1).await.unwrap();

        assert_eq!(reranking.ranked.len(), 1);
        assert_eq!(reranking.ranked[0].id, 2);
    }

    #[tokio::test]
    async fn test_rerank_out_of_range_index_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"index": 5, "relevance_score": 0.8}]
            })))
            .mount(&server)
            .await;

        let reranker = HttpReranker::new(rerank_config(RerankBackend::Jina, server.uri()));
        let result = reranker.rerank("q", &[candidate(1, "a", 0.9)], 1).await;
        assert!(matches!(result, Err(EvalError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(embedding_config(EmbeddingBackend::OpenAi, server.uri()));
        let err = embedder
            .embed("anything", EmbedPurpose::Query)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Provider { .. }));
        assert!(err.is_provider());

        let reranker = HttpReranker::new(rerank_config(RerankBackend::Voyage, server.uri()));
        let err = reranker
            .rerank("q", &[candidate(1, "a", 0.9)], 1)
            .await
            .unwrap_err();
        assert!(err.is_provider());
    }
}
