//! Evaluation orchestrator.
//!
//! Drives each query through embed, retrieve, rerank, shape, validate and
//! record, strictly in that order. The [`MetricsEngine`] is owned by the
//! [`Evaluator`] for the lifetime of one run.

use crate::config::Config;
use crate::dataset::{ContentItem, EvalQuery};
use crate::error::{EvalError, Result};
use crate::metrics::{AggregateReport, GenerationStats, MetricsEngine, QueryOutcome, QueryUsage};
use crate::providers::{EmbedPurpose, EmbeddingProvider, RerankProvider, TokenCount};
use crate::shaping::{
    RankedResult, limit_results, rerank_batch, retrieval_pool_size, shape_results,
};
use crate::store::VectorStore;
use crate::validation::{ValidationResult, validate_results};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Settings for one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSettings {
    /// Results kept when no threshold is set.
    pub top_k: usize,
    /// Similarity threshold; `<= 0` means top-k mode.
    pub min_similarity: f64,
    /// Pause between evaluated queries.
    pub query_delay_ms: u64,
    /// Pause between indexed documents.
    pub index_delay_ms: u64,
    /// Embedding price in dollars per million tokens.
    pub embedding_price_per_million: f64,
    /// Rerank price in dollars per million tokens.
    pub rerank_price_per_million: f64,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EvalSettings {
    /// Take search and pricing settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.search.top_k,
            min_similarity: config.search.min_similarity,
            query_delay_ms: config.search.query_delay_ms,
            index_delay_ms: config.search.index_delay_ms,
            embedding_price_per_million: config.embedding.price_per_million(),
            rerank_price_per_million: config
                .rerank
                .as_ref()
                .map(|r| r.price_per_million())
                .unwrap_or(0.0),
        }
    }

    /// Settings with no pacing, for in-process providers.
    pub fn without_delays(mut self) -> Self {
        self.query_delay_ms = 0;
        self.index_delay_ms = 0;
        self
    }
}

/// Shaped results for one query, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    /// Final results in rank order.
    pub results: Vec<RankedResult>,
    /// Closest misses, for display only.
    pub below_threshold: Vec<RankedResult>,
    /// Whether a rerank call succeeded for this query.
    pub reranked: bool,
    /// Candidates returned by the vector store.
    pub candidates_retrieved: usize,
    pub embedding_tokens: TokenCount,
    /// Zero when reranking is off or failed.
    pub rerank_tokens: TokenCount,
}

impl SearchResults {
    /// Result ids in rank order.
    pub fn found_ids(&self) -> Vec<u64> {
        self.results.iter().map(|r| r.id).collect()
    }
}

/// Everything recorded about one evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub outcome: QueryOutcome,
    pub validation: ValidationResult,
    pub results: Vec<RankedResult>,
    pub below_threshold: Vec<RankedResult>,
    pub reranked: bool,
}

/// A query skipped because its evaluation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub search_text: String,
    pub error: String,
}

/// Full output of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub embedding_model: String,
    pub rerank_model: Option<String>,
    pub settings: EvalSettings,
    pub summary: AggregateReport,
    pub generation: GenerationStats,
    pub queries: Vec<QueryRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<QueryFailure>,
}

impl EvaluationReport {
    /// Number of queries whose expected ids were all found.
    pub fn valid_count(&self) -> usize {
        self.queries.iter().filter(|q| q.validation.is_valid).count()
    }

    /// Print summary to stdout.
    pub fn print_summary(&self) {
        let summary = &self.summary;
        println!("\n========== Evaluation Results ==========");
        println!("Embedding model: {}", self.embedding_model);
        println!(
            "Rerank model:    {}",
            self.rerank_model.as_deref().unwrap_or("(none)")
        );
        if self.settings.min_similarity > 0.0 {
            println!("Mode:            threshold >= {}", self.settings.min_similarity);
        } else {
            println!("Mode:            top {}", self.settings.top_k);
        }
        println!("----------------------------------------");
        println!(
            "Queries:         {} ({} valid, {} failed)",
            summary.query_count,
            self.valid_count(),
            self.failures.len()
        );
        println!(
            "Tokens:          {} embedding, {} rerank",
            summary.total_tokens, summary.total_rerank_tokens
        );
        println!("Runtime:         {} ms", summary.total_runtime_ms);
        println!(
            "Cost:            ${:.8} (embedding ${:.8}, rerank ${:.8})",
            summary.total_cost, summary.total_embedding_cost, summary.total_rerank_cost
        );
        println!("----------------------------------------");
        println!("{:<10} {:>8} {:>10}", "", "Recall", "Precision");
        for (label, metrics) in [
            ("Micro", &summary.micro),
            ("Macro", &summary.macro_avg),
            ("Weighted", &summary.weighted),
        ] {
            println!(
                "{:<10} {:>7.1}% {:>9.1}%",
                label, metrics.recall, metrics.precision
            );
        }
        if self.generation.items_embedded > 0 {
            println!("----------------------------------------");
            println!(
                "Index build:     {} items, {} tokens{}, ${:.8}",
                self.generation.items_embedded,
                self.generation.total_tokens,
                if self.generation.tokens_estimated {
                    " (estimated)"
                } else {
                    ""
                },
                self.generation.total_cost
            );
        }
        println!("========================================\n");
    }
}

/// Runs retrieval evaluations against one vector store.
pub struct Evaluator<S: VectorStore> {
    embedder: Box<dyn EmbeddingProvider>,
    reranker: Option<Box<dyn RerankProvider>>,
    store: S,
    settings: EvalSettings,
    metrics: MetricsEngine,
    records: Vec<QueryRecord>,
    failures: Vec<QueryFailure>,
}

impl<S: VectorStore> Evaluator<S> {
    /// Create an evaluator with a fresh metrics history.
    pub fn new(
        embedder: Box<dyn EmbeddingProvider>,
        reranker: Option<Box<dyn RerankProvider>>,
        store: S,
        settings: EvalSettings,
    ) -> Self {
        Self {
            embedder,
            reranker,
            store,
            settings,
            metrics: MetricsEngine::new(),
            records: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the evaluator, returning the (possibly newly indexed) store.
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn metrics(&self) -> &MetricsEngine {
        &self.metrics
    }

    /// Records of every query evaluated so far, in order.
    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    /// Embed and store each item, one at a time.
    pub async fn build_index(&mut self, items: &[ContentItem]) -> Result<()> {
        info!(items = items.len(), model = self.embedder.model(), "building index");

        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                pause(self.settings.index_delay_ms).await;
            }

            let embedding = self
                .embedder
                .embed(&item.embedding_text(), EmbedPurpose::Document)
                .await?;
            let cost = embedding
                .tokens
                .cost(self.settings.embedding_price_per_million);
            self.store.insert(embedding.vector, item.clone())?;
            self.metrics
                .record_generation(embedding.tokens.count, cost, embedding.tokens.estimated);

            debug!(id = item.id, tokens = embedding.tokens.count, "indexed item");
        }

        let generation = self.metrics.generation();
        info!(
            items = generation.items_embedded,
            tokens = generation.total_tokens,
            "index built"
        );
        Ok(())
    }

    /// Retrieve and shape results for a query without validating or recording.
    pub async fn search(&self, search_text: &str) -> Result<SearchResults> {
        let embedding = self
            .embedder
            .embed(search_text, EmbedPurpose::Query)
            .await?;

        let pool_size = retrieval_pool_size(self.settings.top_k, self.reranker.is_some());
        let candidates = self.store.query(&embedding.vector, pool_size)?;
        debug!(
            pool_size,
            retrieved = candidates.len(),
            "retrieved candidates"
        );

        let mut rerank_tokens = TokenCount::default();
        let mut reranked = None;
        if let Some(reranker) = self.reranker.as_ref().filter(|_| !candidates.is_empty()) {
            let batch = rerank_batch(&candidates);
            match reranker.rerank(search_text, batch, batch.len()).await {
                Ok(reranking) => {
                    rerank_tokens = reranking.tokens;
                    reranked = Some(reranking.ranked);
                }
                Err(e) => {
                    warn!(
                        provider = reranker.name(),
                        error = %e,
                        "rerank failed, keeping similarity order"
                    );
                }
            }
        }

        let min_similarity = self.settings.min_similarity;
        let partition = shape_results(&candidates, reranked.as_deref(), min_similarity);
        let results = limit_results(partition.above_threshold, min_similarity, self.settings.top_k);

        Ok(SearchResults {
            results,
            below_threshold: partition.below_threshold,
            reranked: reranked.is_some(),
            candidates_retrieved: candidates.len(),
            embedding_tokens: embedding.tokens,
            rerank_tokens,
        })
    }

    /// Evaluate one labeled query and record its outcome.
    ///
    /// Embedding and store failures abort this query and nothing is recorded.
    pub async fn evaluate_query(&mut self, query: &EvalQuery) -> Result<QueryRecord> {
        let started = Instant::now();
        let search = self.search(&query.search_text).await?;
        let runtime_ms = started.elapsed().as_millis() as u64;

        let found_ids = search.found_ids();
        let validation = validate_results(&found_ids, &query.expected_ids);

        let usage = QueryUsage {
            tokens_used: search.embedding_tokens.count,
            rerank_tokens_used: search.rerank_tokens.count,
            runtime_ms,
            embedding_cost: search
                .embedding_tokens
                .cost(self.settings.embedding_price_per_million),
            rerank_cost: search
                .rerank_tokens
                .cost(self.settings.rerank_price_per_million),
            tokens_estimated: search.embedding_tokens.estimated || search.rerank_tokens.estimated,
        };
        let outcome = QueryOutcome::new(
            query.search_text.clone(),
            query.expected_ids.clone(),
            found_ids,
            usage,
        );

        info!(
            query = %query.search_text,
            valid = validation.is_valid,
            recall = outcome.recall_pct,
            precision = outcome.precision_pct,
            runtime_ms,
            "evaluated query"
        );

        let record = QueryRecord {
            outcome: outcome.clone(),
            validation,
            results: search.results,
            below_threshold: search.below_threshold,
            reranked: search.reranked,
        };
        self.metrics.record_query_outcome(outcome);
        self.records.push(record.clone());
        Ok(record)
    }

    /// Evaluate queries in order, stopping at the first failure.
    pub async fn run(&mut self, queries: &[EvalQuery]) -> Result<()> {
        for (i, query) in queries.iter().enumerate() {
            if i > 0 {
                pause(self.settings.query_delay_ms).await;
            }
            self.evaluate_query(query).await?;
        }
        Ok(())
    }

    /// Evaluate queries in order, skipping ones that fail with a provider error.
    ///
    /// Store and configuration errors still end the run.
    pub async fn run_skipping_failures(&mut self, queries: &[EvalQuery]) -> Result<()> {
        for (i, query) in queries.iter().enumerate() {
            if i > 0 {
                pause(self.settings.query_delay_ms).await;
            }
            match self.evaluate_query(query).await {
                Ok(_) => {}
                Err(e) if e.is_provider() => {
                    warn!(query = %query.search_text, error = %e, "skipping failed query");
                    self.failures.push(QueryFailure {
                        search_text: query.search_text.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Snapshot of the run so far.
    pub fn report(&self) -> EvaluationReport {
        EvaluationReport {
            embedding_model: self.embedder.model().to_string(),
            rerank_model: self.reranker.as_ref().map(|r| r.model().to_string()),
            settings: self.settings.clone(),
            summary: self.metrics.aggregate(),
            generation: self.metrics.generation().clone(),
            queries: self.records.clone(),
            failures: self.failures.clone(),
        }
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Reject settings the shaper cannot work with.
pub fn check_settings(settings: &EvalSettings) -> Result<()> {
    if settings.top_k == 0 {
        return Err(EvalError::Configuration("top_k must be at least 1".to_string()));
    }
    if !(-1.0..=1.0).contains(&settings.min_similarity) {
        return Err(EvalError::Configuration(format!(
            "min_similarity must be within [-1, 1], got {}",
            settings.min_similarity
        )));
    }
    Ok(())
}
