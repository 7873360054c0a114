//! Recall/precision scoring and run-level aggregation.
//!
//! Per-query scores are set-based percentages in `[0, 100]`. The
//! [`MetricsEngine`] keeps the full history of [`QueryOutcome`]s for one
//! evaluation run and recomputes the [`AggregateReport`] from scratch on every
//! call to [`MetricsEngine::aggregate`], averaging three ways:
//!
//! - **micro**: pool raw counts across queries, then divide
//! - **macro**: unweighted mean of per-query percentages
//! - **weighted**: per-query percentages weighted by expected-id count
//!
//! Queries with no expected ids follow one convention everywhere: they are
//! fully satisfied only by an empty result. In pooled statistics such a query
//! counts as one expected id, found iff nothing was returned.
//!
//! Counts are unsigned, so the "non-negative counts" precondition is carried by
//! the types rather than checked at runtime.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Number of ids in `expected_ids` that appear anywhere in `found_ids`.
fn matched_count(found_ids: &[u64], expected_ids: &BTreeSet<u64>) -> usize {
    let found: HashSet<u64> = found_ids.iter().copied().collect();
    expected_ids.iter().filter(|id| found.contains(id)).count()
}

/// Percentage guarded against `0/0` and clamped into `[0, 100]`.
fn percentage(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        return 0.0;
    }
    (100.0 * numerator / denominator).clamp(0.0, 100.0)
}

/// Percentage of expected ids present in the results.
///
/// An empty expectation scores 100 only when nothing was returned.
pub fn recall(found_ids: &[u64], expected_ids: &BTreeSet<u64>) -> f64 {
    if expected_ids.is_empty() {
        return if found_ids.is_empty() { 100.0 } else { 0.0 };
    }
    percentage(
        matched_count(found_ids, expected_ids) as f64,
        expected_ids.len() as f64,
    )
}

/// Percentage of returned ids that were expected.
///
/// An empty expectation scores 100 only when nothing was returned; otherwise an
/// empty result scores 0.
pub fn precision(found_ids: &[u64], expected_ids: &BTreeSet<u64>) -> f64 {
    if expected_ids.is_empty() {
        return if found_ids.is_empty() { 100.0 } else { 0.0 };
    }
    if found_ids.is_empty() {
        return 0.0;
    }
    percentage(
        matched_count(found_ids, expected_ids) as f64,
        found_ids.len() as f64,
    )
}

/// Format a cost as a fixed-point decimal string with 8 decimal places.
pub fn format_cost(cost: f64) -> String {
    format!("{cost:.8}")
}

/// Serde adapter persisting `f64` costs as fixed-point strings.
///
/// Generic float serialization switches to scientific notation for tiny
/// values like `2e-7`; reports always carry `"0.00000020"` instead.
pub mod cost_format {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cost: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_cost(*cost))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Resource usage measured while evaluating one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryUsage {
    /// Embedding tokens for the query text.
    pub tokens_used: u64,
    /// Tokens billed by the reranker (0 when disabled or failed).
    pub rerank_tokens_used: u64,
    /// Wall-clock time for the whole pipeline.
    pub runtime_ms: u64,
    /// Embedding cost in dollars.
    pub embedding_cost: f64,
    /// Rerank cost in dollars.
    pub rerank_cost: f64,
    /// Whether any token count above is an approximation.
    pub tokens_estimated: bool,
}

/// Scored outcome of one evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub search_text: String,
    pub expected_ids: BTreeSet<u64>,
    /// Returned ids in final rank order.
    pub found_ids: Vec<u64>,
    pub tokens_used: u64,
    pub rerank_tokens_used: u64,
    #[serde(default)]
    pub tokens_estimated: bool,
    pub runtime_ms: u64,
    #[serde(with = "cost_format")]
    pub embedding_cost: f64,
    #[serde(with = "cost_format")]
    pub rerank_cost: f64,
    pub recall_pct: f64,
    pub precision_pct: f64,
    /// Number of expected ids.
    pub expected_count: usize,
    /// Number of expected ids present in `found_ids`.
    pub found_count: usize,
    /// Length of `found_ids`.
    pub returned_count: usize,
}

impl QueryOutcome {
    /// Score a query's final result list and attach its usage figures.
    pub fn new(
        search_text: impl Into<String>,
        expected_ids: BTreeSet<u64>,
        found_ids: Vec<u64>,
        usage: QueryUsage,
    ) -> Self {
        let recall_pct = recall(&found_ids, &expected_ids);
        let precision_pct = precision(&found_ids, &expected_ids);
        let found_count = matched_count(&found_ids, &expected_ids);

        Self {
            search_text: search_text.into(),
            expected_count: expected_ids.len(),
            returned_count: found_ids.len(),
            found_count,
            expected_ids,
            found_ids,
            tokens_used: usage.tokens_used,
            rerank_tokens_used: usage.rerank_tokens_used,
            tokens_estimated: usage.tokens_estimated,
            runtime_ms: usage.runtime_ms,
            embedding_cost: usage.embedding_cost,
            rerank_cost: usage.rerank_cost,
            recall_pct,
            precision_pct,
        }
    }

    /// Combined embedding and rerank cost.
    pub fn total_cost(&self) -> f64 {
        self.embedding_cost + self.rerank_cost
    }

    /// Weight used by weighted averaging; empty expectations weigh 1.
    fn weight(&self) -> f64 {
        self.expected_count.max(1) as f64
    }
}

/// Recall and precision under one averaging strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AveragedMetrics {
    pub recall: f64,
    pub precision: f64,
}

/// Summary statistics over every recorded query of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub query_count: usize,
    pub total_tokens: u64,
    pub total_rerank_tokens: u64,
    pub total_runtime_ms: u64,
    #[serde(with = "cost_format")]
    pub total_embedding_cost: f64,
    #[serde(with = "cost_format")]
    pub total_rerank_cost: f64,
    #[serde(with = "cost_format")]
    pub total_cost: f64,
    pub micro: AveragedMetrics,
    #[serde(rename = "macro")]
    pub macro_avg: AveragedMetrics,
    pub weighted: AveragedMetrics,
}

/// Token/cost bookkeeping for index building.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub items_embedded: usize,
    pub total_tokens: u64,
    #[serde(with = "cost_format")]
    pub total_cost: f64,
    /// True if any recorded count was estimated rather than reported.
    pub tokens_estimated: bool,
}

/// Accumulator for one evaluation run.
///
/// History is append-only while the run is in progress. Callers that evaluate
/// queries concurrently must serialize [`MetricsEngine::record_query_outcome`]
/// (for example behind a `Mutex`).
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    outcomes: Vec<QueryOutcome>,
    generation: GenerationStats,
}

impl MetricsEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one query outcome to the history.
    pub fn record_query_outcome(&mut self, outcome: QueryOutcome) {
        self.outcomes.push(outcome);
    }

    /// Record tokens and cost spent embedding one corpus item.
    pub fn record_generation(&mut self, tokens: u64, cost: f64, estimated: bool) {
        self.generation.items_embedded += 1;
        self.generation.total_tokens += tokens;
        self.generation.total_cost += cost;
        self.generation.tokens_estimated |= estimated;
    }

    /// Recorded outcomes in insertion order.
    pub fn outcomes(&self) -> &[QueryOutcome] {
        &self.outcomes
    }

    /// Index-build bookkeeping so far.
    pub fn generation(&self) -> &GenerationStats {
        &self.generation
    }

    /// Number of recorded queries.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if no query has been recorded.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Compute the aggregate report from the full history.
    pub fn aggregate(&self) -> AggregateReport {
        aggregate_outcomes(&self.outcomes)
    }
}

/// Sum of `values` in ascending `total_cmp` order.
///
/// Float addition is not associative; sorting first makes the sum a function
/// of the multiset of values alone.
fn order_free_sum(values: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(f64::total_cmp);
    values.into_iter().sum()
}

/// Compute an [`AggregateReport`] from any collection of outcomes.
///
/// The result depends only on the multiset of outcomes, not their order.
pub fn aggregate_outcomes(outcomes: &[QueryOutcome]) -> AggregateReport {
    let mut report = AggregateReport {
        query_count: outcomes.len(),
        ..Default::default()
    };

    if outcomes.is_empty() {
        return report;
    }

    let mut pooled_expected = 0usize;
    let mut pooled_found = 0usize;
    let mut pooled_returned = 0usize;

    for outcome in outcomes {
        report.total_tokens += outcome.tokens_used;
        report.total_rerank_tokens += outcome.rerank_tokens_used;
        report.total_runtime_ms += outcome.runtime_ms;

        if outcome.expected_count == 0 {
            pooled_expected += 1;
            if outcome.returned_count == 0 {
                pooled_found += 1;
            }
            pooled_returned += outcome.returned_count.max(1);
        } else {
            pooled_expected += outcome.expected_count;
            pooled_found += outcome.found_count;
            pooled_returned += outcome.returned_count;
        }
    }

    let sum = |term: &dyn Fn(&QueryOutcome) -> f64| order_free_sum(outcomes.iter().map(term));

    report.total_embedding_cost = sum(&|o| o.embedding_cost);
    report.total_rerank_cost = sum(&|o| o.rerank_cost);
    report.total_cost = report.total_embedding_cost + report.total_rerank_cost;

    report.micro = AveragedMetrics {
        recall: percentage(pooled_found as f64, pooled_expected as f64),
        precision: percentage(pooled_found as f64, pooled_returned as f64),
    };

    let count = outcomes.len() as f64;
    report.macro_avg = AveragedMetrics {
        recall: (sum(&|o| o.recall_pct) / count).clamp(0.0, 100.0),
        precision: (sum(&|o| o.precision_pct) / count).clamp(0.0, 100.0),
    };

    let weight_sum = sum(&|o| o.weight());
    report.weighted = AveragedMetrics {
        recall: (sum(&|o| o.weight() * o.recall_pct) / weight_sum).clamp(0.0, 100.0),
        precision: (sum(&|o| o.weight() * o.precision_pct) / weight_sum).clamp(0.0, 100.0),
    };

    report
}
