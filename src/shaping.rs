//! Turning raw nearest-neighbor candidates into final result sets.
//!
//! Candidates are split at a similarity threshold into results that count and
//! a short below-threshold list kept only for display. When a reranker is
//! active its relevance scores replace the similarity scores for that split.

use crate::dataset::ContentItem;
use serde::{Deserialize, Serialize};

/// Number of results kept when no threshold is set.
pub const DEFAULT_TOP_K: usize = 3;

/// Maximum below-threshold candidates kept for diagnostics.
pub const BELOW_THRESHOLD_DISPLAY_LIMIT: usize = 3;

/// Maximum candidates sent to the reranker per query.
pub const RERANK_CANDIDATE_LIMIT: usize = 10;

/// Smallest retrieval pool requested when reranking.
const MIN_RERANK_POOL: usize = 20;

/// Anything ranked by a single score, higher is better.
pub trait Scored {
    /// Score used for threshold checks.
    fn score(&self) -> f64;
}

/// A nearest-neighbor hit for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u64,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity_score: f64,
    pub title: String,
    pub description: String,
}

impl Candidate {
    /// Build a candidate from a corpus item and its similarity to the query.
    pub fn from_item(item: &ContentItem, similarity_score: f64) -> Self {
        Self {
            id: item.id,
            similarity_score,
            title: item.title.clone(),
            description: item.description.clone(),
        }
    }

    /// Text sent to the reranker for this candidate.
    pub fn rerank_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

impl Scored for Candidate {
    fn score(&self) -> f64 {
        self.similarity_score
    }
}

/// A candidate rescored by the reranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedCandidate {
    pub id: u64,
    pub title: String,
    pub description: String,
    /// Cross-encoder relevance; supersedes similarity for ordering.
    pub relevance_score: f64,
    /// Similarity from the retrieval stage, kept for display.
    pub original_similarity_score: f64,
    pub was_reranked: bool,
}

impl RerankedCandidate {
    /// Attach a reranker relevance score to a retrieval candidate.
    pub fn from_candidate(candidate: &Candidate, relevance_score: f64) -> Self {
        Self {
            id: candidate.id,
            title: candidate.title.clone(),
            description: candidate.description.clone(),
            relevance_score,
            original_similarity_score: candidate.similarity_score,
            was_reranked: true,
        }
    }
}

impl Scored for RerankedCandidate {
    fn score(&self) -> f64 {
        self.relevance_score
    }
}

/// One row of a shaped result list, whichever stage produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub id: u64,
    /// Relevance score when reranked, similarity otherwise.
    pub score: f64,
    /// Retrieval similarity, present only for reranked rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_score: Option<f64>,
    pub title: String,
    pub description: String,
}

impl From<Candidate> for RankedResult {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            score: candidate.similarity_score,
            original_score: None,
            title: candidate.title,
            description: candidate.description,
        }
    }
}

impl From<RerankedCandidate> for RankedResult {
    fn from(candidate: RerankedCandidate) -> Self {
        Self {
            id: candidate.id,
            score: candidate.relevance_score,
            original_score: Some(candidate.original_similarity_score),
            title: candidate.title,
            description: candidate.description,
        }
    }
}

/// Candidates split at a score threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition<T> {
    /// Candidates with `score >= min_similarity`, in input order.
    pub above_threshold: Vec<T>,
    /// At most [`BELOW_THRESHOLD_DISPLAY_LIMIT`] rejected candidates, in input order.
    pub below_threshold: Vec<T>,
}

impl<T> Partition<T> {
    /// Convert both halves into another row type.
    pub fn convert<U: From<T>>(self) -> Partition<U> {
        Partition {
            above_threshold: self.above_threshold.into_iter().map(U::from).collect(),
            below_threshold: self.below_threshold.into_iter().map(U::from).collect(),
        }
    }
}

fn partition_by_score<T: Scored + Clone>(items: &[T], min_similarity: f64) -> Partition<T> {
    let (above_threshold, mut below_threshold): (Vec<T>, Vec<T>) = items
        .iter()
        .cloned()
        .partition(|item| item.score() >= min_similarity);
    below_threshold.truncate(BELOW_THRESHOLD_DISPLAY_LIMIT);

    Partition {
        above_threshold,
        below_threshold,
    }
}

/// Split retrieval candidates on their similarity score.
///
/// A non-positive `min_similarity` still partitions; with cosine scores the
/// check is then almost always true.
pub fn apply_threshold(candidates: &[Candidate], min_similarity: f64) -> Partition<Candidate> {
    partition_by_score(candidates, min_similarity)
}

/// Split reranked candidates on their relevance score.
pub fn merge_reranked_results(
    reranked: &[RerankedCandidate],
    min_similarity: f64,
) -> Partition<RerankedCandidate> {
    partition_by_score(reranked, min_similarity)
}

/// Cut the above-threshold list down to the final result set.
///
/// In threshold mode (`min_similarity > 0`) every above-threshold result is
/// kept; otherwise the first `top_k` are.
pub fn limit_results<T>(mut above_threshold: Vec<T>, min_similarity: f64, top_k: usize) -> Vec<T> {
    if min_similarity <= 0.0 {
        above_threshold.truncate(top_k);
    }
    above_threshold
}

/// Number of candidates to request from the vector store.
pub fn retrieval_pool_size(top_k: usize, reranking: bool) -> usize {
    if reranking {
        top_k.saturating_mul(10).max(MIN_RERANK_POOL)
    } else {
        top_k.saturating_mul(3)
    }
}

/// The leading candidates that are sent to the reranker.
pub fn rerank_batch(candidates: &[Candidate]) -> &[Candidate] {
    &candidates[..candidates.len().min(RERANK_CANDIDATE_LIMIT)]
}

/// Pick the partition for a query.
///
/// `reranked` is `None` when reranking is disabled or the rerank call failed;
/// the similarity partition of `candidates` is then used unmodified.
pub fn shape_results(
    candidates: &[Candidate],
    reranked: Option<&[RerankedCandidate]>,
    min_similarity: f64,
) -> Partition<RankedResult> {
    match reranked {
        Some(reranked) => merge_reranked_results(reranked, min_similarity).convert(),
        None => apply_threshold(candidates, min_similarity).convert(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u64, score: f64) -> Candidate {
        Candidate {
            id,
            similarity_score: score,
            title: format!("Item {id}"),
            description: String::new(),
        }
    }

    fn ids<T>(rows: &[T], id: impl Fn(&T) -> u64) -> Vec<u64> {
        rows.iter().map(id).collect()
    }

    #[test]
    fn test_threshold_partition() {
        let candidates = vec![
            candidate(1, 0.8),
            candidate(2, 0.6),
            candidate(3, 0.3),
            candidate(4, 0.1),
        ];
        let partition = apply_threshold(&candidates, 0.5);

        assert_eq!(ids(&partition.above_threshold, |c| c.id), vec![1, 2]);
        assert_eq!(ids(&partition.below_threshold, |c| c.id), vec![3, 4]);
    }

    #[test]
    fn test_below_threshold_truncated_to_three() {
        let candidates: Vec<_> = (1..=6).map(|id| candidate(id, 0.1)).collect();
        let partition = apply_threshold(&candidates, 0.5);

        assert!(partition.above_threshold.is_empty());
        assert_eq!(ids(&partition.below_threshold, |c| c.id), vec![1, 2, 3]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let partition = apply_threshold(&[candidate(1, 0.5)], 0.5);
        assert_eq!(partition.above_threshold.len(), 1);
    }

    #[test]
    fn test_zero_threshold_still_partitions() {
        let candidates = vec![candidate(1, 0.2), candidate(2, -0.3)];
        let partition = apply_threshold(&candidates, 0.0);

        assert_eq!(ids(&partition.above_threshold, |c| c.id), vec![1]);
        assert_eq!(ids(&partition.below_threshold, |c| c.id), vec![2]);
    }

    #[test]
    fn test_limit_results_modes() {
        let above: Vec<u64> = (1..=8).collect();

        assert_eq!(limit_results(above.clone(), 0.4, 3), above);
        assert_eq!(limit_results(above.clone(), 0.0, 3), vec![1, 2, 3]);
        assert_eq!(limit_results(above, -1.0, DEFAULT_TOP_K).len(), 3);
    }

    #[test]
    fn test_pool_size() {
        assert_eq!(retrieval_pool_size(3, false), 9);
        assert_eq!(retrieval_pool_size(3, true), 30);
        assert_eq!(retrieval_pool_size(1, true), 20);
        assert_eq!(retrieval_pool_size(5, true), 50);
        assert_eq!(retrieval_pool_size(usize::MAX, true), usize::MAX);
        assert_eq!(retrieval_pool_size(usize::MAX / 2, false), usize::MAX);
    }

    #[test]
    fn test_rerank_batch_caps_at_ten() {
        let candidates: Vec<_> = (0..25).map(|id| candidate(id, 0.5)).collect();
        assert_eq!(rerank_batch(&candidates).len(), RERANK_CANDIDATE_LIMIT);
        assert_eq!(rerank_batch(&candidates[..4]).len(), 4);
    }

    #[test]
    fn test_merge_reranked_uses_relevance_score() {
        let reranked = vec![
            RerankedCandidate::from_candidate(&candidate(3, 0.2), 0.95),
            RerankedCandidate::from_candidate(&candidate(1, 0.9), 0.7),
            RerankedCandidate::from_candidate(&candidate(2, 0.8), 0.1),
        ];
        let partition = merge_reranked_results(&reranked, 0.5);

        assert_eq!(ids(&partition.above_threshold, |c| c.id), vec![3, 1]);
        assert_eq!(partition.above_threshold[0].original_similarity_score, 0.2);
        assert_eq!(ids(&partition.below_threshold, |c| c.id), vec![2]);
    }

    #[test]
    fn test_rerank_failure_falls_back_to_similarity_partition() {
        let candidates = vec![
            candidate(1, 0.8),
            candidate(2, 0.6),
            candidate(3, 0.3),
            candidate(4, 0.1),
        ];

        let shaped = shape_results(&candidates, None, 0.5);
        let expected: Partition<RankedResult> = apply_threshold(&candidates, 0.5).convert();
        assert_eq!(shaped, expected);
        assert!(shaped.above_threshold.iter().all(|r| r.original_score.is_none()));
    }

    #[test]
    fn test_reranked_rows_keep_original_score() {
        let candidates = vec![candidate(1, 0.4)];
        let reranked = vec![RerankedCandidate::from_candidate(&candidates[0], 0.9)];

        let shaped = shape_results(&candidates, Some(&reranked), 0.5);
        assert_eq!(shaped.above_threshold[0].score, 0.9);
        assert_eq!(shaped.above_threshold[0].original_score, Some(0.4));
    }
}
