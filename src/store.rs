//! Local vector store with exact cosine search.
//!
//! [`FlatStore`] scores every stored vector on each query. That is plenty for
//! evaluation corpora of a few thousand items; nothing here tries to be an
//! approximate index.

use crate::dataset::ContentItem;
use crate::error::{EvalError, Result};
use crate::shaping::Candidate;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Summary of a store's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub item_count: usize,
    pub dimension: Option<usize>,
    /// Embedding model the vectors were produced with, if recorded.
    pub model: Option<String>,
}

/// Nearest-neighbor storage for corpus vectors.
pub trait VectorStore {
    /// Store a vector with its item. Re-inserting an id replaces the old entry.
    fn insert(&mut self, vector: Vec<f32>, item: ContentItem) -> Result<()>;

    /// Up to `k` candidates ordered by descending similarity.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>>;

    /// Current contents summary.
    fn stats(&self) -> StoreStats;
}

/// Compute cosine similarity between two vectors.
///
/// Mismatched lengths, zero vectors and non-finite results score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(dot, na, nb), (&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            (dot + x * y, na + x * x, nb + y * y)
        },
    );

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if norm_a == 0.0 || norm_b == 0.0 || !similarity.is_finite() {
        0.0
    } else {
        similarity.clamp(-1.0, 1.0)
    }
}

/// A stored item and its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct StoredItem {
    pub item: ContentItem,
    pub vector: Vec<f32>,
}

/// In-memory exact-search store, persisted with [`crate::persistence`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, Encode, Decode)]
pub struct FlatStore {
    #[serde(default)]
    model: Option<String>,
    entries: Vec<StoredItem>,
}

impl FlatStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that records which model produced its vectors.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            entries: Vec::new(),
        }
    }

    /// Embedding model recorded at creation.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All stored entries in insertion order.
    pub fn entries(&self) -> &[StoredItem] {
        &self.entries
    }

    /// Look up an item by id.
    pub fn get(&self, id: u64) -> Option<&ContentItem> {
        self.entries.iter().map(|e| &e.item).find(|item| item.id == id)
    }

    fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.vector.len())
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(EvalError::Store("Empty vector".to_string()));
        }
        match self.dimension() {
            Some(expected) if expected != len => Err(EvalError::Store(format!(
                "Dimension mismatch: store holds {}-d vectors, got {}",
                expected, len
            ))),
            _ => Ok(()),
        }
    }
}

impl VectorStore for FlatStore {
    fn insert(&mut self, vector: Vec<f32>, item: ContentItem) -> Result<()> {
        self.check_dimension(vector.len())?;

        let entry = StoredItem { item, vector };
        match self.entries.iter_mut().find(|e| e.item.id == entry.item.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(vector.len())?;

        let mut results: Vec<Candidate> = self
            .entries
            .iter()
            .map(|entry| Candidate::from_item(&entry.item, cosine_similarity(vector, &entry.vector)))
            .collect();

        // Sort by score descending; stable, so ties keep insertion order
        results.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        results.truncate(k);

        Ok(results)
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            item_count: self.entries.len(),
            dimension: self.dimension(),
            model: self.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64) -> ContentItem {
        ContentItem::new(id, format!("Title {id}"), format!("Description {id}"))
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-9);
        assert!((cosine_similarity(&a, &[-2.0, 0.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_query_orders_by_similarity() {
        let mut store = FlatStore::new();
        store.insert(vec![0.0, 1.0], item(1)).unwrap();
        store.insert(vec![1.0, 0.0], item(2)).unwrap();
        store.insert(vec![1.0, 1.0], item(3)).unwrap();

        let results = store.query(&[1.0, 0.0], 2).unwrap();
        let ids: Vec<u64> = results.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!((results[0].similarity_score - 1.0).abs() < 1e-9);
        assert_eq!(results[0].title, "Title 2");
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut store = FlatStore::new();
        for id in [5, 3, 9] {
            store.insert(vec![1.0, 0.0], item(id)).unwrap();
        }
        let ids: Vec<u64> = store
            .query(&[1.0, 0.0], 3)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let mut store = FlatStore::new();
        store.insert(vec![1.0, 0.0], item(1)).unwrap();
        store
            .insert(vec![0.0, 1.0], ContentItem::new(1, "Renamed", ""))
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1).unwrap().title, "Renamed");
    }

    #[test]
    fn test_dimension_mismatch_is_store_error() {
        let mut store = FlatStore::new();
        store.insert(vec![1.0, 0.0], item(1)).unwrap();

        assert!(matches!(
            store.insert(vec![1.0, 0.0, 0.0], item(2)),
            Err(EvalError::Store(_))
        ));
        assert!(matches!(store.query(&[1.0], 3), Err(EvalError::Store(_))));
        assert!(matches!(store.insert(Vec::new(), item(3)), Err(EvalError::Store(_))));
    }

    #[test]
    fn test_stats() {
        let mut store = FlatStore::for_model("voyage-3-lite");
        assert_eq!(store.stats().dimension, None);
        store.insert(vec![0.5; 4], item(1)).unwrap();

        let stats = store.stats();
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.dimension, Some(4));
        assert_eq!(stats.model.as_deref(), Some("voyage-3-lite"));
    }

    #[test]
    fn test_nan_vectors_score_zero_and_sort_safely() {
        let mut store = FlatStore::new();
        store.insert(vec![f32::NAN, 1.0], item(1)).unwrap();
        store.insert(vec![1.0, 0.0], item(2)).unwrap();
        store.insert(vec![-1.0, 0.0], item(3)).unwrap();

        let results = store.query(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<u64> = results.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(results[1].similarity_score, 0.0);
        assert!(store.query(&[f32::NAN, 0.0], 3).unwrap().iter().all(|c| c.similarity_score == 0.0));
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let store = FlatStore::new();
        assert!(store.query(&[1.0, 0.0], 5).unwrap().is_empty());
    }
}
