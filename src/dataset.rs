//! Corpus and labeled query loading.
//!
//! Supports:
//! - A corpus JSON file: an array of `{id, title, description}` items, or an
//!   object with an `items` array
//! - A query set JSON file: `{name, queries: [{search_text, expected_ids}]}`
//!   or a bare array of queries
//! - A directory of query set files, merged in path order

use crate::error::{EvalError, Result};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// A reference corpus entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ContentItem {
    /// Unique identifier.
    pub id: u64,
    pub title: String,
    pub description: String,
}

impl ContentItem {
    /// Create a new item.
    pub fn new(id: u64, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Text embedded for this item at index-build time.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// The full set of items to index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    pub items: Vec<ContentItem>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    Items(Vec<ContentItem>),
    Wrapped { items: Vec<ContentItem> },
}

impl Corpus {
    /// Build a corpus, rejecting duplicate ids.
    pub fn new(items: Vec<ContentItem>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id) {
                return Err(EvalError::DuplicateId(item.id));
            }
        }
        Ok(Self { items })
    }

    /// Load from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(EvalError::DatasetNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let items = match serde_json::from_str::<CorpusFile>(&content)? {
            CorpusFile::Items(items) => items,
            CorpusFile::Wrapped { items } => items,
        };
        Self::new(items)
    }

    /// Number of items in the corpus.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One labeled test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalQuery {
    /// Free-text search query.
    #[serde(alias = "query")]
    pub search_text: String,
    /// Ids that a correct result must contain. May be empty.
    #[serde(default)]
    pub expected_ids: BTreeSet<u64>,
}

impl EvalQuery {
    /// Create a new query.
    pub fn new(search_text: impl Into<String>, expected_ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            search_text: search_text.into(),
            expected_ids: expected_ids.into_iter().collect(),
        }
    }
}

/// A named collection of queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySet {
    pub name: String,
    pub queries: Vec<EvalQuery>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryFile {
    Queries(Vec<EvalQuery>),
    Named {
        #[serde(default)]
        name: Option<String>,
        queries: Vec<EvalQuery>,
    },
}

impl QuerySet {
    /// Create a new empty query set.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queries: Vec::new(),
        }
    }

    /// Add a query.
    pub fn add_query(&mut self, query: EvalQuery) {
        self.queries.push(query);
    }

    /// Number of queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// The first `n` queries (for quick runs).
    pub fn take(&self, n: usize) -> Self {
        Self {
            name: self.name.clone(),
            queries: self.queries.iter().take(n).cloned().collect(),
        }
    }

    /// Load from a JSON file; the file stem names bare-array files.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("queries")
            .to_string();

        let set = match serde_json::from_str::<QueryFile>(&content)? {
            QueryFile::Queries(queries) => Self {
                name: stem,
                queries,
            },
            QueryFile::Named { name, queries } => Self {
                name: name.unwrap_or(stem),
                queries,
            },
        };
        Ok(set)
    }

    /// Load a file, or every `*.json` file under a directory.
    pub fn load(path: &Path) -> Result<Self> {
        if path.is_file() {
            return Self::load_json(path);
        }
        if !path.is_dir() {
            return Err(EvalError::DatasetNotFound(path.to_path_buf()));
        }

        let mut files: Vec<_> = WalkDir::new(path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("queries");
        let mut merged = Self::new(name);
        for file in files {
            merged.queries.extend(Self::load_json(&file)?.queries);
        }
        Ok(merged)
    }
}

/// A three-item corpus for smoke runs.
pub fn sample_corpus() -> Corpus {
    Corpus {
        items: vec![
            ContentItem::new(
                1,
                "Rust ownership",
                "How the borrow checker enforces memory safety without a garbage collector.",
            ),
            ContentItem::new(
                2,
                "Python for data science",
                "Using pandas and numpy to clean and analyze tabular data in Python.",
            ),
            ContentItem::new(
                3,
                "Sourdough baking",
                "Feeding a starter and shaping loaves for an open crumb.",
            ),
        ],
    }
}

/// Queries labeled against [`sample_corpus`].
pub fn sample_queries() -> QuerySet {
    let mut set = QuerySet::new("sample");
    set.add_query(EvalQuery::new("python", [2]));
    set.add_query(EvalQuery::new("memory safety in systems languages", [1]));
    set.add_query(EvalQuery::new("bread", [3]));
    set.add_query(EvalQuery {
        search_text: "quantum chromodynamics lecture notes".to_string(),
        expected_ids: BTreeSet::new(),
    });
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_duplicate_ids_rejected() {
        let items = vec![ContentItem::new(1, "a", "b"), ContentItem::new(1, "c", "d")];
        assert!(matches!(Corpus::new(items), Err(EvalError::DuplicateId(1))));
    }

    #[test]
    fn test_load_corpus_both_shapes() {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("bare.json");
        let wrapped = dir.path().join("wrapped.json");
        fs::write(&bare, r#"[{"id": 1, "title": "A", "description": "x"}]"#).unwrap();
        fs::write(
            &wrapped,
            r#"{"items": [{"id": 2, "title": "B", "description": "y"}]}"#,
        )
        .unwrap();

        assert_eq!(Corpus::load_json(&bare).unwrap().items[0].id, 1);
        assert_eq!(Corpus::load_json(&wrapped).unwrap().items[0].id, 2);
    }

    #[test]
    fn test_missing_corpus() {
        let result = Corpus::load_json(Path::new("/nonexistent/corpus.json"));
        assert!(matches!(result, Err(EvalError::DatasetNotFound(_))));
    }

    #[test]
    fn test_query_defaults_and_alias() {
        let query: EvalQuery = serde_json::from_str(r#"{"query": "rust"}"#).unwrap();
        assert_eq!(query.search_text, "rust");
        assert!(query.expected_ids.is_empty());
    }

    #[test]
    fn test_load_query_directory_in_path_order() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("b.json"),
            r#"[{"search_text": "second", "expected_ids": [2]}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"{"name": "first", "queries": [{"search_text": "first", "expected_ids": [1, 1]}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = QuerySet::load(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.queries[0].search_text, "first");
        assert_eq!(set.queries[0].expected_ids.len(), 1);
        assert_eq!(set.queries[1].search_text, "second");
    }

    #[test]
    fn test_sample_data_is_consistent() {
        let corpus = sample_corpus();
        let ids: HashSet<u64> = corpus.items.iter().map(|i| i.id).collect();
        for query in sample_queries().queries {
            assert!(query.expected_ids.iter().all(|id| ids.contains(id)));
        }
        assert_eq!(sample_queries().take(2).len(), 2);
    }
}
