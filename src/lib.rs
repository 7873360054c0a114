//! Retrieval Eval - measure how well an embedding pipeline finds the right content.
//!
//! A corpus of content items is embedded into a local vector store. Labeled
//! queries are then run through retrieval (optionally followed by a
//! cross-encoder rerank), and the returned ids are scored against the
//! expected ids with recall and precision, aggregated micro, macro and
//! weighted.
//!
//! # Quick Start
//!
//! ```no_run
//! use retrieval_eval::{
//!     config::Config,
//!     dataset::{Corpus, QuerySet},
//!     evaluator::{EvalSettings, Evaluator},
//!     persistence::save_json,
//!     providers::{build_embedder, build_reranker},
//!     store::FlatStore,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let embedder = build_embedder(&config.embedding)?;
//!     let reranker = build_reranker(config.rerank.as_ref());
//!     let store = FlatStore::for_model(embedder.model());
//!
//!     let mut evaluator =
//!         Evaluator::new(embedder, reranker, store, EvalSettings::from_config(&config));
//!
//!     // Embed the corpus, then evaluate the labeled queries
//!     let corpus = Corpus::load_json(Path::new("corpus.json"))?;
//!     evaluator.build_index(&corpus.items).await?;
//!
//!     let queries = QuerySet::load(Path::new("queries"))?;
//!     evaluator.run(&queries.queries).await?;
//!
//!     let report = evaluator.report();
//!     report.print_summary();
//!     save_json(&report, Path::new("report.json"))?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **MetricsEngine**: per-query recall/precision and run aggregation
//! - **Result shaping**: threshold partition, rerank merge, top-k limiting
//! - **Evaluator**: the per-query pipeline and index building
//! - **Providers**: embedding and rerank vendors behind two traits
//! - **FlatStore**: exact cosine vector store with JSON/bincode persistence

pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod persistence;
pub mod providers;
pub mod shaping;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use dataset::{ContentItem, Corpus, EvalQuery, QuerySet};
pub use error::{EvalError, Result};
pub use evaluator::{EvalSettings, EvaluationReport, Evaluator, QueryRecord};
pub use metrics::{AggregateReport, MetricsEngine, QueryOutcome};
pub use persistence::{load_store, save_store};
pub use providers::{EmbeddingProvider, RerankProvider};
pub use store::{FlatStore, VectorStore};
pub use validation::{ValidationResult, validate_results};
