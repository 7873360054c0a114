//! Evaluation CLI binary for scoring retrieval against labeled queries.
//!
//! Usage:
//!   eval run <queries> --store <path>   # Evaluate a query file or directory
//!   eval sample                         # Index and evaluate the built-in sample
//!
//! Options:
//!   --top-k <N>              # Results kept in top-k mode (default: config)
//!   --min-similarity <S>     # Threshold mode: keep every result scoring >= S
//!   --no-rerank              # Skip the configured reranker
//!   --max-queries <N>        # Limit number of queries
//!   --continue-on-error      # Skip queries whose provider call fails
//!   --verbose                # Log each query
//!   --output <path>          # Save the report to a JSON file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retrieval_eval::config::Config;
use retrieval_eval::dataset::{QuerySet, sample_corpus, sample_queries};
use retrieval_eval::evaluator::{EvalSettings, EvaluationReport, Evaluator, check_settings};
use retrieval_eval::persistence::{DEFAULT_STORE_PATH, load_store, save_json};
use retrieval_eval::providers::{build_embedder, build_reranker};
use retrieval_eval::store::{FlatStore, VectorStore};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eval")]
#[command(about = "Score retrieval quality against labeled queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Maximum number of queries to evaluate
    #[arg(long, global = true)]
    max_queries: Option<usize>,

    /// Number of results kept when no threshold is set
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Keep every result scoring at least this much
    #[arg(long, global = true)]
    min_similarity: Option<f64>,

    /// Skip the configured reranker
    #[arg(long, global = true)]
    no_rerank: bool,

    /// Skip queries whose provider call fails instead of stopping
    #[arg(long, global = true)]
    continue_on_error: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Save the report to a JSON file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate queries against an existing store
    Run {
        /// Query file, or directory of query files
        queries: PathBuf,

        /// Path to the store built by `retrieval-eval index`
        #[arg(short, long, default_value = DEFAULT_STORE_PATH)]
        store: PathBuf,
    },

    /// Index the built-in three-item corpus in memory and evaluate it
    Sample,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "info" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::load().context("Failed to load configuration")?;
    if cli.no_rerank {
        config.rerank = None;
    }
    config.validate().context("Invalid configuration")?;

    let mut settings = EvalSettings::from_config(&config);
    if let Some(top_k) = cli.top_k {
        settings.top_k = top_k;
    }
    if let Some(min_similarity) = cli.min_similarity {
        settings.min_similarity = min_similarity;
    }
    check_settings(&settings).context("Invalid evaluation settings")?;

    println!("Embedding model: {}", config.embedding.model);
    if let Some(rerank) = &config.rerank {
        println!("Rerank model:    {}", rerank.model);
    }

    let embedder = build_embedder(&config.embedding)?;
    let reranker = build_reranker(config.rerank.as_ref());

    let report = match &cli.command {
        Commands::Run { queries, store } => {
            let queries = QuerySet::load(queries)
                .with_context(|| format!("Failed to load queries from {}", queries.display()))?;
            let store = load_store(store).context("Failed to load store")?;
            if let Some(model) = store.model().filter(|m| *m != embedder.model()) {
                warn!(
                    store_model = model,
                    query_model = embedder.model(),
                    "store was built with a different embedding model"
                );
            }
            println!(
                "Store: {} items, queries: {} ({})",
                store.stats().item_count,
                queries.name,
                queries.len()
            );

            let mut evaluator = Evaluator::new(embedder, reranker, store, settings);
            evaluate(&mut evaluator, &queries, &cli).await?
        }
        Commands::Sample => {
            println!("Using sample corpus...");
            let corpus = sample_corpus();
            let store = FlatStore::for_model(embedder.model());

            let mut evaluator = Evaluator::new(embedder, reranker, store, settings);
            evaluator
                .build_index(&corpus.items)
                .await
                .context("Failed to index sample corpus")?;
            evaluate(&mut evaluator, &sample_queries(), &cli).await?
        }
    };

    report.print_summary();

    if let Some(output_path) = &cli.output {
        save_json(&report, output_path).context("Failed to save report")?;
        println!("Report saved to {}", output_path.display());
    }

    Ok(())
}

async fn evaluate<S: VectorStore>(
    evaluator: &mut Evaluator<S>,
    queries: &QuerySet,
    cli: &Cli,
) -> Result<EvaluationReport> {
    let queries = match cli.max_queries {
        Some(n) => queries.take(n),
        None => queries.clone(),
    };

    if cli.continue_on_error {
        evaluator.run_skipping_failures(&queries.queries).await?;
    } else {
        evaluator
            .run(&queries.queries)
            .await
            .context("Evaluation stopped; use --continue-on-error to skip failing queries")?;
    }

    let report = evaluator.report();
    for record in &report.queries {
        let mark = if record.validation.is_valid { "ok " } else { "MISS" };
        println!(
            "[{}] {:<40} found {:?}  recall {:.0}%  precision {:.0}%",
            mark,
            truncate(&record.outcome.search_text, 40),
            record.outcome.found_ids,
            record.outcome.recall_pct,
            record.outcome.precision_pct
        );
        if !record.validation.is_valid {
            println!("       {}", record.validation.message);
        }
    }
    Ok(report)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(max - 3).collect();
        short.push_str("...");
        short
    }
}
