//! Retrieval Eval CLI
//!
//! Build a vector store from a corpus and run ad-hoc searches against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retrieval_eval::{
    config::Config,
    dataset::Corpus,
    evaluator::{EvalSettings, Evaluator, check_settings},
    persistence::{DEFAULT_STORE_PATH, file_size, load_store, save_store, store_exists},
    providers::{EmbedPurpose, build_embedder, build_reranker},
    shaping::RankedResult,
    store::{FlatStore, VectorStore},
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Retrieval Eval - embed a corpus and search it
#[derive(Parser)]
#[command(name = "retrieval-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log pipeline progress
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a corpus JSON file into a vector store
    Index {
        /// Path to the corpus file
        corpus: PathBuf,

        /// Output path for the store (.bin or .json)
        #[arg(short, long, default_value = DEFAULT_STORE_PATH)]
        store: PathBuf,
    },

    /// Search a vector store
    Search {
        /// The search query
        query: String,

        /// Path to the store file
        #[arg(short, long, default_value = DEFAULT_STORE_PATH)]
        store: PathBuf,

        /// Number of results to return in top-k mode
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Keep every result scoring at least this much
        #[arg(long)]
        min_similarity: Option<f64>,

        /// Skip the reranker even if one is configured
        #[arg(long)]
        no_rerank: bool,
    },

    /// Show information about a store
    Stats {
        /// Path to the store file
        #[arg(default_value = DEFAULT_STORE_PATH)]
        store: PathBuf,
    },

    /// Validate configuration and test the embedding provider
    Check,
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

    match cli.command {
        Commands::Index { corpus, store } => cmd_index(corpus, store).await,
        Commands::Search {
            query,
            store,
            top_k,
            min_similarity,
            no_rerank,
        } => cmd_search(query, store, top_k, min_similarity, no_rerank).await,
        Commands::Stats { store } => cmd_stats(store),
        Commands::Check => cmd_check().await,
    }
}

async fn cmd_index(corpus_path: PathBuf, output: PathBuf) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let corpus = Corpus::load_json(&corpus_path).context("Failed to load corpus")?;
    println!(
        "Indexing {} items from {}",
        corpus.len(),
        corpus_path.display()
    );
    println!("Using model: {}", config.embedding.model);

    let start = Instant::now();

    let embedder = build_embedder(&config.embedding)?;
    let store = FlatStore::for_model(embedder.model());
    let mut evaluator = Evaluator::new(embedder, None, store, EvalSettings::from_config(&config));

    evaluator
        .build_index(&corpus.items)
        .await
        .context("Failed to build index")?;

    let generation = evaluator.metrics().generation().clone();
    let store = evaluator.into_store();
    let stats = store.stats();

    println!("\nIndex Built:");
    println!("  Items:       {}", stats.item_count);
    println!("  Dimension:   {}", stats.dimension.unwrap_or(0));
    println!(
        "  Tokens:      {}{}",
        generation.total_tokens,
        if generation.tokens_estimated {
            " (estimated)"
        } else {
            ""
        }
    );
    println!("  Cost:        ${:.8}", generation.total_cost);
    println!("  Build time:  {:.2?}", start.elapsed());

    save_store(&store, &output).context("Failed to save store")?;

    let size = file_size(&output)?;
    println!("\nStore saved to: {}", output.display());
    println!("  File size: {:.1} KB", size as f64 / 1024.0);

    Ok(())
}

async fn cmd_search(
    query: String,
    store_path: PathBuf,
    top_k: Option<usize>,
    min_similarity: Option<f64>,
    no_rerank: bool,
) -> Result<()> {
    if !store_exists(&store_path) {
        anyhow::bail!(
            "Store not found at '{}'. Run 'index' command first.",
            store_path.display()
        );
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    if no_rerank {
        config.rerank = None;
    }
    config.validate().context("Invalid configuration")?;

    let mut settings = EvalSettings::from_config(&config);
    if let Some(top_k) = top_k {
        settings.top_k = top_k;
    }
    if let Some(min_similarity) = min_similarity {
        settings.min_similarity = min_similarity;
    }
    check_settings(&settings).context("Invalid search settings")?;

    let store = load_store(&store_path).context("Failed to load store")?;
    let embedder = build_embedder(&config.embedding)?;
    if let Some(model) = store.model().filter(|m| *m != embedder.model()) {
        warn!(
            store_model = model,
            query_model = embedder.model(),
            "store was built with a different embedding model"
        );
    }

    let reranker = build_reranker(config.rerank.as_ref());
    let evaluator = Evaluator::new(embedder, reranker, store, settings);

    println!("Searching for: \"{}\"", query);
    println!();

    let start = Instant::now();
    let results = evaluator.search(&query).await.context("Search failed")?;
    let search_duration = start.elapsed();

    if results.results.is_empty() {
        println!("No results above the threshold.");
    } else {
        println!("Results{}:", if results.reranked { " (reranked)" } else { "" });
        println!("{}", "─".repeat(60));
        for (i, result) in results.results.iter().enumerate() {
            print_result(i + 1, result);
        }
        println!("{}", "─".repeat(60));
    }

    if !results.below_threshold.is_empty() {
        println!("Below threshold:");
        for (i, result) in results.below_threshold.iter().enumerate() {
            print_result(i + 1, result);
        }
    }

    println!(
        "Found {} results from {} candidates in {:.2?}",
        results.results.len(),
        results.candidates_retrieved,
        search_duration
    );

    Ok(())
}

fn print_result(rank: usize, result: &RankedResult) {
    match result.original_score {
        Some(original) => println!(
            "{:>2}. [{}] {} (relevance {:.3}, similarity {:.3})",
            rank, result.id, result.title, result.score, original
        ),
        None => println!(
            "{:>2}. [{}] {} (similarity {:.3})",
            rank, result.id, result.title, result.score
        ),
    }
    if !result.description.is_empty() {
        let preview: String = result.description.chars().take(120).collect();
        println!("    {}", preview);
    }
}

fn cmd_stats(store_path: PathBuf) -> Result<()> {
    if !store_exists(&store_path) {
        anyhow::bail!(
            "Store not found at '{}'. Run 'index' command first.",
            store_path.display()
        );
    }

    let store = load_store(&store_path).context("Failed to load store")?;
    let stats = store.stats();
    let size = file_size(&store_path)?;

    println!("Vector Store Information");
    println!("{}", "─".repeat(40));
    println!("  Items:        {}", stats.item_count);
    match stats.dimension {
        Some(dimension) => println!("  Dimension:    {}", dimension),
        None => println!("  Dimension:    (empty)"),
    }
    println!(
        "  Model:        {}",
        stats.model.as_deref().unwrap_or("(unknown)")
    );
    println!("  File size:    {:.1} KB", size as f64 / 1024.0);
    println!("  Store path:   {}", store_path.display());

    Ok(())
}

async fn cmd_check() -> Result<()> {
    println!("Checking embedding provider...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  Provider:  {}", config.embedding.provider);
    println!("  Model:     {}", config.embedding.model);
    println!("  API Base:  {}", config.embedding.resolved_api_base());
    println!(
        "  API Key:   {}...",
        config.embedding.api_key.chars().take(8).collect::<String>()
    );
    match &config.rerank {
        Some(rerank) => println!("  Reranker:  {} ({})", rerank.provider, rerank.model),
        None => println!("  Reranker:  (none)"),
    }
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let embedder = build_embedder(&config.embedding)?;

    println!("Sending test request...");
    match embedder.embed("connection test", EmbedPurpose::Query).await {
        Ok(embedding) => {
            println!(
                "Connection successful! ({} dimensions, {} tokens)",
                embedding.vector.len(),
                embedding.tokens.count
            );
        }
        Err(e) => {
            println!("Connection failed: {}", e);
        }
    }

    Ok(())
}
