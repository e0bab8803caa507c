use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use groundwork_common::{Channel, Config};
use groundwork_pipeline::pipeline::{Pipeline, RunOptions, Stage};
use groundwork_store::Store;

#[derive(Parser)]
#[command(
    name = "groundwork",
    about = "Staged research pipeline: generate, retrieve, assess, filter, extract"
)]
struct Cli {
    /// Research topic to investigate
    #[arg(long, required_unless_present_any = ["status", "clear_db"])]
    topic: Option<String>,

    /// Load queries from a saved JSON document instead of generating
    #[arg(long)]
    queries_file: Option<PathBuf>,

    /// Comma-separated stages to run (default: all five, in order)
    #[arg(long)]
    stages: Option<String>,

    /// Comma-separated channels to search
    #[arg(long, default_value = "web,academic")]
    channels: String,

    /// Queries to request from the generator
    #[arg(long, default_value_t = 8)]
    query_count: usize,

    /// Breadth hint forwarded to the query generator
    #[arg(long, default_value_t = 3)]
    exploration_budget: u32,

    /// Cap on queries used this run
    #[arg(long)]
    max_queries: Option<usize>,

    /// Hits requested per (query, provider) pair
    #[arg(long, default_value_t = 10)]
    per_query_limit: usize,

    /// Assessment batch size
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Percent of assessed web resources to select
    #[arg(long, default_value_t = 10.0)]
    web_percent: f64,

    /// Percent of assessed academic resources to select
    #[arg(long, default_value_t = 10.0)]
    academic_percent: f64,

    /// Composite floor; resources scoring below it are never selected
    #[arg(long)]
    min_composite: Option<f64>,

    /// Concurrent (query, provider) searches
    #[arg(long, default_value_t = 4)]
    retrieval_concurrency: usize,

    /// Concurrent scoring calls inside a batch
    #[arg(long, default_value_t = 4)]
    scoring_concurrency: usize,

    /// Concurrent content fetches
    #[arg(long, default_value_t = 8)]
    extraction_concurrency: usize,

    /// Regenerate queries even when the topic already has stored ones
    #[arg(long)]
    force_generate: bool,

    /// Re-score resources that already have assessments
    #[arg(long)]
    force_reassess: bool,

    /// Clear failed extraction rows so they are re-attempted
    #[arg(long)]
    retry_failed_extractions: bool,

    /// Print store counts and exit
    #[arg(long)]
    status: bool,

    /// Delete all rows from the store (requires --yes)
    #[arg(long)]
    clear_db: bool,

    /// Confirm destructive operations
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("groundwork=info".parse()?))
        .init();

    info!("Groundwork pipeline starting...");
    let cli = Cli::parse();

    if cli.status {
        let config = Config::store_from_env();
        let store = Store::connect(&config.database_path).await?;
        let counts = store.status_counts().await?;
        println!("{counts}");
        return Ok(());
    }

    if cli.clear_db {
        anyhow::ensure!(cli.yes, "--clear-db is destructive, pass --yes to confirm");
        let config = Config::store_from_env();
        let store = Store::connect(&config.database_path).await?;
        store.clear_all().await?;
        info!("Store cleared");
        if cli.topic.is_none() {
            return Ok(());
        }
    }

    let Some(topic) = cli.topic.clone() else {
        return Ok(());
    };
    let stages = parse_stages(cli.stages.as_deref())?;
    let channels = parse_channels(&cli.channels)?;

    let config = Config::from_env();
    let store = Store::connect(&config.database_path).await?;

    let options = RunOptions {
        topic,
        queries_file: cli.queries_file,
        query_count: cli.query_count,
        exploration_budget: cli.exploration_budget,
        max_queries: cli.max_queries,
        channels,
        per_query_limit: cli.per_query_limit,
        batch_size: cli.batch_size,
        web_percent: cli.web_percent,
        academic_percent: cli.academic_percent,
        min_composite: cli.min_composite,
        retrieval_concurrency: cli.retrieval_concurrency,
        scoring_concurrency: cli.scoring_concurrency,
        extraction_concurrency: cli.extraction_concurrency,
        force_generate: cli.force_generate,
        force_reassess: cli.force_reassess,
        retry_failed_extractions: cli.retry_failed_extractions,
    };

    let pipeline = Pipeline::new(store, &config, options);
    let stats = pipeline.run_stages(&stages).await?;
    info!("Pipeline run complete. {stats}");

    Ok(())
}

fn parse_stages(list: Option<&str>) -> Result<Vec<Stage>> {
    let Some(list) = list else {
        return Ok(Stage::ALL.to_vec());
    };
    let mut stages = Vec::new();
    for name in list.split(',') {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let stage = Stage::parse(&name)
            .ok_or_else(|| anyhow::anyhow!("Unknown stage '{name}'"))?;
        if !stages.contains(&stage) {
            stages.push(stage);
        }
    }
    anyhow::ensure!(!stages.is_empty(), "--stages was given but named no stages");
    Ok(stages)
}

fn parse_channels(list: &str) -> Result<Vec<Channel>> {
    let mut channels = Vec::new();
    for name in list.split(',') {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let channel = Channel::parse(&name)
            .ok_or_else(|| anyhow::anyhow!("Unknown channel '{name}'"))?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    anyhow::ensure!(!channels.is_empty(), "--channels named no channels");
    Ok(channels)
}
