use anyhow::{Context, Result};
use clap::Parser;
use nl2sql_core::{EngineConfig, Orchestrator, RawTable, SchemaInference, SessionStore};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(about = "Answer natural-language questions about a CSV file with SQL")]
struct Args {
    /// Questions to answer, in order; each sees the previous turn
    questions: Vec<String>,

    /// CSV file with a header row
    #[arg(long)]
    csv: PathBuf,

    /// JSON config file (defaults apply otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    base_url: Option<String>,

    /// Row cap applied to every query
    #[arg(long)]
    max_rows: Option<u64>,

    /// Rule-based generation only
    #[arg(long)]
    no_llm: bool,

    /// Print the inferred schema before answering
    #[arg(long)]
    schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .with_env()?;
    if let Some(key) = args.api_key {
        config.llm.api_key = Some(key);
    }
    if let Some(model) = args.model {
        config.llm.model = model;
    }
    if let Some(base_url) = args.base_url {
        config.llm.base_url = base_url;
    }
    if let Some(rows) = args.max_rows {
        config.row_cap = rows;
    }
    if args.no_llm {
        config.llm.api_key = None;
    }

    let raw = RawTable::from_csv_path(&args.csv)
        .with_context(|| format!("failed to read {}", args.csv.display()))?;
    let name = args
        .csv
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    let dataset = nl2sql_core::Dataset::from_raw(
        name,
        &config.table_name,
        &raw,
        &SchemaInference::new(config.categorical_ratio),
    )?;

    if args.schema {
        println!("{}", serde_json::to_string_pretty(dataset.schema())?);
    }

    let store = SessionStore::default();
    let dataset_id = store.insert(dataset);
    let orchestrator = Orchestrator::from_config(&config)?;

    for question in &args.questions {
        info!("Question: {}", question);
        let answer = orchestrator.answer_for(&store, dataset_id, question).await;
        println!("{}", serde_json::to_string_pretty(&answer)?);
    }

    Ok(())
}
