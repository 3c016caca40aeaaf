use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use survey_translator::cache::TranslationCache;
use survey_translator::canned::CannedTable;
use survey_translator::config::{self, Config};
use survey_translator::gateway::ModelGateway;
use survey_translator::orchestrator::{Orchestrator, RunSettings};
use survey_translator::prompt::PromptTemplate;
use survey_translator::table::{filled_output_path, SourceTable};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "survey-translator",
    version,
    about = "Fill the language columns of a survey translation CSV"
)]
struct Cli {
    /// CSV exported from the survey tool, one column per language
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Comma-separated target language codes (default: DEFAULT_LANGS)
    #[arg(short = 'l', long = "langs")]
    langs: Option<String>,

    /// Items per model call (default: BATCH_SIZE)
    #[arg(short = 'b', long = "batch-size")]
    batch_size: Option<usize>,

    /// Model name (default: OPENAI_MODEL)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Column holding the source text
    #[arg(long = "source-column", default_value = "en")]
    source_column: String,

    /// Resolve canned and cached items only; no model calls, nothing written
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Debug-level logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file (ignored when the variables come from the environment)
    let _ = dotenvy::dotenv();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("survey_translator={}", level).parse()?),
        )
        .init();

    let mut config = Config::from_env()?;
    if let Some(model) = cli.model {
        config.openai_model = model;
    }
    if let Some(batch_size) = cli.batch_size {
        anyhow::ensure!(batch_size > 0, "--batch-size must be at least 1");
        config.batch_size = batch_size;
    }
    if !cli.dry_run {
        config.require_api_key()?;
    }

    let languages = match &cli.langs {
        Some(list) => config::parse_langs(list),
        None => config.default_langs.clone(),
    };
    anyhow::ensure!(!languages.is_empty(), "No target languages given");

    anyhow::ensure!(
        cli.input.exists(),
        "Input file not found: {}",
        cli.input.display()
    );

    info!(
        "Translating {} into [{}] with {}{}",
        cli.input.display(),
        languages.join(", "),
        config.openai_model,
        if cli.dry_run { " (dry run)" } else { "" }
    );

    // Load resources
    let mut table = SourceTable::load(&cli.input, &cli.source_column)
        .with_context(|| format!("Failed to load {}", cli.input.display()))?;
    let canned = CannedTable::load(&config.canned_path())?;
    let cache = TranslationCache::load(&config.cache_path())?;
    let template = match &config.prompt_template_path {
        Some(path) => PromptTemplate::load(path)?,
        None => PromptTemplate::default(),
    };
    let gateway = ModelGateway::new(config.gateway_config())?;

    info!(
        "Loaded {} rows, {} canned entries, {} cached sources",
        table.len(),
        canned.len(),
        cache.len()
    );
    if cache.skipped_lines() > 0 {
        warn!(
            "Skipped {} unreadable line(s) in {}",
            cache.skipped_lines(),
            cache.path().display()
        );
    }

    let settings = RunSettings {
        batch_size: config.batch_size,
        call: config.call_options(),
        dry_run: cli.dry_run,
    };
    let mut orchestrator = Orchestrator::new(canned, cache, gateway, template, settings);

    let outcome = orchestrator.run(&mut table, &languages).await;

    // Batches finished before a failure are still written out
    let output_path = filled_output_path(&cli.input, &config.translated_dir());
    if !cli.dry_run {
        table
            .write(&output_path)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        info!("Saved translated file to {}", output_path.display());
    }

    let report = outcome.context("Translation run failed")?;
    info!("Run report: {}", serde_json::to_string(&report)?);
    Ok(())
}
