//! Cache lookup binary - shows what the translation cache holds for a source text
//!
//! Usage:
//!   cargo run --bin cache-lookup -- "Strongly agree"
//!   cargo run --bin cache-lookup -- "Strongly agree" --lang it --threshold 0.85
//!
//! Optional:
//! - DATA_DIR (defaults to data)

use anyhow::Result;
use clap::Parser;
use survey_translator::cache::{
    TranslationCache, DEFAULT_SIMILARITY_LIMIT, DEFAULT_SIMILARITY_THRESHOLD,
};
use survey_translator::canned::CannedTable;
use survey_translator::config::Config;
use survey_translator::normalize::normalize;

#[derive(Parser, Debug)]
#[command(name = "cache-lookup", about = "Look up a source text in the translation cache")]
struct Cli {
    /// Source text to look up
    text: String,

    /// Only show this language
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Minimum similarity for near-duplicates (0-1)
    #[arg(short = 't', long = "threshold", default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    threshold: f64,

    /// Maximum number of near-duplicates to list
    #[arg(short = 'n', long = "limit", default_value_t = DEFAULT_SIMILARITY_LIMIT)]
    limit: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("survey_translator=warn".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    let cache = TranslationCache::load(&config.cache_path())?;
    let canned = CannedTable::load(&config.canned_path())?;
    let languages = match &cli.lang {
        Some(lang) => vec![lang.clone()],
        None => config.default_langs.clone(),
    };

    println!("Key: {:?}", normalize(&cli.text));
    println!(
        "Cache: {} ({} sources, {} records)",
        cache.path().display(),
        cache.len(),
        cache.record_count()
    );
    println!();

    for lang in &languages {
        let canned_hit = canned.lookup(&cli.text, lang);
        let cached = cache.lookup(&cli.text, lang);
        match (canned_hit, cached) {
            (Some(text), _) => println!("  {:<6} {} (canned)", lang, text),
            (None, Some(text)) => println!("  {:<6} {}", lang, text),
            (None, None) => println!("  {:<6} -", lang),
        }
    }

    let similar: Vec<String> = cache
        .find_similar(&cli.text, cli.threshold, cli.limit + 1)
        .into_iter()
        .filter(|key| *key != normalize(&cli.text))
        .take(cli.limit)
        .collect();

    if !similar.is_empty() {
        println!();
        println!("Near-duplicates (>= {:.2}):", cli.threshold);
        for key in similar {
            println!("  {}", key);
            for lang in &languages {
                if let Some(text) = cache.lookup(&key, lang) {
                    println!("    {:<6} {}", lang, text);
                }
            }
        }
    }

    Ok(())
}
