//! DSP Search - similarity search over compressed time-series libraries
//!
//! CLI commands:
//! - list: Scan the library and print candidate files
//! - decode: Decode a single .dsp file and print its stats
//! - search: Fetch a symbol's daily closes and rank the most similar
//!   historical series in the library

mod codec;
mod config;
mod engine;
mod fetch;
mod library;
mod logging;
#[cfg(test)]
mod testutil;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

/// Conventional library location, probed upward from the working directory
const DEFAULT_LIBRARY_DIR: &str = "src/save_files";

/// Queries shorter than this are refused before searching
const MIN_QUERY_LEN: usize = 300;

#[derive(Parser)]
#[command(name = "dsp_search")]
#[command(about = "Multi-scale similarity search over compressed DSP series")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Library root (defaults to DSP_LIBRARY_ROOT or an upward probe
    /// for src/save_files)
    #[arg(short, long)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List library files
    List {
        /// Case-insensitive substring filter on display names
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Decode a single .dsp file and print its stats
    Decode {
        /// Path to the file
        file: PathBuf,
    },

    /// Fetch daily closes for a symbol and search the library
    Search {
        /// Ticker symbol, e.g. IBM
        symbol: String,

        /// Alpha Vantage API key (defaults to ALPHA_VANTAGE_KEY)
        #[arg(long)]
        api_key: Option<String>,

        /// Use the trailing N closes as the query pattern
        #[arg(long, default_value = "300")]
        window: usize,

        /// Include macroeconomic (FRED) series in the search
        #[arg(long)]
        include_fred: bool,

        /// Number of matches to keep
        #[arg(long, default_value = "10")]
        top_k: usize,

        /// Points reserved after each match for forward projection
        #[arg(long, default_value = "0")]
        lookahead: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging("logs");
    tracing::info!("DSP Search starting up");

    let cli = Cli::parse();
    let secrets = config::Secrets::load();

    match cli.command {
        Commands::List { filter } => {
            let root = resolve_root(cli.root, &secrets)?;
            list_library(&root, filter.as_deref());
        }

        Commands::Decode { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Could not read {:?}", file))?;
            let series = codec::decode(&bytes)?;
            print_series(&series);
        }

        Commands::Search {
            symbol,
            api_key,
            window,
            include_fred,
            top_k,
            lookahead,
        } => {
            let root = resolve_root(cli.root, &secrets)?;
            let key = api_key
                .or(secrets.alpha_vantage_key)
                .context("API key required: pass --api-key or set ALPHA_VANTAGE_KEY")?;
            run_search(&root, &symbol, &key, window, include_fred, top_k, lookahead).await?;
        }
    }

    Ok(())
}

/// Resolve the library root: flag, then .env, then upward probe
fn resolve_root(flag: Option<PathBuf>, secrets: &config::Secrets) -> anyhow::Result<PathBuf> {
    if let Some(root) = flag {
        return Ok(root);
    }
    if let Some(root) = &secrets.library_root {
        return Ok(PathBuf::from(root));
    }
    library::find_root(DEFAULT_LIBRARY_DIR)
        .context("No library root found: pass --root or set DSP_LIBRARY_ROOT")
}

/// Scan and print library entries
fn list_library(root: &Path, filter: Option<&str>) {
    let entries = library::scan(root);
    tracing::info!("Scanned {} candidates under {:?}", entries.len(), root);

    let filter_upper = filter.map(|f| f.to_uppercase());
    let mut shown = 0usize;
    for entry in &entries {
        if let Some(f) = &filter_upper {
            if !entry.display_name.to_uppercase().contains(f.as_str()) {
                continue;
            }
        }
        println!("{}", entry.display_name);
        shown += 1;
    }
    println!("{} of {} files", shown, entries.len());
}

/// Print a decoded series summary
fn print_series(series: &codec::DecodedSeries) {
    println!("Name:             {}", series.name());
    println!("Format:           {}", series.format);
    println!("Points:           {}", series.n);
    println!("Total investment: {:.2}", series.total_investment);
    if let (Some(first), Some(last)) = (series.values.first(), series.values.last()) {
        println!("First value:      {:.6}", first);
        println!("Last value:       {:.6}", last);
    }
}

async fn run_search(
    root: &Path,
    symbol: &str,
    api_key: &str,
    window: usize,
    include_fred: bool,
    top_k: usize,
    lookahead: usize,
) -> anyhow::Result<()> {
    // 1. Build the cache
    let entries = library::scan(root);
    println!("Scanned {} candidates", entries.len());

    let mut cache = library::LibraryCache::new();
    cache.load(&entries);
    if cache.is_empty() {
        anyhow::bail!("Library is empty; nothing to search");
    }
    println!("Cached {} series", cache.len());

    // 2. Fetch the query series
    let closes = fetch::fetch_daily(symbol, api_key).await?;
    if closes.len() < MIN_QUERY_LEN {
        anyhow::bail!(
            "Data too short for search: {} closes, need {}",
            closes.len(),
            MIN_QUERY_LEN
        );
    }

    // Trailing window: the most recent history is the pattern
    let start = closes.len().saturating_sub(window);
    let pattern = &closes[start..];

    // 3. Search
    let results = engine::search(&cache, pattern, include_fred, top_k, lookahead);

    if results.is_empty() {
        println!("No matches above correlation {}", engine::CORRELATION_FLOOR);
        return Ok(());
    }

    println!(
        "{:<40} {:>8} {:>6} {:>9} {:>9}",
        "SYMBOL", "OFFSET", "SCALE", "PEARSON", "DISTANCE"
    );
    for res in &results {
        let stock = &cache.stocks()[res.stock_index];
        tracing::debug!("Match {} from {}", res.symbol, stock.full_path);
        println!(
            "{:<40} {:>8} {:>6} {:>9.4} {:>9.4}",
            res.symbol, res.offset, res.scale, res.pearson, res.distance
        );
    }

    Ok(())
}
