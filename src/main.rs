// src/main.rs
mod config;
mod identity;
mod machine;
mod mitigator;
mod navigator;
mod oracle;
mod selectors;
mod storage;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinSet;

use config::{ExtractOptions, DEFAULT_MIN_QUALITY, ENV_ORACLE_KEY, ENV_ORACLE_URL};
use machine::{ExtractResult, Extractor, RateGate, StopSignal};
use navigator::HttpNavigator;
use oracle::HttpOracle;
use selectors::SelectorStore;
use storage::{JsonStore, Persistence};
use utils::AppError;

/// Adaptive product extraction from e-commerce listing pages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listing page URLs to extract (run concurrently)
    #[arg(required = true)]
    urls: Vec<String>,

    /// Directory for the selector, product and session tables (in-memory if omitted)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Product oracle endpoint (falls back to SHELF_SCOUT_ORACLE_URL)
    #[arg(long)]
    oracle_url: Option<String>,

    /// Insert the built-in selector candidates before extracting
    #[arg(long)]
    seed_defaults: bool,

    /// Delete weak selectors unused for this many days before extracting
    #[arg(long)]
    purge_after_days: Option<i64>,

    /// Minimum seconds between two requests to the same domain
    #[arg(long)]
    min_spacing_secs: Option<u64>,

    /// Maximum state transitions per session
    #[arg(long)]
    max_attempts: Option<usize>,

    /// Navigation timeout in seconds
    #[arg(long)]
    nav_timeout_secs: Option<u64>,

    /// Timeout for one oracle call in seconds
    #[arg(long)]
    oracle_timeout_secs: Option<u64>,
}

impl Args {
    /// Environment defaults, then command-line overrides.
    fn options(&self) -> ExtractOptions {
        let mut options = ExtractOptions::from_env();
        if let Some(secs) = self.min_spacing_secs {
            options = options.with_min_spacing(Duration::from_secs(secs));
        }
        if let Some(attempts) = self.max_attempts {
            options = options.with_max_attempts(attempts);
        }
        if let Some(secs) = self.nav_timeout_secs {
            options.timeouts.navigation = Duration::from_secs(secs);
        }
        if let Some(secs) = self.oracle_timeout_secs {
            options.timeouts.oracle = Duration::from_secs(secs);
        }
        options
    }

    fn oracle_endpoint(&self) -> Result<String, AppError> {
        self.oracle_url
            .clone()
            .or_else(|| std::env::var(ENV_ORACLE_URL).ok())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(format!("No oracle endpoint: pass --oracle-url or set {}", ENV_ORACLE_URL))
            })
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging();

    // 2. Parse CLI Arguments
    let args = Args::parse();
    tracing::info!("Starting extraction for args: {:?}", args);

    // 3. Initialize storage
    let backend: Arc<dyn Persistence> = match &args.data_dir {
        Some(dir) => Arc::new(JsonStore::open(dir)?),
        None => {
            tracing::warn!("No --data-dir given; learned selectors and products will not be kept");
            Arc::new(JsonStore::in_memory())
        }
    };

    let selectors = SelectorStore::new(backend.clone());
    if args.seed_defaults {
        selectors.seed_defaults().await?;
    }
    if let Some(days) = args.purge_after_days {
        let removed = selectors.purge_stale(DEFAULT_MIN_QUALITY, chrono::Duration::days(days)).await?;
        tracing::info!("Purged {} stale selectors", removed);
    }

    // 4. Initialize navigator and oracle
    let navigator = Arc::new(HttpNavigator::new()?);
    let oracle = Arc::new(HttpOracle::new(args.oracle_endpoint()?, std::env::var(ENV_ORACLE_KEY).ok()));
    let extractor = Arc::new(Extractor::new(navigator, oracle, backend, RateGate::new()));

    // 5. Ctrl-C stops every running session
    let stop = StopSignal::new();
    let options = args.options().with_stop(stop.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping sessions");
            stop.stop();
        }
    });

    // 6. Run all sessions concurrently
    let mut sessions = JoinSet::new();
    for (index, url) in args.urls.iter().cloned().enumerate() {
        let extractor = extractor.clone();
        let options = options.clone();
        sessions.spawn(async move { (index, extractor.extract(&url, &options).await) });
    }

    let mut results: Vec<(usize, ExtractResult)> = Vec::with_capacity(args.urls.len());
    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("Session task failed: {}", e),
        }
    }
    results.sort_by_key(|(index, _)| *index);
    let results: Vec<ExtractResult> = results.into_iter().map(|(_, result)| result).collect();

    // 7. Report
    println!("{}", serde_json::to_string_pretty(&results)?);

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let products: usize = results.iter().map(|r| r.records.len()).sum();
    tracing::info!(
        "Processing finished. Success: {}, Failures: {}, Products: {}",
        succeeded,
        args.urls.len() - succeeded,
        products
    );

    if succeeded == 0 {
        return Err(AppError::Processing(format!(
            "No products extracted from {} URLs",
            args.urls.len()
        )));
    }

    Ok(())
}
