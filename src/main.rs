mod import;

use analytics::RankingEngine;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use configuration::{init_tracing, load_config, load_config_from, Config};
use core_types::{normalize_ticker, CurrentQuote, RankingKind};
use database::{connect, run_migrations, DbRepository};
use engine::{
    HistoryQuoteSource, MarketClock, Portfolio, QuotePoller, RankingCache, RankingSnapshot,
    RefreshOrchestrator,
};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The main entry point for the Marquee market highlights service.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load DATABASE_URL and friends from .env when present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging).context("Failed to initialise logging")?;

    let db_pool = connect().await.context("Failed to connect to the database")?;
    run_migrations(&db_pool)
        .await
        .context("Failed to run database migrations")?;
    let repo = DbRepository::new(db_pool);

    match cli.command {
        Commands::Rankings(args) => handle_rankings(args, &config, repo).await,
        Commands::Add(args) => handle_add(args, &config, repo).await,
        Commands::Remove(args) => handle_remove(args, &config, repo).await,
        Commands::Import(args) => handle_import(args, &config, repo).await,
        Commands::Quote(args) => handle_quote(args, repo).await,
        Commands::Run => handle_run(&config, repo).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Tracks a set of instruments and highlights the market's best, worst and
/// strongest trending names.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults to ./config.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current rankings.
    Rankings(RankingsArgs),
    /// Start tracking an instrument.
    Add(TickerArgs),
    /// Stop tracking an instrument and drop its history.
    Remove(TickerArgs),
    /// Load daily price history from CSV files.
    Import(ImportArgs),
    /// Show the latest stored quote of an instrument.
    Quote(TickerArgs),
    /// Keep the rankings current until interrupted with Ctrl-C.
    Run,
}

#[derive(Parser)]
struct RankingsArgs {
    /// Show the last persisted rankings instead of recomputing them.
    #[arg(long)]
    cached: bool,
}

#[derive(Parser)]
struct TickerArgs {
    /// The instrument's ticker (e.g., "PETR4").
    #[arg(long)]
    ticker: String,
}

#[derive(Parser)]
struct ImportArgs {
    /// Ticker to import into. Defaults to each file's name without extension.
    #[arg(long)]
    ticker: Option<String>,

    /// CSV files with a `date,open,high,low,close,volume` header.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_rankings(args: RankingsArgs, config: &Config, repo: DbRepository) -> anyhow::Result<()> {
    let snapshot = if args.cached {
        let rows = repo.load_rankings().await.context("Failed to load persisted rankings")?;
        match RankingSnapshot::from_stored(&rows) {
            Some(snapshot) => Arc::new(snapshot),
            None => {
                println!("No rankings have been computed yet.");
                return Ok(());
            }
        }
    } else {
        compute_rankings(config, repo).await?
    };

    print_rankings(&snapshot);
    Ok(())
}

async fn handle_add(args: TickerArgs, config: &Config, repo: DbRepository) -> anyhow::Result<()> {
    let portfolio = Portfolio::new(Arc::new(repo.clone()));
    let ticker = portfolio.add_instrument(&args.ticker).await?;
    println!("Now tracking {}.", ticker);

    let snapshot = compute_rankings(config, repo).await?;
    print_rankings(&snapshot);
    Ok(())
}

async fn handle_remove(args: TickerArgs, config: &Config, repo: DbRepository) -> anyhow::Result<()> {
    let portfolio = Portfolio::new(Arc::new(repo.clone()));
    let ticker = portfolio.remove_instrument(&args.ticker).await?;
    println!("Stopped tracking {}.", ticker);

    let snapshot = compute_rankings(config, repo).await?;
    print_rankings(&snapshot);
    Ok(())
}

/// Imports every file concurrently, then recomputes the rankings once.
async fn handle_import(args: ImportArgs, config: &Config, repo: DbRepository) -> anyhow::Result<()> {
    if args.ticker.is_some() && args.files.len() > 1 {
        bail!("--ticker can only be used with a single file");
    }

    let progress_bar = ProgressBar::new(args.files.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let tasks: Vec<_> = args
        .files
        .into_iter()
        .map(|path| {
            let repo = repo.clone();
            let pb = progress_bar.clone();
            let explicit = args.ticker.clone();

            tokio::spawn(async move {
                let raw = explicit
                    .or_else(|| import::ticker_from_path(&path))
                    .with_context(|| format!("Cannot derive a ticker from {}", path.display()))?;
                let ticker = normalize_ticker(&raw)?;
                pb.set_message(format!("Importing {}...", ticker));

                let points = tokio::task::spawn_blocking(move || import::read_history_file(&path)).await??;
                let inserted = repo.save_price_points(&ticker, &points).await?;

                pb.inc(1);
                Ok::<_, anyhow::Error>((ticker, points.len(), inserted))
            })
        })
        .collect();

    let results = join_all(tasks).await;
    progress_bar.finish_with_message("Import complete!");

    let mut failures = 0;
    for result in results {
        match result {
            Ok(Ok((ticker, read, inserted))) => {
                println!("{}: {} rows read, {} new points stored.", ticker, read, inserted)
            }
            Ok(Err(e)) => {
                failures += 1;
                eprintln!("Import failed: {:#}", e);
            }
            Err(e) => {
                failures += 1;
                eprintln!("An import task failed: {}", e);
            }
        }
    }

    let snapshot = compute_rankings(config, repo).await?;
    print_rankings(&snapshot);

    if failures > 0 {
        bail!("{} file(s) failed to import", failures);
    }
    Ok(())
}

async fn handle_quote(args: TickerArgs, repo: DbRepository) -> anyhow::Result<()> {
    let ticker = normalize_ticker(&args.ticker)?;
    let quote = repo
        .get_current_quote(&ticker)
        .await
        .with_context(|| format!("Failed to load the quote of {}", ticker))?;

    match quote {
        Some(quote) => println!("{}", format_quote(&ticker, &quote)),
        None => println!("No quote recorded for {}.", ticker),
    }
    Ok(())
}

/// Runs the refresh orchestrator (and the quote poller, when enabled) until Ctrl-C.
async fn handle_run(config: &Config, repo: DbRepository) -> anyhow::Result<()> {
    let cache = Arc::new(build_cache(config, &repo)?);

    match repo.load_rankings().await {
        Ok(rows) => {
            if let Some(snapshot) = RankingSnapshot::from_stored(&rows) {
                tracing::info!(computed_at = ?snapshot.computed_at, "Serving persisted rankings until the first refresh.");
                cache.seed(snapshot);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not load persisted rankings."),
    }

    let store = Arc::new(repo);
    let orchestrator =
        RefreshOrchestrator::start(Arc::clone(&cache), store.clone(), &config.refresh, &config.market)?;

    let cancel = CancellationToken::new();
    let poller = config.quotes.enabled.then(|| {
        let poller = QuotePoller::new(
            store.clone(),
            Arc::new(HistoryQuoteSource::new(store.clone())),
            Duration::from_secs(config.quotes.interval_secs.max(1)),
        );
        tokio::spawn(poller.run(cancel.clone()))
    });

    tracing::info!("Marquee is running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested.");

    cancel.cancel();
    if let Some(poller) = poller {
        if let Err(e) = poller.await {
            tracing::error!(error = %e, "Quote poller ended abnormally.");
        }
    }

    let stats = orchestrator.stats();
    orchestrator.shutdown().await;
    tracing::info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        coalesced = stats.coalesced,
        "Refresh summary."
    );
    Ok(())
}

// ==============================================================================
// Helpers
// ==============================================================================

fn build_cache(config: &Config, repo: &DbRepository) -> anyhow::Result<RankingCache> {
    let engine = RankingEngine::new(config.rankings.clone()).context("Invalid ranking parameters")?;
    Ok(RankingCache::new(engine, &config.refresh).with_sink(Arc::new(repo.clone())))
}

/// Computes the rankings once from the database and persists them.
async fn compute_rankings(config: &Config, repo: DbRepository) -> anyhow::Result<Arc<RankingSnapshot>> {
    let cache = build_cache(config, &repo)?;
    let clock = MarketClock::from_settings(&config.market)?;
    let snapshot = cache
        .refresh(&repo, clock.today())
        .await
        .context("Failed to compute rankings")?;
    Ok(snapshot)
}

fn print_rankings(snapshot: &RankingSnapshot) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Ranking", "Ticker", "Score"]);

    for kind in RankingKind::ALL {
        let entry = snapshot.get(kind);
        let ticker = entry
            .and_then(|e| e.ticker.clone())
            .unwrap_or_else(|| "-".to_string());
        let score = entry
            .and_then(|e| e.score)
            .map(|score| format_score(kind, score))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![kind.label().to_string(), ticker, score]);
    }

    println!("{table}");
    match snapshot.computed_at {
        Some(at) => println!("Computed at {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Not computed yet."),
    }
}

fn format_score(kind: RankingKind, score: f64) -> String {
    if kind.is_return() {
        format!("{:+.2}%", score * 100.0)
    } else {
        format!("{:+.4} /day", score)
    }
}

fn format_quote(ticker: &str, quote: &CurrentQuote) -> String {
    let price = quote
        .price
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    let change = quote
        .change
        .map(|c| format!("{:+}", c))
        .unwrap_or_else(|| "-".to_string());
    let change_pct = quote
        .change_pct
        .map(|c| format!("{:+.2}%", c))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} ({} / {}) as of {}",
        ticker,
        price,
        change,
        change_pct,
        quote.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
