//! Tick Trader - Main Entry Point
//!
//! Paper trading over densified intraday prices.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tick_trader::bus::{BusConfig, InMemoryBus};
use tick_trader::config::Config;
use tick_trader::densify::Densifier;
use tick_trader::engine::{Orchestrator, RunSummary};
use tick_trader::market::csv::{parse_observations, write_observations};
use tick_trader::market::{AlphaVantageClient, CsvPriceSource, PriceSource};
use tick_trader::persistence::{SqliteTradeStore, TradeStore};
use tick_trader::utils::Profiler;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Tick Trader CLI
#[derive(Parser)]
#[command(name = "tick-trader")]
#[command(version, about = "Densify intraday prices and paper trade a moving-average rule")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop over the configured days (default)
    Run {
        /// Configuration file (extension optional)
        #[arg(short, long, default_value = "config")]
        config: String,

        /// Read observations from a CSV file instead of the HTTP provider
        #[arg(long)]
        offline: Option<String>,

        /// SQLite database path (overrides persistence.db_path)
        #[arg(long)]
        db: Option<String>,
    },

    /// Densify an observation CSV into a fixed-cadence CSV
    Densify {
        /// Input CSV (ticker,time,price)
        #[arg(short, long)]
        input: String,

        /// Output CSV
        #[arg(short, long)]
        output: String,

        /// Configuration file (extension optional)
        #[arg(short, long, default_value = "config")]
        config: String,
    },

    /// Show persisted trades and recent runs
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "data/trades.db")]
        db: String,

        /// Number of recent runs to show
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Densify {
            input,
            output,
            config,
        }) => densify_file(&input, &output, &config).await,
        Some(Commands::Status { db, limit }) => show_status(&db, limit),
        Some(Commands::Run {
            config,
            offline,
            db,
        }) => run(&config, offline.as_deref(), db.as_deref()).await,
        None => run("config", None, None).await,
    }
}

/// Load config, wire collaborators and run every trading day.
async fn run(config_path: &str, offline: Option<&str>, db: Option<&str>) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║            Tick Trader v{} - Paper Trading               ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load_from(config_path)?;
    config.validate()?;
    log_config(&config);

    let bus = InMemoryBus::new(BusConfig::from_stream(&config.stream));
    let db_path = db.unwrap_or(config.persistence.db_path.as_str());
    let store = SqliteTradeStore::new(db_path)?;
    info!("📂 [PERSISTENCE] Trades recorded to {}", db_path);

    let summary = match offline {
        Some(path) => {
            let source = CsvPriceSource::new(path)?;
            if source.dropped() > 0 {
                warn!("⚠️  {} malformed rows skipped in {}", source.dropped(), path);
            }
            info!("📝 OFFLINE MODE - Replaying {}", path);
            run_with(&config, source, bus, store).await?
        }
        None => {
            if config.data_source.api_key.is_empty() {
                warn!("⚠️  No API key configured. Requests will likely be rejected.");
            }
            let source = AlphaVantageClient::new(&config.data_source)?;
            run_with(&config, source, bus, store).await?
        }
    };

    for line in summary.summary().lines() {
        info!("{}", line);
    }
    Ok(())
}

async fn run_with<P, S>(config: &Config, source: P, bus: InMemoryBus, store: S) -> Result<RunSummary>
where
    P: PriceSource,
    S: TradeStore,
{
    let profiler = Arc::new(Profiler::new());
    let mut orchestrator = Orchestrator::new(config, source, bus, store).with_profiler(profiler);
    let summary = orchestrator.run().await?;
    Ok(summary)
}

/// Densify an observation file with the configured cadence and jitter.
async fn densify_file(input: &str, output: &str, config_path: &str) -> Result<()> {
    let config = Config::load_from(config_path)?;
    config.validate()?;

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input))?;
    let parsed = parse_observations(&content);
    if parsed.dropped > 0 {
        warn!("⚠️  {} malformed rows skipped in {}", parsed.dropped, input);
    }

    let densifier = Densifier::from_config(&config.densify);
    info!(
        "🔧 Densifying {} observations at {}ms over {} segments",
        parsed.observations.len(),
        densifier.cadence_ms(),
        densifier.segment_count()
    );

    let observations = parsed.observations;
    let report = tokio::task::spawn_blocking(move || densifier.densify(&observations)).await?;
    if !report.is_complete() {
        warn!("⚠️  {} segments failed and were left out", report.failed_segments());
    }

    write_observations(output, &report.series)?;
    info!("✅ Wrote {} samples to {}", report.series.len(), output);
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "tick-trader.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tick_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Instruments: {}", config.market.instruments.join(", "));
    info!(
        "   Trading Days: {}",
        config
            .market
            .trading_days
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("   Initial Cash: ${:.2}", config.trading.initial_cash);
    info!("   Max Lot Size: {}", config.trading.max_lot_size);
    info!(
        "   Cadence: {}ms, Jitter: [{}, {}]",
        config.densify.cadence_ms, config.densify.jitter_min, config.densify.jitter_max
    );
    info!("   Lookback: {}ms", config.stream.lookback_ms);
    info!(
        "   Bus: {} / {}",
        config.stream.broker, config.stream.topic
    );
}

fn show_status(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              TICK TRADER STATUS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   No run has been recorded yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = SqliteTradeStore::new(db_path)?;

    let counts = store.trade_counts()?;
    println!("\n📈 Trades by Instrument");
    if counts.is_empty() {
        println!("   └─ (none)");
    }
    for (instrument, count) in &counts {
        println!("   ├─ {}: {}", instrument, count);
    }

    let runs = store.recent_runs(limit)?;
    println!("\n📊 Recent Runs");
    if runs.is_empty() {
        println!("   └─ (none)");
    }
    for run in &runs {
        println!("   ┌─ {}", run.run_id);
        println!("   ├─ Finished:   {}", run.finished_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!(
            "   ├─ Days:       {} processed, {} skipped",
            run.days_processed,
            run.skipped_days.len()
        );
        println!("   ├─ Final Cash: ${:.2}", run.final_cash);
        println!("   ├─ Trades:     {}", run.total_trades());
        println!("   └─ Net P&L:    ${:.2}", run.net_pnl());
    }

    println!();
    Ok(())
}
