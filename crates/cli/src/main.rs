//! Operator front-end.
//!
//! Three modes share the same core: `price-logger` runs ingestion plus the
//! recorder, `monitor` runs ingestion plus the detector and prints
//! opportunities, `backtest` replays recorded logs through the paper
//! pipeline. The process exits non-zero only on configuration or fatal
//! authentication errors; runtime errors are logged and survived.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use cross_arb_arbitrage::{Engine, TradeMode};
use cross_arb_backtest::{BacktestConfig, BacktestEngine, PaperFillModel};
use cross_arb_core::{AppConfig, ConfigLoader, VenueAdapter, VenueId};
use cross_arb_data::{record_stream, QuoteRecorder, RecordMode, RecorderConfig};
use cross_arb_exchange_hyperliquid::HyperliquidAdapter;
use cross_arb_ingest::{HubConfig, IngestionHub};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cross-arb", about = "Cross-venue arbitrage engine", version)]
struct Cli {
    /// Config file path.
    #[arg(long, global = true, default_value = "config/Config.toml")]
    config: PathBuf,

    /// Log level (overridden by RUST_LOG when set).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record normalized quotes to rotated CSV logs.
    PriceLogger {
        /// Symbols to record.
        #[arg(long, num_args = 1.., required = true)]
        symbols: Vec<String>,

        /// Flush interval in seconds.
        #[arg(long, default_value_t = 5)]
        interval: u64,

        /// Gzip the log files.
        #[arg(long)]
        compress: bool,

        /// Record only quotes whose bid or ask moved past the configured
        /// delta threshold.
        #[arg(long)]
        delta: bool,

        /// Venues to record from.
        #[arg(long, num_args = 1.., default_values_t = [String::from("hyperliquid")])]
        exchanges: Vec<String>,

        /// Log root directory.
        #[arg(long, default_value = "data/price_logs")]
        out: PathBuf,
    },

    /// Run ingestion + detection and print opportunities.
    Monitor {
        /// Symbols to monitor.
        #[arg(long, num_args = 1.., required = true)]
        symbols: Vec<String>,

        /// Stop after this many seconds (runs until Ctrl-C otherwise).
        #[arg(long)]
        duration: Option<u64>,

        /// Venues to monitor.
        #[arg(long, num_args = 1.., default_values_t = [String::from("hyperliquid")])]
        exchanges: Vec<String>,
    },

    /// Replay recorded logs through the paper pipeline.
    Backtest {
        /// First day, YYYY-MM-DD.
        #[arg(long)]
        start: NaiveDate,

        /// Last day, YYYY-MM-DD.
        #[arg(long)]
        end: NaiveDate,

        /// Symbols to trade.
        #[arg(long, num_args = 1.., required = true)]
        symbols: Vec<String>,

        /// Taker fee per leg, as a fraction.
        #[arg(long, default_value = "0.0006")]
        fee: Decimal,

        /// Slippage per side, as a fraction.
        #[arg(long, default_value = "0.0003")]
        slippage: Decimal,

        /// Minimum entry spread percent.
        #[arg(long, default_value = "0.5")]
        min_spread: Decimal,

        /// Convergence exit target percent.
        #[arg(long, default_value = "0.1")]
        exit: Decimal,

        /// Maximum notional per trade in USD.
        #[arg(long, default_value = "10000")]
        max_position: Decimal,

        /// Minimum expected profit in USD.
        #[arg(long, default_value = "10")]
        min_profit: Decimal,

        /// Log root directory.
        #[arg(long, default_value = "data/price_logs")]
        data_root: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Config failures are the fatal path: exit 1 before anything runs.
    let config = match ConfigLoader::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration failed to load");
            std::process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::PriceLogger {
            symbols,
            interval,
            compress,
            delta,
            exchanges,
            out,
        } => run_price_logger(&config, symbols, interval, compress, delta, &exchanges, out).await,
        Commands::Monitor {
            symbols,
            duration,
            exchanges,
        } => run_monitor(config, symbols, duration, &exchanges).await,
        Commands::Backtest {
            start,
            end,
            symbols,
            fee,
            slippage,
            min_spread,
            exit,
            max_position,
            min_profit,
            data_root,
        } => run_backtest(
            start,
            end,
            symbols,
            fee,
            slippage,
            min_spread,
            exit,
            max_position,
            min_profit,
            data_root,
        ),
    };

    if let Err(e) = outcome {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

/// Builds the adapter for a venue name. Only Hyperliquid is wired in this
/// build; the remaining venues live behind the same contract.
fn build_adapter(config: &AppConfig, name: &str) -> Result<Option<Arc<dyn VenueAdapter>>> {
    let venue: VenueId = VenueId::from_str(name).map_err(|e| anyhow::anyhow!(e))?;
    match venue {
        VenueId::Hyperliquid => Ok(Some(Arc::new(HyperliquidAdapter::from_config(config)))),
        other => {
            warn!(venue = %other, "No adapter built for venue, skipping");
            Ok(None)
        }
    }
}

async fn run_price_logger(
    config: &AppConfig,
    symbols: Vec<String>,
    flush_interval: u64,
    compress: bool,
    delta: bool,
    exchanges: &[String],
    out: PathBuf,
) -> Result<()> {
    let (hub, _events) = IngestionHub::new(HubConfig {
        websocket: config.websocket.clone(),
        ..HubConfig::default()
    });
    let quotes = hub.subscribe("recorder");

    let mut venues = 0;
    for name in exchanges {
        if let Some(adapter) = build_adapter(config, name)? {
            hub.add(adapter, symbols.clone());
            venues += 1;
        }
    }
    anyhow::ensure!(venues > 0, "no usable venue adapters configured");

    let recorder = QuoteRecorder::new(RecorderConfig {
        root: out,
        compress,
        mode: if delta {
            RecordMode::Delta
        } else {
            RecordMode::Full
        },
        price_change_threshold: config.price_logger.price_change_threshold,
    });

    info!(symbols = ?symbols, venues, "Price logger running; Ctrl-C to stop");
    let writer = tokio::spawn(record_stream(
        quotes,
        recorder,
        Duration::from_secs(flush_interval.max(1)),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Stopping price logger");
    hub.shutdown().await;

    match writer.await {
        Ok(Ok(stats)) => {
            for (venue, rows) in &stats.rows_written {
                info!(venue = %venue, rows, "Recorded");
            }
            if stats.rows_skipped > 0 {
                info!(skipped = stats.rows_skipped, "Delta filter skipped rows");
            }
            Ok(())
        }
        Ok(Err(e)) => {
            // Runtime write errors are reported but not fatal to the exit
            // code contract.
            error!(error = %e, "Recorder finished with error");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("recorder task panicked: {e}")),
    }
}

async fn run_monitor(
    config: AppConfig,
    symbols: Vec<String>,
    duration: Option<u64>,
    exchanges: &[String],
) -> Result<()> {
    let (mut engine, _position_events) = Engine::new(config.clone(), TradeMode::Observe);
    let mut opportunities = engine.opportunity_stream();

    let mut venues = 0;
    for name in exchanges {
        if let Some(adapter) = build_adapter(&config, name)? {
            engine.add_venue(adapter, symbols.clone());
            venues += 1;
        }
    }
    anyhow::ensure!(venues > 0, "no usable venue adapters configured");

    let shutdown = engine.shutdown_handle();
    let engine_task = tokio::spawn(engine.run());

    info!(symbols = ?symbols, venues, "Monitor running");
    let printer = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(opp) = opportunities.recv().await {
            count += 1;
            println!(
                "[{}] {} {}: buy {} @ {} -> sell {} @ {} | spread {:.4}% | size {} | est. profit ${}",
                opp.id,
                opp.timestamp.format("%H:%M:%S%.3f"),
                opp.symbol,
                opp.buy_venue,
                opp.buy_price,
                opp.sell_venue,
                opp.sell_price,
                opp.spread_pct,
                opp.recommended_size,
                opp.expected_profit,
            );
        }
        count
    });

    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
        }
    }

    info!("Stopping monitor");
    shutdown.shutdown();
    let _ = engine_task.await;
    if let Ok(count) = printer.await {
        info!(opportunities = count, "Monitor finished");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_backtest(
    start: NaiveDate,
    end: NaiveDate,
    symbols: Vec<String>,
    fee: Decimal,
    slippage: Decimal,
    min_spread: Decimal,
    exit: Decimal,
    max_position: Decimal,
    min_profit: Decimal,
    data_root: PathBuf,
) -> Result<()> {
    anyhow::ensure!(start <= end, "start date must not be after end date");

    let engine = BacktestEngine::new(BacktestConfig {
        data_root,
        start,
        end,
        symbols,
        fill_model: PaperFillModel {
            fee_rate: fee,
            slippage_rate: slippage,
        },
        min_spread_pct: min_spread,
        exit_target_pct: exit,
        max_position_size_usd: max_position,
        min_profit_usd: min_profit,
        max_position_age: chrono::Duration::hours(24),
    });

    let report = engine.run()?;

    println!("=== Backtest {start} .. {end} ===");
    println!("quotes processed:       {}", report.quotes_processed);
    println!("opportunities detected: {}", report.opportunities_detected);
    println!("trades:                 {}", report.trades.len());
    println!("total net profit:       {:.6}%", report.total_net_profit_pct);
    println!("total net profit USD:   {:.2}", report.total_net_profit_usd);
    println!("win rate:               {:.1}%", report.win_rate_pct);
    println!("max drawdown:           {:.6}%", report.max_drawdown_pct);
    for (symbol, summary) in &report.per_symbol {
        println!(
            "  {symbol}: {} trades, net {:.6}% (${:.2})",
            summary.trades, summary.net_profit_pct, summary.net_profit_usd
        );
    }
    Ok(())
}
