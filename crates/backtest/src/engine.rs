//! Backtest engine: replayed quotes through the live detection pipeline
//! with paper execution.
//!
//! Downstream of the replayer everything matches live mode: the cache is
//! updated before detection, opportunities are threshold-filtered the same
//! way, and close decisions use the spread recomputed in the entry
//! direction with an inclusive exit boundary.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use cross_arb_arbitrage::detector::{Detector, DetectorConfig};
use cross_arb_core::types::{Quote, VenueId};
use cross_arb_data::QuoteReplayer;
use cross_arb_ingest::PriceCache;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::execution::PaperFillModel;
use crate::metrics::{BacktestReport, ExitKind, TradeRecord};

/// Backtest parameters.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Quote log root.
    pub data_root: PathBuf,
    /// First day, inclusive.
    pub start: NaiveDate,
    /// Last day, inclusive.
    pub end: NaiveDate,
    /// Symbols to trade.
    pub symbols: Vec<String>,
    /// Paper fill cost model.
    pub fill_model: PaperFillModel,
    /// Minimum entry spread percent.
    pub min_spread_pct: Decimal,
    /// Convergence exit target percent (inclusive).
    pub exit_target_pct: Decimal,
    /// Maximum notional per trade in quote asset.
    pub max_position_size_usd: Decimal,
    /// Minimum expected profit in quote asset.
    pub min_profit_usd: Decimal,
    /// Maximum holding period before a timeout exit.
    pub max_position_age: Duration,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data/price_logs"),
            start: NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date"),
            end: NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date"),
            symbols: vec!["BTC".to_string()],
            fill_model: PaperFillModel::default(),
            min_spread_pct: dec!(0.1),
            exit_target_pct: dec!(0.1),
            max_position_size_usd: dec!(10000),
            min_profit_usd: dec!(10),
            max_position_age: Duration::hours(24),
        }
    }
}

/// An open paper spread trade.
#[derive(Debug, Clone)]
struct PaperTrade {
    symbol: String,
    buy_venue: VenueId,
    sell_venue: VenueId,
    entry_time: DateTime<Utc>,
    entry_spread_pct: Decimal,
    size_usd: Decimal,
}

/// Replays recorded quotes through the detector and paper-trades every
/// accepted opportunity.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Runs the full replay and returns the report.
    ///
    /// # Errors
    ///
    /// Returns an error when the quote logs cannot be read.
    pub fn run(&self) -> Result<BacktestReport> {
        let replayer = QuoteReplayer::new(
            self.config.data_root.clone(),
            self.config.start,
            self.config.end,
        )
        .with_symbols(self.config.symbols.clone());
        let quotes = replayer.load()?;

        info!(
            quotes = quotes.len(),
            start = %self.config.start,
            end = %self.config.end,
            "Starting backtest"
        );

        let cache = PriceCache::new();
        let mut detector = Detector::new(DetectorConfig {
            min_spread_pct: self.config.min_spread_pct,
            max_position_size_usd: self.config.max_position_size_usd,
            min_profit_usd: self.config.min_profit_usd,
        });

        let mut open: HashMap<String, PaperTrade> = HashMap::new();
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut quotes_processed = 0u64;

        for quote in &quotes {
            quotes_processed += 1;
            if !cache.update(quote) {
                continue;
            }

            self.evaluate_exit(quote, &cache, &mut open, &mut trades);

            // One paper trade per symbol at a time; the widest qualifying
            // dislocation wins because the detector orders ties by spread.
            if !open.contains_key(&quote.symbol) {
                let opportunities = detector.on_quote(quote, &cache);
                if let Some(opp) = opportunities.first() {
                    debug!(
                        id = %opp.id,
                        spread_pct = %opp.spread_pct,
                        "Paper trade entered"
                    );
                    open.insert(
                        quote.symbol.clone(),
                        PaperTrade {
                            symbol: opp.symbol.clone(),
                            buy_venue: opp.buy_venue,
                            sell_venue: opp.sell_venue,
                            entry_time: quote.timestamp,
                            entry_spread_pct: opp.spread_pct,
                            size_usd: opp.position_value(),
                        },
                    );
                }
            }
        }

        // Whatever is still open exits at the last observable spread.
        let leftovers: Vec<PaperTrade> = open.drain().map(|(_, t)| t).collect();
        for trade in leftovers {
            if let Some(spread) = current_spread(&cache, &trade) {
                let last_ts = cache
                    .latest_timestamp(&trade.symbol)
                    .unwrap_or(trade.entry_time);
                trades.push(self.close_trade(trade, spread, last_ts, ExitKind::EndOfData));
            }
        }

        let report = BacktestReport::from_trades(
            trades,
            quotes_processed,
            detector.opportunities_emitted(),
        );
        info!(
            trades = report.trades.len(),
            total_net_profit_pct = %report.total_net_profit_pct,
            "Backtest finished"
        );
        Ok(report)
    }

    fn evaluate_exit(
        &self,
        quote: &Quote,
        cache: &PriceCache,
        open: &mut HashMap<String, PaperTrade>,
        trades: &mut Vec<TradeRecord>,
    ) {
        let Some(trade) = open.get(&quote.symbol) else {
            return;
        };
        let Some(spread) = current_spread(cache, trade) else {
            return;
        };

        let exit_kind = if spread.abs() <= self.config.exit_target_pct {
            Some(ExitKind::Convergence)
        } else if quote.timestamp - trade.entry_time >= self.config.max_position_age {
            Some(ExitKind::Timeout)
        } else {
            None
        };

        if let Some(kind) = exit_kind {
            let trade = open.remove(&quote.symbol).expect("trade present");
            trades.push(self.close_trade(trade, spread, quote.timestamp, kind));
        }
    }

    fn close_trade(
        &self,
        trade: PaperTrade,
        exit_spread_pct: Decimal,
        exit_time: DateTime<Utc>,
        exit_kind: ExitKind,
    ) -> TradeRecord {
        let net_profit_pct = self
            .config
            .fill_model
            .net_profit_pct(trade.entry_spread_pct, exit_spread_pct);
        let net_profit_usd = net_profit_pct / dec!(100) * trade.size_usd;
        debug!(
            symbol = %trade.symbol,
            entry = %trade.entry_spread_pct,
            exit = %exit_spread_pct,
            net_profit_pct = %net_profit_pct,
            "Paper trade exited"
        );
        TradeRecord {
            symbol: trade.symbol,
            buy_venue: trade.buy_venue,
            sell_venue: trade.sell_venue,
            entry_time: trade.entry_time,
            exit_time,
            entry_spread_pct: trade.entry_spread_pct,
            exit_spread_pct,
            size_usd: trade.size_usd,
            net_profit_pct,
            net_profit_usd,
            exit_kind,
        }
    }
}

/// Spread recomputed in the entry direction from the cached quotes.
fn current_spread(cache: &PriceCache, trade: &PaperTrade) -> Option<Decimal> {
    let buy_quote = cache.get(&trade.symbol, trade.buy_venue)?;
    let sell_quote = cache.get(&trade.symbol, trade.sell_venue)?;
    Some((sell_quote.bid - buy_quote.ask) / buy_quote.ask * dec!(100))
}
