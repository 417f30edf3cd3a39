//! Backtest result aggregation.

use chrono::{DateTime, Utc};
use cross_arb_core::types::VenueId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why a paper trade was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    /// Spread collapsed to within the exit target.
    Convergence,
    /// Held past the maximum age.
    Timeout,
    /// Data ended with the trade still open.
    EndOfData,
}

/// One completed paper spread cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Symbol traded.
    pub symbol: String,
    /// Venue bought on.
    pub buy_venue: VenueId,
    /// Venue sold on.
    pub sell_venue: VenueId,
    /// Entry time.
    pub entry_time: DateTime<Utc>,
    /// Exit time.
    pub exit_time: DateTime<Utc>,
    /// Spread percent at entry.
    pub entry_spread_pct: Decimal,
    /// Spread percent at exit.
    pub exit_spread_pct: Decimal,
    /// Notional in quote asset.
    pub size_usd: Decimal,
    /// Net profit percent after fees and slippage.
    pub net_profit_pct: Decimal,
    /// Net profit in quote asset.
    pub net_profit_usd: Decimal,
    /// Exit trigger.
    pub exit_kind: ExitKind,
}

/// Per-symbol aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolSummary {
    /// Trades on this symbol.
    pub trades: usize,
    /// Sum of net profit percent.
    pub net_profit_pct: Decimal,
    /// Sum of net profit in quote asset.
    pub net_profit_usd: Decimal,
}

/// Full backtest report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Quotes replayed.
    pub quotes_processed: u64,
    /// Opportunities the detector emitted.
    pub opportunities_detected: u64,
    /// Completed trades.
    pub trades: Vec<TradeRecord>,
    /// Sum of net profit percent across trades.
    pub total_net_profit_pct: Decimal,
    /// Sum of net profit in quote asset.
    pub total_net_profit_usd: Decimal,
    /// Fraction of profitable trades (0-100).
    pub win_rate_pct: f64,
    /// Deepest cumulative loss from a running peak, in percent terms.
    pub max_drawdown_pct: Decimal,
    /// Per-symbol breakdown.
    pub per_symbol: HashMap<String, SymbolSummary>,
}

impl BacktestReport {
    /// Builds a report from completed trades.
    #[must_use]
    pub fn from_trades(
        trades: Vec<TradeRecord>,
        quotes_processed: u64,
        opportunities_detected: u64,
    ) -> Self {
        let total_net_profit_pct: Decimal = trades.iter().map(|t| t.net_profit_pct).sum();
        let total_net_profit_usd: Decimal = trades.iter().map(|t| t.net_profit_usd).sum();

        let wins = trades
            .iter()
            .filter(|t| t.net_profit_pct > Decimal::ZERO)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let win_rate_pct = if trades.is_empty() {
            0.0
        } else {
            wins as f64 / trades.len() as f64 * 100.0
        };

        let mut cumulative = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_drawdown_pct = Decimal::ZERO;
        for trade in &trades {
            cumulative += trade.net_profit_pct;
            peak = peak.max(cumulative);
            max_drawdown_pct = max_drawdown_pct.max(peak - cumulative);
        }

        let mut per_symbol: HashMap<String, SymbolSummary> = HashMap::new();
        for trade in &trades {
            let entry = per_symbol.entry(trade.symbol.clone()).or_default();
            entry.trades += 1;
            entry.net_profit_pct += trade.net_profit_pct;
            entry.net_profit_usd += trade.net_profit_usd;
        }

        Self {
            quotes_processed,
            opportunities_detected,
            trades,
            total_net_profit_pct,
            total_net_profit_usd,
            win_rate_pct,
            max_drawdown_pct,
            per_symbol,
        }
    }
}
