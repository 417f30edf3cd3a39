//! Immutable application configuration.
//!
//! Loaded once at startup (see [`crate::config_loader`]) and passed by value
//! to every component; nothing mutates it afterwards.

use crate::types::VenueId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Detection thresholds and sizing.
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    /// Risk gate limits.
    #[serde(default)]
    pub risk: RiskConfig,
    /// Per-venue fee overrides, keyed by lowercase venue name.
    #[serde(default)]
    pub exchanges: HashMap<String, VenueConfig>,
    /// Recorder settings.
    #[serde(default)]
    pub price_logger: PriceLoggerConfig,
    /// WebSocket supervision settings.
    #[serde(default)]
    pub websocket: WebsocketConfig,
    /// Symbols monitored by default.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            arbitrage: ArbitrageConfig::default(),
            risk: RiskConfig::default(),
            exchanges: HashMap::new(),
            price_logger: PriceLoggerConfig::default(),
            websocket: WebsocketConfig::default(),
            symbols: default_symbols(),
        }
    }
}

fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()]
}

/// Threshold profile selecting one of the configured spread thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdProfile {
    /// The standard threshold.
    Default,
    /// Lower threshold, more opportunities, tighter margins.
    Conservative,
    /// Higher threshold, fewer but wider opportunities.
    Aggressive,
    /// Very high threshold for test runs.
    Test,
}

/// Detection thresholds and sizing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageConfig {
    /// Minimum spread percent for an opportunity to qualify.
    pub min_spread_threshold: Decimal,
    /// Maximum position size in USD.
    pub max_position_size: Decimal,
    /// Minimum expected profit in USD.
    pub min_profit_threshold: Decimal,
    /// Conservative profile threshold.
    pub conservative_threshold: Decimal,
    /// Aggressive profile threshold.
    pub aggressive_threshold: Decimal,
    /// Test profile threshold.
    pub test_threshold: Decimal,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_spread_threshold: Decimal::new(1, 1), // 0.1 %
            max_position_size: Decimal::from(10_000),
            min_profit_threshold: Decimal::from(10),
            conservative_threshold: Decimal::new(5, 2), // 0.05 %
            aggressive_threshold: Decimal::new(2, 1),   // 0.2 %
            test_threshold: Decimal::new(5, 1),         // 0.5 %
        }
    }
}

impl ArbitrageConfig {
    /// Returns the spread threshold for a profile.
    #[must_use]
    pub fn threshold(&self, profile: ThresholdProfile) -> Decimal {
        match profile {
            ThresholdProfile::Default => self.min_spread_threshold,
            ThresholdProfile::Conservative => self.conservative_threshold,
            ThresholdProfile::Aggressive => self.aggressive_threshold,
            ThresholdProfile::Test => self.test_threshold,
        }
    }
}

/// Risk gate limits. All USD values are in the quote asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum single position value in USD.
    pub max_position_size: Decimal,
    /// Maximum total exposure across all symbols in USD.
    pub max_total_exposure: Decimal,
    /// Maximum simultaneous positions per symbol.
    pub max_positions_per_symbol: usize,
    /// Maximum simultaneous positions overall.
    pub max_total_positions: usize,
    /// Maximum tolerated slippage percent per leg.
    pub max_slippage_percentage: Decimal,
    /// Minimum net spread (spread minus slippage) percent.
    pub min_net_spread: Decimal,
    /// Maximum position age in seconds before a timeout close.
    pub max_position_duration_secs: u64,
    /// Per-symbol cooldown between trades in seconds.
    pub cooldown_period_secs: u64,
    /// Daily loss limit in USD.
    pub max_daily_loss: Decimal,
    /// Daily drawdown limit in USD.
    pub max_drawdown: Decimal,
    /// Stop-loss as percent of position value.
    pub stop_loss_percentage: Decimal,
    /// Maximum exposure per venue in USD.
    pub max_venue_exposure: Decimal,
    /// Minimum balance that must remain free on a venue in USD.
    pub min_venue_balance: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(10_000),
            max_total_exposure: Decimal::from(50_000),
            max_positions_per_symbol: 3,
            max_total_positions: 10,
            max_slippage_percentage: Decimal::new(5, 1), // 0.5 %
            min_net_spread: Decimal::new(2, 1),          // 0.2 %
            max_position_duration_secs: 24 * 3600,
            cooldown_period_secs: 300,
            max_daily_loss: Decimal::from(1_000),
            max_drawdown: Decimal::from(5_000),
            stop_loss_percentage: Decimal::TWO,
            max_venue_exposure: Decimal::from(20_000),
            min_venue_balance: Decimal::from(1_000),
        }
    }
}

/// Per-venue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Fee overrides.
    #[serde(default)]
    pub fees: Option<FeesConfig>,
    /// API key, typically `${VENUE_API_KEY}` substituted at load.
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret, typically `${VENUE_API_SECRET}` substituted at load.
    #[serde(default)]
    pub api_secret: Option<String>,
}

/// Maker/taker rates for one venue, as decimal fractions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeesConfig {
    /// Maker rate.
    pub maker: Decimal,
    /// Taker rate.
    pub taker: Decimal,
}

/// Codified per-venue taker defaults, used when config has no override.
#[must_use]
pub fn default_taker_fee(venue: VenueId) -> Decimal {
    match venue {
        VenueId::Hyperliquid => Decimal::new(389, 6), // 0.000389
        VenueId::Bybit => Decimal::new(6, 4),         // 0.0006
        VenueId::Binance => Decimal::new(4, 4),       // 0.0004
        VenueId::Gateio => Decimal::new(5, 4),        // 0.0005
        VenueId::Bitget => Decimal::new(6, 4),        // 0.0006
        VenueId::KuCoin => Decimal::new(6, 4),        // 0.0006
    }
}

/// Codified per-venue maker defaults.
#[must_use]
pub fn default_maker_fee(venue: VenueId) -> Decimal {
    match venue {
        VenueId::Hyperliquid => Decimal::new(13, 5), // 0.00013
        VenueId::Bybit => Decimal::new(1, 4),        // 0.0001
        _ => Decimal::new(2, 4),                     // 0.0002
    }
}

impl AppConfig {
    /// Fee rates for a venue: config override if present, codified default
    /// otherwise.
    #[must_use]
    pub fn venue_fees(&self, venue: VenueId) -> FeesConfig {
        self.exchanges
            .get(venue.as_lower())
            .and_then(|v| v.fees)
            .unwrap_or(FeesConfig {
                maker: default_maker_fee(venue),
                taker: default_taker_fee(venue),
            })
    }
}

/// Recorder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLoggerConfig {
    /// Relative bid/ask change required to record a row in delta mode.
    pub price_change_threshold: Decimal,
    /// Flush interval in seconds.
    pub flush_interval_secs: u64,
}

impl Default for PriceLoggerConfig {
    fn default() -> Self {
        Self {
            price_change_threshold: Decimal::new(1, 5), // 1e-5
            flush_interval_secs: 5,
        }
    }
}

/// WebSocket supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsocketConfig {
    /// Base reconnect delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Reconnect attempts per backoff cycle.
    pub max_reconnect_attempts: u32,
    /// Keep-alive ping interval in seconds.
    pub ping_interval_secs: u64,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: 1,
            max_reconnect_attempts: 3,
            ping_interval_secs: 30,
        }
    }
}
