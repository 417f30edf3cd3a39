//! Cross-venue dislocation detection.
//!
//! On every quote update the detector scans all directional venue pairs for
//! the triggering symbol and emits [`Opportunity`]s that clear the spread
//! and profit thresholds. Sizing is volume-capped; ids are monotonic.

use chrono::{DateTime, Utc};
use cross_arb_core::config::ArbitrageConfig;
use cross_arb_core::types::{Quote, VenueId};
use cross_arb_ingest::PriceCache;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

// =============================================================================
// Opportunity
// =============================================================================

/// A detected cross-venue arbitrage opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Monotonic identifier, `ARB_NNNNNN`.
    pub id: String,
    /// Canonical short symbol.
    pub symbol: String,
    /// Venue to buy on.
    pub buy_venue: VenueId,
    /// Venue to sell on.
    pub sell_venue: VenueId,
    /// Ask on the buy venue.
    pub buy_price: Decimal,
    /// Bid on the sell venue.
    pub sell_price: Decimal,
    /// `(sell_price - buy_price) / buy_price * 100`.
    pub spread_pct: Decimal,
    /// Recommended trade size in base asset.
    pub recommended_size: Decimal,
    /// Expected gross profit in quote asset.
    pub expected_profit: Decimal,
    /// Estimated buy-side slippage percent, once estimated.
    pub slippage_buy: Option<Decimal>,
    /// Estimated sell-side slippage percent, once estimated.
    pub slippage_sell: Option<Decimal>,
    /// Detection time (UTC).
    pub timestamp: DateTime<Utc>,
}

impl Opportunity {
    /// Spread percent minus the round-trip slippage estimate.
    #[must_use]
    pub fn net_spread(&self) -> Decimal {
        let slippage = self.slippage_buy.unwrap_or(Decimal::ZERO)
            + self.slippage_sell.unwrap_or(Decimal::ZERO);
        self.spread_pct - slippage
    }

    /// Position value in quote asset.
    #[must_use]
    pub fn position_value(&self) -> Decimal {
        self.recommended_size * self.buy_price
    }
}

// =============================================================================
// Detector
// =============================================================================

/// Detection thresholds and sizing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum spread percent to qualify (inclusive).
    pub min_spread_pct: Decimal,
    /// Maximum position size in quote asset.
    pub max_position_size_usd: Decimal,
    /// Minimum expected profit in quote asset.
    pub min_profit_usd: Decimal,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_spread_pct: dec!(0.1),
            max_position_size_usd: dec!(10000),
            min_profit_usd: dec!(10),
        }
    }
}

impl From<&ArbitrageConfig> for DetectorConfig {
    fn from(config: &ArbitrageConfig) -> Self {
        Self {
            min_spread_pct: config.min_spread_threshold,
            max_position_size_usd: config.max_position_size,
            min_profit_usd: config.min_profit_threshold,
        }
    }
}

impl DetectorConfig {
    /// Sets the minimum spread percent.
    #[must_use]
    pub fn with_min_spread_pct(mut self, pct: Decimal) -> Self {
        self.min_spread_pct = pct;
        self
    }

    /// Sets the maximum position size.
    #[must_use]
    pub fn with_max_position_size_usd(mut self, usd: Decimal) -> Self {
        self.max_position_size_usd = usd;
        self
    }

    /// Sets the minimum profit.
    #[must_use]
    pub fn with_min_profit_usd(mut self, usd: Decimal) -> Self {
        self.min_profit_usd = usd;
        self
    }
}

/// Scans venue pairs for qualifying dislocations on each quote update.
#[derive(Debug)]
pub struct Detector {
    config: DetectorConfig,
    counter: u64,
}

impl Detector {
    /// Creates a detector.
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self { config, counter: 0 }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Total opportunities emitted since startup.
    #[must_use]
    pub fn opportunities_emitted(&self) -> u64 {
        self.counter
    }

    /// Evaluates all directional venue pairs for the symbol of the
    /// triggering quote. The cache must already contain the triggering
    /// quote.
    ///
    /// Qualifying opportunities are returned in `spread_pct`-descending
    /// order, ids assigned in that order.
    pub fn on_quote(&mut self, quote: &Quote, cache: &PriceCache) -> Vec<Opportunity> {
        let prices = cache.snapshot(&quote.symbol);
        if prices.len() < 2 {
            return Vec::new();
        }

        let mut found = Vec::new();
        let venues: Vec<VenueId> = prices.keys().copied().collect();
        for (i, &a) in venues.iter().enumerate() {
            for &b in &venues[i + 1..] {
                if let Some(opp) = self.check_direction(&prices[&a], &prices[&b]) {
                    found.push(opp);
                }
                if let Some(opp) = self.check_direction(&prices[&b], &prices[&a]) {
                    found.push(opp);
                }
            }
        }

        found.sort_by(|x, y| y.spread_pct.cmp(&x.spread_pct));
        for opp in &mut found {
            self.counter += 1;
            opp.id = format!("ARB_{:06}", self.counter);
            info!(
                id = %opp.id,
                symbol = %opp.symbol,
                buy_venue = %opp.buy_venue,
                sell_venue = %opp.sell_venue,
                spread_pct = %opp.spread_pct,
                expected_profit = %opp.expected_profit,
                "Arbitrage opportunity detected"
            );
        }
        found
    }

    /// Checks one direction: buy at `buy.ask`, sell at `sell.bid`.
    fn check_direction(&self, buy: &Quote, sell: &Quote) -> Option<Opportunity> {
        if sell.bid <= buy.ask {
            return None;
        }

        let spread = sell.bid - buy.ask;
        let spread_pct = spread / buy.ask * dec!(100);
        if spread_pct < self.config.min_spread_pct {
            trace!(
                buy_venue = %buy.venue,
                sell_venue = %sell.venue,
                spread_pct = %spread_pct,
                "Spread below threshold"
            );
            return None;
        }

        let recommended_size = self.recommended_size(buy, sell);
        if recommended_size <= Decimal::ZERO {
            return None;
        }

        let expected_profit = spread * recommended_size;
        if expected_profit < self.config.min_profit_usd {
            trace!(
                buy_venue = %buy.venue,
                sell_venue = %sell.venue,
                expected_profit = %expected_profit,
                "Profit below threshold"
            );
            return None;
        }

        Some(Opportunity {
            id: String::new(), // assigned after tie-break ordering
            symbol: buy.symbol.clone(),
            buy_venue: buy.venue,
            sell_venue: sell.venue,
            buy_price: buy.ask,
            sell_price: sell.bid,
            spread_pct,
            recommended_size,
            expected_profit,
            slippage_buy: None,
            slippage_sell: None,
            timestamp: Utc::now(),
        })
    }

    /// Size in base asset: `min(maxUsd, 0.1 * min(vol24h) * ask) / ask`,
    /// with the volume cap replaced by `maxUsd` when either venue lacks
    /// volume data.
    fn recommended_size(&self, buy: &Quote, sell: &Quote) -> Decimal {
        if buy.ask <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let size_usd = match (buy.volume_24h, sell.volume_24h) {
            (Some(buy_vol), Some(sell_vol)) => {
                let volume_cap = dec!(0.1) * buy_vol.min(sell_vol) * buy.ask;
                self.config.max_position_size_usd.min(volume_cap)
            }
            _ => self.config.max_position_size_usd,
        };
        size_usd / buy.ask
    }
}
