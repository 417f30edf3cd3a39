//! Fee math for two-leg arbitrage trades.
//!
//! Rates come from config overrides with codified per-venue taker defaults.
//! Arbitrage legs cross the spread, so taker rates apply throughout.

use cross_arb_core::config::{default_maker_fee, default_taker_fee, AppConfig, FeesConfig};
use cross_arb_core::types::VenueId;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Fee breakdown for one open (or close) of a two-leg pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairFees {
    /// Buy-leg fee in quote asset.
    pub buy_fee: Decimal,
    /// Sell-leg fee in quote asset.
    pub sell_fee: Decimal,
}

impl PairFees {
    /// Combined fee for both legs.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.buy_fee + self.sell_fee
    }
}

/// Computes venue fees for arbitrage legs.
#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    overrides: HashMap<VenueId, FeesConfig>,
}

impl FeeCalculator {
    /// Creates a calculator with codified defaults only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a calculator honoring config overrides.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut overrides = HashMap::new();
        for venue in VenueId::ALL {
            overrides.insert(venue, config.venue_fees(venue));
        }
        Self { overrides }
    }

    /// Taker rate for a venue.
    #[must_use]
    pub fn taker(&self, venue: VenueId) -> Decimal {
        self.overrides
            .get(&venue)
            .map_or_else(|| default_taker_fee(venue), |f| f.taker)
    }

    /// Maker rate for a venue.
    #[must_use]
    pub fn maker(&self, venue: VenueId) -> Decimal {
        self.overrides
            .get(&venue)
            .map_or_else(|| default_maker_fee(venue), |f| f.maker)
    }

    /// Taker fees for one simultaneous two-leg fill of `notional` quote
    /// asset per leg.
    #[must_use]
    pub fn pair_fees(&self, buy_venue: VenueId, sell_venue: VenueId, notional: Decimal) -> PairFees {
        PairFees {
            buy_fee: notional * self.taker(buy_venue),
            sell_fee: notional * self.taker(sell_venue),
        }
    }

    /// Total taker fee for a full round trip (open pair + close pair).
    #[must_use]
    pub fn round_trip_fee(
        &self,
        buy_venue: VenueId,
        sell_venue: VenueId,
        notional: Decimal,
    ) -> Decimal {
        self.pair_fees(buy_venue, sell_venue, notional).total() * Decimal::TWO
    }

    /// A spread threshold (percent) covering the worst round-trip taker
    /// cost across the venue set, with a 2.5x safety margin.
    #[must_use]
    pub fn fee_adjusted_threshold(&self, venues: &[VenueId], base_threshold_pct: Decimal) -> Decimal {
        let mut worst_pair_pct = Decimal::ZERO;
        for (i, &a) in venues.iter().enumerate() {
            for &b in &venues[i + 1..] {
                let pair_pct = (self.taker(a) + self.taker(b)) * Decimal::ONE_HUNDRED;
                worst_pair_pct = worst_pair_pct.max(pair_pct);
            }
        }
        base_threshold_pct + worst_pair_pct * Decimal::new(25, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_codified_defaults() {
        let calc = FeeCalculator::new();
        assert_eq!(calc.taker(VenueId::Hyperliquid), dec!(0.000389));
        assert_eq!(calc.taker(VenueId::Binance), dec!(0.0004));
        assert_eq!(calc.maker(VenueId::Bybit), dec!(0.0001));
    }

    #[test]
    fn test_pair_fees() {
        let calc = FeeCalculator::new();
        let fees = calc.pair_fees(VenueId::Binance, VenueId::Bybit, dec!(10000));
        assert_eq!(fees.buy_fee, dec!(4));
        assert_eq!(fees.sell_fee, dec!(6));
        assert_eq!(fees.total(), dec!(10));
    }

    #[test]
    fn test_round_trip_doubles_pair() {
        let calc = FeeCalculator::new();
        let round_trip = calc.round_trip_fee(VenueId::Binance, VenueId::Bybit, dec!(10000));
        assert_eq!(round_trip, dec!(20));
    }

    #[test]
    fn test_fee_adjusted_threshold() {
        let calc = FeeCalculator::new();
        // Worst pair among Binance/Bybit is 0.0010 -> 0.10 %, margin 0.25 %.
        let threshold = calc.fee_adjusted_threshold(
            &[VenueId::Binance, VenueId::Bybit],
            dec!(0.5),
        );
        assert_eq!(threshold, dec!(0.75));
    }

    #[test]
    fn test_config_override_wins() {
        let mut config = AppConfig::default();
        config.exchanges.insert(
            "binance".to_string(),
            cross_arb_core::config::VenueConfig {
                fees: Some(FeesConfig {
                    maker: dec!(0.0001),
                    taker: dec!(0.0002),
                }),
                api_key: None,
                api_secret: None,
            },
        );
        let calc = FeeCalculator::from_config(&config);
        assert_eq!(calc.taker(VenueId::Binance), dec!(0.0002));
        assert_eq!(calc.taker(VenueId::Bybit), dec!(0.0006));
    }
}
