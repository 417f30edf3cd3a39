//! Stateful risk gate.
//!
//! Twelve ordered fast-reject rules evaluated against exposure, cooldown,
//! slippage, balance, and daily-loss state. Opportunities are processed
//! serially in emission order; the gate is the sole mutator of its state.
//!
//! Exposure is accounted per leg: each leg adds its notional to its venue
//! and to its symbol, so the venue and symbol sums always agree.

use chrono::{DateTime, Duration, Utc};
use cross_arb_core::config::RiskConfig;
use cross_arb_core::types::{Balance, VenueId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::detector::Opportunity;
use crate::position::ArbitragePosition;
use crate::slippage::INFEASIBLE_SLIPPAGE_PCT;

/// Per-venue balances, keyed by venue then asset.
pub type VenueBalances = HashMap<VenueId, HashMap<String, Balance>>;

/// Quote asset assumed for canonical short symbols.
const QUOTE_ASSET: &str = "USDT";

// =============================================================================
// Rejections
// =============================================================================

/// One variant per risk rule; the display string is the logged reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RiskRejection {
    /// Rule 1: position value above the per-position cap.
    #[error("position too large: {value} > {limit}")]
    PositionTooLarge {
        /// Proposed value.
        value: Decimal,
        /// Configured cap.
        limit: Decimal,
    },

    /// Rule 2: too many active positions on this symbol.
    #[error("too many positions for {symbol}: {count} >= {limit}")]
    TooManyPositionsForSymbol {
        /// Symbol concerned.
        symbol: String,
        /// Active count.
        count: usize,
        /// Configured cap.
        limit: usize,
    },

    /// Rule 3: too many active positions overall.
    #[error("too many total positions: {count} >= {limit}")]
    TooManyTotalPositions {
        /// Active count.
        count: usize,
        /// Configured cap.
        limit: usize,
    },

    /// Rule 4: total exposure cap would be breached.
    #[error("total exposure limit exceeded: {current} + {addition} > {limit}")]
    TotalExposureExceeded {
        /// Current total exposure.
        current: Decimal,
        /// Proposed addition.
        addition: Decimal,
        /// Configured cap.
        limit: Decimal,
    },

    /// Rule 5: a venue exposure cap would be breached.
    #[error("venue exposure limit exceeded on {venue}: {current} + {addition} > {limit}")]
    VenueExposureExceeded {
        /// Venue concerned.
        venue: VenueId,
        /// Current venue exposure.
        current: Decimal,
        /// Proposed addition.
        addition: Decimal,
        /// Configured cap.
        limit: Decimal,
    },

    /// Rule 6: estimated slippage above tolerance (or infeasible).
    #[error("slippage too high on {leg} leg: {slippage}% > {limit}%")]
    SlippageTooHigh {
        /// "buy" or "sell".
        leg: &'static str,
        /// Estimated slippage percent.
        slippage: Decimal,
        /// Configured tolerance.
        limit: Decimal,
    },

    /// Rule 7: spread net of slippage below the minimum.
    #[error("net spread too low: {net_spread}% < {limit}%")]
    NetSpreadTooLow {
        /// Net spread percent.
        net_spread: Decimal,
        /// Configured minimum.
        limit: Decimal,
    },

    /// Rule 8: per-symbol cooldown still active.
    #[error("cooldown active for {symbol}: {remaining_secs}s remaining")]
    CooldownActive {
        /// Symbol concerned.
        symbol: String,
        /// Seconds until the cooldown expires.
        remaining_secs: i64,
    },

    /// Rule 9: daily loss limit reached.
    #[error("daily loss limit reached: {daily_pnl}")]
    DailyLossLimit {
        /// Current daily PnL.
        daily_pnl: Decimal,
    },

    /// Rule 10: daily drawdown limit reached.
    #[error("max drawdown reached: {drawdown}")]
    DrawdownLimit {
        /// Current drawdown.
        drawdown: Decimal,
    },

    /// Rule 11: venue or symbol is blocked.
    #[error("blocked: {what}")]
    Blocked {
        /// Which symbol/venue is blocked.
        what: String,
    },

    /// Rule 12: insufficient free balance on a venue.
    #[error("insufficient {asset} balance on {venue}: need {required}, have {available}")]
    InsufficientBalance {
        /// Venue concerned.
        venue: VenueId,
        /// Asset required.
        asset: String,
        /// Amount needed.
        required: Decimal,
        /// Amount available.
        available: Decimal,
    },
}

// =============================================================================
// Risk Gate
// =============================================================================

/// Mutable risk state, owned exclusively by the gate.
#[derive(Debug, Default)]
struct RiskState {
    exposure_by_symbol: HashMap<String, Decimal>,
    exposure_by_venue: HashMap<VenueId, Decimal>,
    daily_pnl: Decimal,
    drawdown_today: Decimal,
    last_trade_time: HashMap<String, DateTime<Utc>>,
    blocked_symbols: HashMap<String, DateTime<Utc>>,
    blocked_venues: HashMap<VenueId, DateTime<Utc>>,
}

/// Read-only snapshot of the gate's state for observability.
#[derive(Debug, Clone)]
pub struct RiskStatus {
    /// Exposure per symbol.
    pub exposure_by_symbol: HashMap<String, Decimal>,
    /// Exposure per venue.
    pub exposure_by_venue: HashMap<VenueId, Decimal>,
    /// Daily realized PnL.
    pub daily_pnl: Decimal,
    /// Worst single-position loss today.
    pub drawdown_today: Decimal,
    /// Currently blocked symbols.
    pub blocked_symbols: Vec<String>,
    /// Currently blocked venues.
    pub blocked_venues: Vec<VenueId>,
}

/// Validates opportunities and tracks exposure, cooldowns, and daily PnL.
pub struct RiskGate {
    params: RiskConfig,
    state: RiskState,
}

impl RiskGate {
    /// Creates a gate with the given limits.
    #[must_use]
    pub fn new(params: RiskConfig) -> Self {
        Self {
            params,
            state: RiskState::default(),
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn params(&self) -> &RiskConfig {
        &self.params
    }

    /// Validates an opportunity against every rule, first rejection wins.
    ///
    /// # Errors
    ///
    /// Returns the first [`RiskRejection`] that fires.
    pub fn validate(
        &mut self,
        opp: &Opportunity,
        active_positions: &[ArbitragePosition],
        balances: &VenueBalances,
        now: DateTime<Utc>,
    ) -> Result<(), RiskRejection> {
        self.purge_expired_blocks(now);

        let position_value = opp.position_value();

        // 1. Per-position size cap.
        if position_value > self.params.max_position_size {
            return Err(RiskRejection::PositionTooLarge {
                value: position_value,
                limit: self.params.max_position_size,
            });
        }

        // 2. Per-symbol position count.
        let symbol_count = active_positions
            .iter()
            .filter(|p| p.symbol == opp.symbol)
            .count();
        if symbol_count >= self.params.max_positions_per_symbol {
            return Err(RiskRejection::TooManyPositionsForSymbol {
                symbol: opp.symbol.clone(),
                count: symbol_count,
                limit: self.params.max_positions_per_symbol,
            });
        }

        // 3. Total position count.
        if active_positions.len() >= self.params.max_total_positions {
            return Err(RiskRejection::TooManyTotalPositions {
                count: active_positions.len(),
                limit: self.params.max_total_positions,
            });
        }

        // 4. Total exposure.
        let total_exposure: Decimal = self.state.exposure_by_symbol.values().copied().sum();
        if total_exposure + position_value > self.params.max_total_exposure {
            return Err(RiskRejection::TotalExposureExceeded {
                current: total_exposure,
                addition: position_value,
                limit: self.params.max_total_exposure,
            });
        }

        // 5. Per-venue exposure, both legs.
        for venue in [opp.buy_venue, opp.sell_venue] {
            let current = self
                .state
                .exposure_by_venue
                .get(&venue)
                .copied()
                .unwrap_or(Decimal::ZERO);
            if current + position_value > self.params.max_venue_exposure {
                return Err(RiskRejection::VenueExposureExceeded {
                    venue,
                    current,
                    addition: position_value,
                    limit: self.params.max_venue_exposure,
                });
            }
        }

        // 6. Slippage tolerance; the infeasible sentinel always exceeds it.
        for (leg, slippage) in [("buy", opp.slippage_buy), ("sell", opp.slippage_sell)] {
            if let Some(slippage) = slippage {
                if slippage > self.params.max_slippage_percentage
                    || slippage >= INFEASIBLE_SLIPPAGE_PCT
                {
                    return Err(RiskRejection::SlippageTooHigh {
                        leg,
                        slippage,
                        limit: self.params.max_slippage_percentage,
                    });
                }
            }
        }

        // 7. Net spread.
        let net_spread = opp.net_spread();
        if net_spread < self.params.min_net_spread {
            return Err(RiskRejection::NetSpreadTooLow {
                net_spread,
                limit: self.params.min_net_spread,
            });
        }

        // 8. Cooldown.
        if let Some(last) = self.state.last_trade_time.get(&opp.symbol) {
            let elapsed = now - *last;
            let cooldown = Duration::seconds(self.params.cooldown_period_secs as i64);
            if elapsed < cooldown {
                return Err(RiskRejection::CooldownActive {
                    symbol: opp.symbol.clone(),
                    remaining_secs: (cooldown - elapsed).num_seconds(),
                });
            }
        }

        // 9. Daily loss.
        if self.state.daily_pnl <= -self.params.max_daily_loss {
            return Err(RiskRejection::DailyLossLimit {
                daily_pnl: self.state.daily_pnl,
            });
        }

        // 10. Drawdown.
        if self.state.drawdown_today >= self.params.max_drawdown {
            return Err(RiskRejection::DrawdownLimit {
                drawdown: self.state.drawdown_today,
            });
        }

        // 11. Blocked lists.
        if self.state.blocked_symbols.contains_key(&opp.symbol) {
            return Err(RiskRejection::Blocked {
                what: format!("symbol {}", opp.symbol),
            });
        }
        for venue in [opp.buy_venue, opp.sell_venue] {
            if self.state.blocked_venues.contains_key(&venue) {
                return Err(RiskRejection::Blocked {
                    what: format!("venue {venue}"),
                });
            }
        }

        // 12. Balances: quote on the buy venue, base on the sell venue.
        let required_quote = position_value + self.params.min_venue_balance;
        let quote_free = free_balance(balances, opp.buy_venue, QUOTE_ASSET);
        if quote_free < required_quote {
            return Err(RiskRejection::InsufficientBalance {
                venue: opp.buy_venue,
                asset: QUOTE_ASSET.to_string(),
                required: required_quote,
                available: quote_free,
            });
        }
        let base_free = free_balance(balances, opp.sell_venue, &opp.symbol);
        if base_free < opp.recommended_size {
            return Err(RiskRejection::InsufficientBalance {
                venue: opp.sell_venue,
                asset: opp.symbol.clone(),
                required: opp.recommended_size,
                available: base_free,
            });
        }

        Ok(())
    }

    /// Records an opened position: per-leg exposure plus the cooldown stamp.
    pub fn position_opened(&mut self, position: &ArbitragePosition, now: DateTime<Utc>) {
        let leg_value = position.value();
        for venue in [position.long_venue, position.short_venue] {
            *self.state.exposure_by_venue.entry(venue).or_default() += leg_value;
            *self
                .state
                .exposure_by_symbol
                .entry(position.symbol.clone())
                .or_default() += leg_value;
        }
        self.state
            .last_trade_time
            .insert(position.symbol.clone(), now);
        info!(position_id = %position.id, leg_value = %leg_value, "Risk state updated for open");
    }

    /// Records a closed (or failed-and-flattened) position: releases
    /// exposure and folds realized PnL into the daily totals.
    pub fn position_closed(&mut self, position: &ArbitragePosition) {
        let leg_value = position.value();
        for venue in [position.long_venue, position.short_venue] {
            let entry = self.state.exposure_by_venue.entry(venue).or_default();
            *entry = (*entry - leg_value).max(Decimal::ZERO);
            let entry = self
                .state
                .exposure_by_symbol
                .entry(position.symbol.clone())
                .or_default();
            *entry = (*entry - leg_value).max(Decimal::ZERO);
        }
        self.state.daily_pnl += position.realized_pnl;
        if position.realized_pnl < Decimal::ZERO {
            self.state.drawdown_today = self.state.drawdown_today.max(-position.realized_pnl);
        }
        info!(
            position_id = %position.id,
            realized_pnl = %position.realized_pnl,
            daily_pnl = %self.state.daily_pnl,
            "Risk state updated for close"
        );
    }

    /// Blocks a symbol until `now + duration`. Expiry is enforced on every
    /// validate, so no block is ever permanent.
    pub fn block_symbol(&mut self, symbol: &str, duration: Duration, now: DateTime<Utc>) {
        warn!(symbol = %symbol, minutes = duration.num_minutes(), "Blocking symbol");
        self.state
            .blocked_symbols
            .insert(symbol.to_string(), now + duration);
    }

    /// Blocks a venue until `now + duration`.
    pub fn block_venue(&mut self, venue: VenueId, duration: Duration, now: DateTime<Utc>) {
        warn!(venue = %venue, minutes = duration.num_minutes(), "Blocking venue");
        self.state.blocked_venues.insert(venue, now + duration);
    }

    /// Resets daily counters. Invoked once per UTC day.
    pub fn reset_daily(&mut self) {
        self.state.daily_pnl = Decimal::ZERO;
        self.state.drawdown_today = Decimal::ZERO;
        info!("Daily risk counters reset");
    }

    /// Read-only snapshot for observability.
    #[must_use]
    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            exposure_by_symbol: self.state.exposure_by_symbol.clone(),
            exposure_by_venue: self.state.exposure_by_venue.clone(),
            daily_pnl: self.state.daily_pnl,
            drawdown_today: self.state.drawdown_today,
            blocked_symbols: self.state.blocked_symbols.keys().cloned().collect(),
            blocked_venues: self.state.blocked_venues.keys().copied().collect(),
        }
    }

    fn purge_expired_blocks(&mut self, now: DateTime<Utc>) {
        self.state.blocked_symbols.retain(|_, until| *until > now);
        self.state.blocked_venues.retain(|_, until| *until > now);
    }
}

fn free_balance(balances: &VenueBalances, venue: VenueId, asset: &str) -> Decimal {
    balances
        .get(&venue)
        .and_then(|assets| assets.get(asset))
        .map_or(Decimal::ZERO, |b| b.free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn opportunity(size: Decimal, price: Decimal) -> Opportunity {
        Opportunity {
            id: "ARB_000001".to_string(),
            symbol: "BTC".to_string(),
            buy_venue: VenueId::Binance,
            sell_venue: VenueId::Bybit,
            buy_price: price,
            sell_price: price * dec!(1.005),
            spread_pct: dec!(0.5),
            recommended_size: size,
            expected_profit: dec!(50),
            slippage_buy: Some(dec!(0.05)),
            slippage_sell: Some(dec!(0.05)),
            timestamp: Utc::now(),
        }
    }

    fn ample_balances() -> VenueBalances {
        let mut balances = VenueBalances::new();
        for venue in [VenueId::Binance, VenueId::Bybit] {
            let mut assets = HashMap::new();
            assets.insert(
                "USDT".to_string(),
                Balance {
                    asset: "USDT".to_string(),
                    free: dec!(1_000_000),
                    locked: Decimal::ZERO,
                },
            );
            assets.insert(
                "BTC".to_string(),
                Balance {
                    asset: "BTC".to_string(),
                    free: dec!(1_000),
                    locked: Decimal::ZERO,
                },
            );
            balances.insert(venue, assets);
        }
        balances
    }

    fn open_position(symbol: &str, value: Decimal) -> ArbitragePosition {
        use cross_arb_core::types::{Order, OrderStatus, OrderType, Side};
        let order = Order {
            id: "o1".to_string(),
            client_order_id: "c1".to_string(),
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            price: None,
            quantity: dec!(1),
            filled: dec!(1),
            avg_fill_price: Some(value),
            status: OrderStatus::Filled,
            timestamp: Utc::now(),
            fee: None,
        };
        ArbitragePosition {
            id: "p1".to_string(),
            opportunity_id: "ARB_000001".to_string(),
            symbol: symbol.to_string(),
            long_venue: VenueId::Binance,
            short_venue: VenueId::Bybit,
            size: dec!(1),
            entry_spread: dec!(0.5),
            exit_target_pct: dec!(0.1),
            long_order: Some(order.clone()),
            short_order: Some(order),
            close_long_order: None,
            close_short_order: None,
            created_at: Utc::now(),
            opened_at: Some(Utc::now()),
            closed_at: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            status: crate::position::PositionStatus::Open,
            error_message: None,
            residual_exposure: false,
        }
    }

    #[test]
    fn test_accept_within_all_limits() {
        let mut gate = RiskGate::new(RiskConfig::default());
        let result = gate.validate(
            &opportunity(dec!(0.05), dec!(100_000)),
            &[],
            &ample_balances(),
            Utc::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_position_too_large() {
        let mut gate = RiskGate::new(RiskConfig::default());
        // 1 BTC * $100k = $100k > $10k cap.
        let result = gate.validate(
            &opportunity(dec!(1), dec!(100_000)),
            &[],
            &ample_balances(),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(RiskRejection::PositionTooLarge { .. })
        ));
    }

    #[test]
    fn test_too_many_positions_per_symbol() {
        let mut gate = RiskGate::new(RiskConfig {
            max_positions_per_symbol: 1,
            ..RiskConfig::default()
        });
        let active = vec![open_position("BTC", dec!(100))];
        let result = gate.validate(
            &opportunity(dec!(0.05), dec!(100_000)),
            &active,
            &ample_balances(),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(RiskRejection::TooManyPositionsForSymbol { .. })
        ));
    }

    #[test]
    fn test_cooldown_rejection() {
        // Seed scenario: accept at t=0, reject an equal opportunity 100 s
        // later under a 300 s cooldown.
        let mut gate = RiskGate::new(RiskConfig::default());
        let t0 = Utc::now();
        let position = open_position("BTC", dec!(100));
        gate.position_opened(&position, t0);

        let result = gate.validate(
            &opportunity(dec!(0.05), dec!(100_000)),
            &[],
            &ample_balances(),
            t0 + Duration::seconds(100),
        );
        match result {
            Err(RiskRejection::CooldownActive { remaining_secs, .. }) => {
                assert_eq!(remaining_secs, 200);
            }
            other => panic!("expected cooldown rejection, got {other:?}"),
        }

        // After the cooldown the same opportunity passes.
        let result = gate.validate(
            &opportunity(dec!(0.05), dec!(100_000)),
            &[],
            &ample_balances(),
            t0 + Duration::seconds(301),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_slippage_rejection_including_sentinel() {
        let mut gate = RiskGate::new(RiskConfig::default());
        let mut opp = opportunity(dec!(0.05), dec!(100_000));
        opp.slippage_buy = Some(dec!(0.6));
        assert!(matches!(
            gate.validate(&opp, &[], &ample_balances(), Utc::now()),
            Err(RiskRejection::SlippageTooHigh { leg: "buy", .. })
        ));

        let mut opp = opportunity(dec!(0.05), dec!(100_000));
        opp.slippage_sell = Some(INFEASIBLE_SLIPPAGE_PCT);
        assert!(matches!(
            gate.validate(&opp, &[], &ample_balances(), Utc::now()),
            Err(RiskRejection::SlippageTooHigh { leg: "sell", .. })
        ));
    }

    #[test]
    fn test_net_spread_rejection() {
        let mut gate = RiskGate::new(RiskConfig::default());
        let mut opp = opportunity(dec!(0.05), dec!(100_000));
        // 0.5 % spread minus 0.2 + 0.2 slippage leaves 0.1 % < 0.2 % min.
        opp.slippage_buy = Some(dec!(0.2));
        opp.slippage_sell = Some(dec!(0.2));
        assert!(matches!(
            gate.validate(&opp, &[], &ample_balances(), Utc::now()),
            Err(RiskRejection::NetSpreadTooLow { .. })
        ));
    }

    #[test]
    fn test_daily_loss_halts_trading() {
        let mut gate = RiskGate::new(RiskConfig::default());
        let mut position = open_position("BTC", dec!(100));
        position.realized_pnl = dec!(-1500);
        gate.position_closed(&position);

        assert!(matches!(
            gate.validate(
                &opportunity(dec!(0.05), dec!(100_000)),
                &[],
                &ample_balances(),
                Utc::now()
            ),
            Err(RiskRejection::DailyLossLimit { .. })
        ));

        // The daily reset clears the halt.
        gate.reset_daily();
        assert!(gate
            .validate(
                &opportunity(dec!(0.05), dec!(100_000)),
                &[],
                &ample_balances(),
                Utc::now()
            )
            .is_ok());
    }

    #[test]
    fn test_timed_block_expires_automatically() {
        let mut gate = RiskGate::new(RiskConfig::default());
        let now = Utc::now();
        gate.block_symbol("BTC", Duration::minutes(60), now);

        assert!(matches!(
            gate.validate(
                &opportunity(dec!(0.05), dec!(100_000)),
                &[],
                &ample_balances(),
                now + Duration::minutes(30)
            ),
            Err(RiskRejection::Blocked { .. })
        ));

        // Past the expiry the block lifts without any explicit unblock.
        assert!(gate
            .validate(
                &opportunity(dec!(0.05), dec!(100_000)),
                &[],
                &ample_balances(),
                now + Duration::minutes(61)
            )
            .is_ok());
    }

    #[test]
    fn test_blocked_venue() {
        let mut gate = RiskGate::new(RiskConfig::default());
        let now = Utc::now();
        gate.block_venue(VenueId::Bybit, Duration::minutes(60), now);
        assert!(matches!(
            gate.validate(
                &opportunity(dec!(0.05), dec!(100_000)),
                &[],
                &ample_balances(),
                now
            ),
            Err(RiskRejection::Blocked { .. })
        ));
    }

    #[test]
    fn test_insufficient_balances() {
        let mut gate = RiskGate::new(RiskConfig::default());

        // Thin quote balance on the buy venue.
        let mut balances = ample_balances();
        balances
            .get_mut(&VenueId::Binance)
            .unwrap()
            .get_mut("USDT")
            .unwrap()
            .free = dec!(100);
        assert!(matches!(
            gate.validate(
                &opportunity(dec!(0.05), dec!(100_000)),
                &[],
                &balances,
                Utc::now()
            ),
            Err(RiskRejection::InsufficientBalance { venue: VenueId::Binance, .. })
        ));

        // Thin base balance on the sell venue.
        let mut balances = ample_balances();
        balances
            .get_mut(&VenueId::Bybit)
            .unwrap()
            .get_mut("BTC")
            .unwrap()
            .free = dec!(0.01);
        assert!(matches!(
            gate.validate(
                &opportunity(dec!(0.05), dec!(100_000)),
                &[],
                &balances,
                Utc::now()
            ),
            Err(RiskRejection::InsufficientBalance { venue: VenueId::Bybit, .. })
        ));
    }

    #[test]
    fn test_exposure_sums_stay_consistent() {
        let mut gate = RiskGate::new(RiskConfig::default());
        let now = Utc::now();
        let position = open_position("BTC", dec!(5_000));
        gate.position_opened(&position, now);

        let status = gate.status();
        let venue_sum: Decimal = status.exposure_by_venue.values().copied().sum();
        let symbol_sum: Decimal = status.exposure_by_symbol.values().copied().sum();
        assert_eq!(venue_sum, symbol_sum);
        assert_eq!(venue_sum, dec!(10_000)); // one leg per venue

        gate.position_closed(&position);
        let status = gate.status();
        let venue_sum: Decimal = status.exposure_by_venue.values().copied().sum();
        let symbol_sum: Decimal = status.exposure_by_symbol.values().copied().sum();
        assert_eq!(venue_sum, symbol_sum);
        assert_eq!(venue_sum, Decimal::ZERO);
    }
}
