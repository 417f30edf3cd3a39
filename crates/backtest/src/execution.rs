//! Paper fill model.
//!
//! Backtests never touch a venue; fills are modeled as taker executions
//! paying a flat fee rate per leg and a slippage rate per side. A full
//! spread cycle is four legs (two in, two out) and two slippage hits.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Cost model for simulated fills.
#[derive(Debug, Clone, Copy)]
pub struct PaperFillModel {
    /// Taker fee per leg, as a fraction (0.0006 = 6 bps).
    pub fee_rate: Decimal,
    /// Slippage per side, as a fraction.
    pub slippage_rate: Decimal,
}

impl Default for PaperFillModel {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.0006),
            slippage_rate: dec!(0.0003),
        }
    }
}

impl PaperFillModel {
    /// Total round-trip cost in spread-percent terms:
    /// `4 * fee + 2 * slippage`, each scaled to percent.
    #[must_use]
    pub fn round_trip_cost_pct(&self) -> Decimal {
        dec!(4) * self.fee_rate * dec!(100) + dec!(2) * self.slippage_rate * dec!(100)
    }

    /// Net profit percent for a spread cycle entered at `entry_spread_pct`
    /// and exited at `exit_spread_pct`.
    #[must_use]
    pub fn net_profit_pct(&self, entry_spread_pct: Decimal, exit_spread_pct: Decimal) -> Decimal {
        (entry_spread_pct - exit_spread_pct) - self.round_trip_cost_pct()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_cost() {
        let model = PaperFillModel {
            fee_rate: dec!(0.0006),
            slippage_rate: dec!(0.0003),
        };
        // 4 * 0.06 % + 2 * 0.03 % = 0.30 %.
        assert_eq!(model.round_trip_cost_pct(), dec!(0.30));
    }

    #[test]
    fn test_net_profit_formula() {
        let model = PaperFillModel {
            fee_rate: dec!(0.0006),
            slippage_rate: dec!(0.0003),
        };
        // Enter at 0.8 %, exit at 0.1 %: 0.7 % gross minus 0.3 % costs.
        assert_eq!(model.net_profit_pct(dec!(0.8), dec!(0.1)), dec!(0.40));
    }

    #[test]
    fn test_zero_cost_model() {
        let model = PaperFillModel {
            fee_rate: Decimal::ZERO,
            slippage_rate: Decimal::ZERO,
        };
        assert_eq!(model.net_profit_pct(dec!(0.5), dec!(0.1)), dec!(0.4));
    }
}
