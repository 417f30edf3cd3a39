//! Slippage estimation from order-book depth.
//!
//! Pure function of the book and the requested `(side, size)`: walk the
//! levels, accumulate cost, and compare the average fill to the best price.
//! Books too shallow for the size yield the infeasible sentinel, which the
//! risk gate treats as an automatic reject.

use cross_arb_core::types::{OrderBook, Side};
use rust_decimal::Decimal;

/// Sentinel slippage percent meaning "book cannot absorb the size".
pub const INFEASIBLE_SLIPPAGE_PCT: Decimal = Decimal::from_parts(999, 0, 0, false, 0);

/// Result of a slippage estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlippageEstimate {
    /// Size-weighted average fill price. Zero when infeasible.
    pub avg_fill_price: Decimal,
    /// `|avg_fill - best| / best * 100`, or the infeasible sentinel.
    pub slippage_pct: Decimal,
}

impl SlippageEstimate {
    /// Whether the book could absorb the full size.
    #[must_use]
    pub fn is_feasible(&self) -> bool {
        self.slippage_pct < INFEASIBLE_SLIPPAGE_PCT
    }

    fn infeasible() -> Self {
        Self {
            avg_fill_price: Decimal::ZERO,
            slippage_pct: INFEASIBLE_SLIPPAGE_PCT,
        }
    }
}

/// Estimates average fill price and slippage for taking `size` from the
/// book on `side` (Buy walks asks ascending, Sell walks bids descending).
#[must_use]
pub fn estimate(book: &OrderBook, side: Side, size: Decimal) -> SlippageEstimate {
    if size <= Decimal::ZERO {
        return SlippageEstimate::infeasible();
    }

    let levels = match side {
        Side::Buy => &book.asks,
        Side::Sell => &book.bids,
    };
    let Some(&(best_price, _)) = levels.first() else {
        return SlippageEstimate::infeasible();
    };

    let mut remaining = size;
    let mut total_cost = Decimal::ZERO;
    for &(price, level_size) in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let fill = remaining.min(level_size);
        total_cost += price * fill;
        remaining -= fill;
    }

    if remaining > Decimal::ZERO {
        return SlippageEstimate::infeasible();
    }

    let avg_fill_price = total_cost / size;
    let slippage_pct = (avg_fill_price - best_price).abs() / best_price * Decimal::ONE_HUNDRED;
    SlippageEstimate {
        avg_fill_price,
        slippage_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook {
            symbol: "BTC".to_string(),
            bids: vec![
                (dec!(100), dec!(1)),
                (dec!(99), dec!(2)),
                (dec!(98), dec!(3)),
            ],
            asks: vec![
                (dec!(101), dec!(1)),
                (dec!(102), dec!(2)),
                (dec!(103), dec!(3)),
            ],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_buy_within_best_level_has_zero_slippage() {
        let est = estimate(&book(), Side::Buy, dec!(1));
        assert!(est.is_feasible());
        assert_eq!(est.avg_fill_price, dec!(101));
        assert_eq!(est.slippage_pct, dec!(0));
    }

    #[test]
    fn test_buy_walks_levels() {
        // 1 @ 101 + 1 @ 102 = 203 / 2 = 101.5 avg; 0.4950.. % of 101.
        let est = estimate(&book(), Side::Buy, dec!(2));
        assert!(est.is_feasible());
        assert_eq!(est.avg_fill_price, dec!(101.5));
        assert!(est.slippage_pct > dec!(0.49) && est.slippage_pct < dec!(0.50));
    }

    #[test]
    fn test_sell_walks_bids_descending() {
        // 1 @ 100 + 2 @ 99 = 298 / 3 avg; best bid 100.
        let est = estimate(&book(), Side::Sell, dec!(3));
        assert!(est.is_feasible());
        assert_eq!(est.avg_fill_price, dec!(298) / dec!(3));
    }

    #[test]
    fn test_exact_exhaustion_is_feasible_one_more_is_not() {
        // Total ask liquidity is 6.
        let exact = estimate(&book(), Side::Buy, dec!(6));
        assert!(exact.is_feasible());

        let over = estimate(&book(), Side::Buy, dec!(7));
        assert!(!over.is_feasible());
        assert_eq!(over.slippage_pct, INFEASIBLE_SLIPPAGE_PCT);
    }

    #[test]
    fn test_empty_book_is_infeasible() {
        let empty = OrderBook {
            symbol: "BTC".to_string(),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: Utc::now(),
        };
        assert!(!estimate(&empty, Side::Buy, dec!(1)).is_feasible());
        assert!(!estimate(&empty, Side::Sell, dec!(1)).is_feasible());
    }

    #[test]
    fn test_zero_size_is_infeasible() {
        assert!(!estimate(&book(), Side::Buy, dec!(0)).is_feasible());
    }
}
