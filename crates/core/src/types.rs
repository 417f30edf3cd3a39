//! Shared market-data and trading types used across the workspace.
//!
//! Everything price- or size-shaped is a [`rust_decimal::Decimal`]; binary
//! floating point never touches the hot path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Venue Identifiers
// =============================================================================

/// Identifies a trading venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueId {
    /// Hyperliquid perpetuals DEX.
    Hyperliquid,
    /// Bybit derivatives.
    Bybit,
    /// Binance futures.
    Binance,
    /// Gate.io futures.
    Gateio,
    /// Bitget futures.
    Bitget,
    /// KuCoin futures.
    KuCoin,
}

impl VenueId {
    /// All known venues, in canonical order.
    pub const ALL: [Self; 6] = [
        Self::Hyperliquid,
        Self::Bybit,
        Self::Binance,
        Self::Gateio,
        Self::Bitget,
        Self::KuCoin,
    ];

    /// Returns the case-preserved canonical name (used in log files).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hyperliquid => "Hyperliquid",
            Self::Bybit => "Bybit",
            Self::Binance => "Binance",
            Self::Gateio => "Gateio",
            Self::Bitget => "Bitget",
            Self::KuCoin => "KuCoin",
        }
    }

    /// Returns the lowercase name used in file names and config keys.
    #[must_use]
    pub fn as_lower(self) -> &'static str {
        match self {
            Self::Hyperliquid => "hyperliquid",
            Self::Bybit => "bybit",
            Self::Binance => "binance",
            Self::Gateio => "gateio",
            Self::Bitget => "bitget",
            Self::KuCoin => "kucoin",
        }
    }
}

impl std::fmt::Display for VenueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VenueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hyperliquid" => Ok(Self::Hyperliquid),
            "bybit" => Ok(Self::Bybit),
            "binance" => Ok(Self::Binance),
            "gateio" | "gate" => Ok(Self::Gateio),
            "bitget" => Ok(Self::Bitget),
            "kucoin" => Ok(Self::KuCoin),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}

// =============================================================================
// Order Primitives
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy the base asset.
    Buy,
    /// Sell the base asset.
    Sell,
}

impl Side {
    /// Returns the opposite side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute immediately at the best available price.
    Market,
    /// Rest at a limit price.
    Limit,
}

/// Venue-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Submitted, not yet acknowledged.
    Pending,
    /// Acknowledged and resting.
    Open,
    /// Partially filled, remainder resting.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Cancelled before completion.
    Cancelled,
    /// Rejected by the venue.
    Rejected,
    /// Expired without filling.
    Expired,
}

impl OrderStatus {
    /// Returns true if the order can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Returns true if any quantity has been filled.
    #[must_use]
    pub fn is_fill(self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled)
    }
}

// =============================================================================
// Quote
// =============================================================================

/// An immutable normalized top-of-book snapshot from one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Venue the quote came from.
    pub venue: VenueId,
    /// Canonical short symbol (e.g. "BTC").
    pub symbol: String,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Size available at the best bid, when known.
    pub bid_size: Option<Decimal>,
    /// Size available at the best ask, when known.
    pub ask_size: Option<Decimal>,
    /// Last trade price, when known.
    pub last: Option<Decimal>,
    /// Venue mark price, when known.
    pub mark_price: Option<Decimal>,
    /// 24 h traded volume in base asset, when known.
    pub volume_24h: Option<Decimal>,
    /// Venue event time (UTC).
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Checks the quote invariant: `bid > 0 && ask > 0 && bid <= ask`.
    ///
    /// Frames violating this are dropped at the adapter boundary.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO && self.bid <= self.ask
    }

    /// Midpoint of bid and ask.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

// =============================================================================
// Order Book
// =============================================================================

/// A depth snapshot used transiently for slippage estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    /// Canonical short symbol.
    pub symbol: String,
    /// Bid levels, descending by price.
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels, ascending by price.
    pub asks: Vec<(Decimal, Decimal)>,
    /// Venue event time (UTC).
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Checks ordering and positivity of all levels.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let sizes_ok = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .all(|(p, s)| *p > Decimal::ZERO && *s > Decimal::ZERO);
        let bids_sorted = self.bids.windows(2).all(|w| w[0].0 >= w[1].0);
        let asks_sorted = self.asks.windows(2).all(|w| w[0].0 <= w[1].0);
        sizes_ok && bids_sorted && asks_sorted
    }

    /// Best bid level, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.first().copied()
    }

    /// Best ask level, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first().copied()
    }
}

// =============================================================================
// Orders
// =============================================================================

/// Parameters for submitting an order to a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Canonical short symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Market or limit.
    pub order_type: OrderType,
    /// Limit price, required for limit orders.
    pub price: Option<Decimal>,
    /// Quantity in base asset.
    pub quantity: Decimal,
    /// Caller-chosen idempotency key.
    pub client_order_id: String,
}

impl OrderRequest {
    /// Creates a market order request.
    #[must_use]
    pub fn market(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            client_order_id: client_order_id.into(),
        }
    }
}

/// A venue-visible order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Venue-assigned order id.
    pub id: String,
    /// Our idempotency key.
    pub client_order_id: String,
    /// Canonical short symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Market or limit.
    pub order_type: OrderType,
    /// Limit price, if any.
    pub price: Option<Decimal>,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Filled quantity so far.
    pub filled: Decimal,
    /// Average fill price, when reported.
    pub avg_fill_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Last update time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Fee charged so far, when reported.
    pub fee: Option<Decimal>,
}

impl Order {
    /// Unfilled remainder.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled
    }

    /// Price the order actually filled at, falling back to the limit price.
    #[must_use]
    pub fn fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price.or(self.price)
    }
}

// =============================================================================
// Balances & Positions
// =============================================================================

/// Per-asset balance on one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Asset code (e.g. "USDT").
    pub asset: String,
    /// Freely available amount.
    pub free: Decimal,
    /// Amount locked in open orders.
    pub locked: Decimal,
}

impl Balance {
    /// Total holdings.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// A venue-reported open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    /// Canonical short symbol.
    pub symbol: String,
    /// Long (Buy) or short (Sell).
    pub side: Side,
    /// Position size in base asset.
    pub size: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Current mark price.
    pub mark_price: Decimal,
    /// Unrealized PnL in quote asset.
    pub unrealized_pnl: Decimal,
}

/// Maker/taker fee rates as decimals (0.0006 = 6 bps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingFees {
    /// Maker rate.
    pub maker: Decimal,
    /// Taker rate.
    pub taker: Decimal,
}
