//! The uniform venue contract.
//!
//! Each venue implements [`VenueAdapter`] behind a trait object; the
//! ingestion hub stores `Arc<dyn VenueAdapter>` handles and never sees
//! venue-specific encodings. `connect` follows the actor pattern: a spawned
//! task owns the transport and sends normalized [`Quote`]s on a bounded
//! channel.

use crate::error::ArbError;
use crate::types::{Balance, Order, OrderBook, OrderRequest, Quote, TradingFees, VenueId, VenuePosition};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Uniform capability set every venue must provide.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// The venue this adapter speaks to.
    fn venue(&self) -> VenueId;

    /// Establishes the transport, subscribes to book and ticker streams for
    /// each symbol, and returns the normalized quote stream.
    ///
    /// The stream only ever carries quotes satisfying the invariant
    /// `bid > 0 && ask > 0 && bid <= ask`; violating frames are dropped and
    /// counted inside the adapter. No quotes are emitted while the adapter
    /// is reconnecting.
    async fn connect(&self, symbols: &[String]) -> Result<mpsc::Receiver<Quote>, ArbError>;

    /// Closes the transport and stops background work.
    async fn disconnect(&self);

    /// Whether the market-data transport is currently up.
    fn is_connected(&self) -> bool;

    /// One-shot REST ticker fetch, used for sanity checks and cold start.
    async fn snapshot_ticker(&self, symbol: &str) -> Result<Quote, ArbError>;

    /// REST depth snapshot for slippage estimation.
    async fn snapshot_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ArbError>;

    /// Submits an order. Requires credentials.
    async fn place_order(&self, request: OrderRequest) -> Result<Order, ArbError>;

    /// Cancels an order. Returns whether the venue acknowledged the cancel.
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<bool, ArbError>;

    /// Fetches the current state of one order.
    async fn fetch_order(&self, order_id: &str, symbol: &str) -> Result<Order, ArbError>;

    /// Fetches open orders, optionally scoped to one symbol.
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ArbError>;

    /// Fetches per-asset balances.
    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, ArbError>;

    /// Fetches venue-reported open positions.
    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>, ArbError>;

    /// Maker/taker rates for a symbol, from static config unless the venue
    /// exposes live values.
    fn trading_fees(&self, symbol: &str) -> TradingFees;
}
