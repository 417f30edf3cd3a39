//! The Hyperliquid [`VenueAdapter`] implementation.

use async_trait::async_trait;
use cross_arb_core::config::{AppConfig, WebsocketConfig};
use cross_arb_core::error::ArbError;
use cross_arb_core::traits::VenueAdapter;
use cross_arb_core::types::{
    Balance, Order, OrderBook, OrderRequest, OrderStatus, Quote, TradingFees, VenueId,
    VenuePosition,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::client::{parse_balances, parse_positions, HyperliquidClient, API_URL};
use crate::normalize::{Normalizer, NormalizerCounters};
use crate::websocket::{run_market_stream, WS_URL};

/// Quote channel capacity between the socket task and the hub.
const QUOTE_CHANNEL_CAPACITY: usize = 4096;

/// Hyperliquid venue adapter: WebSocket market data plus REST snapshots
/// and trading.
pub struct HyperliquidAdapter {
    ws_url: String,
    ws_config: WebsocketConfig,
    client: HyperliquidClient,
    fees: TradingFees,
    connected: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    counters: Mutex<Option<Arc<NormalizerCounters>>>,
}

impl HyperliquidAdapter {
    /// Creates an adapter from application config. Credentials come from
    /// `exchanges.hyperliquid.api_key` (`${VAR}`-substituted at load).
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let fees_config = config.venue_fees(VenueId::Hyperliquid);
        let api_key = config
            .exchanges
            .get("hyperliquid")
            .and_then(|v| v.api_key.clone());
        Self {
            ws_url: WS_URL.to_string(),
            ws_config: config.websocket.clone(),
            client: HyperliquidClient::new(API_URL, api_key),
            fees: TradingFees {
                maker: fees_config.maker,
                taker: fees_config.taker,
            },
            connected: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
            counters: Mutex::new(None),
        }
    }

    /// Overrides the endpoints (testnet, local fixtures).
    #[must_use]
    pub fn with_urls(mut self, ws_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self.client = HyperliquidClient::new(api_url, None);
        self
    }

    /// Normalizer drop counters for the current connection, if any.
    #[must_use]
    pub fn decode_counters(&self) -> Option<Arc<NormalizerCounters>> {
        self.counters.lock().clone()
    }

    fn synthesize_ticker(&self, symbol: &str, mid: Decimal) -> Quote {
        // REST cold-start quote: the same ±0.05 % synthesis the normalizer
        // applies to ticker-only updates.
        let half_spread = mid * dec!(0.0005);
        Quote {
            venue: VenueId::Hyperliquid,
            symbol: symbol.to_string(),
            bid: mid - half_spread,
            ask: mid + half_spread,
            bid_size: None,
            ask_size: None,
            last: Some(mid),
            mark_price: Some(mid),
            volume_24h: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[async_trait]
impl VenueAdapter for HyperliquidAdapter {
    fn venue(&self) -> VenueId {
        VenueId::Hyperliquid
    }

    async fn connect(&self, symbols: &[String]) -> Result<mpsc::Receiver<Quote>, ArbError> {
        // Hyperliquid quotes canonical coin names directly.
        let normalizer = Normalizer::new(
            VenueId::Hyperliquid,
            Normalizer::identity_map(symbols),
        );
        *self.counters.lock() = Some(normalizer.counters());

        let (quote_tx, quote_rx) = mpsc::channel(QUOTE_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        info!(symbols = ?symbols, "Starting Hyperliquid market stream");
        tokio::spawn(run_market_stream(
            self.ws_url.clone(),
            symbols.to_vec(),
            self.ws_config.clone(),
            normalizer,
            quote_tx,
            shutdown_rx,
            Arc::clone(&self.connected),
        ));

        Ok(quote_rx)
    }

    async fn disconnect(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(true);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn snapshot_ticker(&self, symbol: &str) -> Result<Quote, ArbError> {
        // Prefer the book for a real top-of-book; fall back to mids.
        match self.client.l2_book(symbol, 1).await {
            Ok(book) => {
                let (bid, bid_size) = book.best_bid().ok_or_else(|| {
                    ArbError::Decode(format!("empty bid side for {symbol}"))
                })?;
                let (ask, ask_size) = book.best_ask().ok_or_else(|| {
                    ArbError::Decode(format!("empty ask side for {symbol}"))
                })?;
                Ok(Quote {
                    venue: VenueId::Hyperliquid,
                    symbol: symbol.to_string(),
                    bid,
                    ask,
                    bid_size: Some(bid_size),
                    ask_size: Some(ask_size),
                    last: None,
                    mark_price: None,
                    volume_24h: None,
                    timestamp: book.timestamp,
                })
            }
            Err(_) => {
                let mids = self.client.all_mids().await?;
                let mid = mids
                    .get(symbol)
                    .copied()
                    .ok_or_else(|| ArbError::Decode(format!("no mid for {symbol}")))?;
                Ok(self.synthesize_ticker(symbol, mid))
            }
        }
    }

    async fn snapshot_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ArbError> {
        self.client.l2_book(symbol, depth).await
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order, ArbError> {
        self.client.place_order(&request).await
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<bool, ArbError> {
        self.client.cancel_order(order_id, symbol).await
    }

    async fn fetch_order(&self, order_id: &str, _symbol: &str) -> Result<Order, ArbError> {
        let value = self.client.order_status(order_id).await?;
        let status_value = value.pointer("/order/status").and_then(|v| v.as_str());
        let order_value = value
            .pointer("/order/order")
            .ok_or_else(|| ArbError::Decode(format!("no order body for {order_id}")))?;

        let quantity = decimal_field(order_value, "sz").unwrap_or(Decimal::ZERO);
        let filled = decimal_field(order_value, "filledSz").unwrap_or(Decimal::ZERO);
        Ok(Order {
            id: order_id.to_string(),
            client_order_id: order_value
                .get("cloid")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            symbol: order_value
                .get("coin")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            side: if order_value.get("side").and_then(|v| v.as_str()) == Some("B") {
                cross_arb_core::types::Side::Buy
            } else {
                cross_arb_core::types::Side::Sell
            },
            order_type: cross_arb_core::types::OrderType::Market,
            price: decimal_field(order_value, "limitPx"),
            quantity,
            filled,
            avg_fill_price: decimal_field(order_value, "avgPx"),
            status: map_status(status_value, quantity, filled),
            timestamp: chrono::Utc::now(),
            fee: None,
        })
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ArbError> {
        let value = self.client.open_orders().await?;
        let rows = value.as_array().cloned().unwrap_or_default();
        let mut orders = Vec::new();
        for row in rows {
            let coin = row.get("coin").and_then(|v| v.as_str()).unwrap_or_default();
            if symbol.is_some_and(|s| s != coin) {
                continue;
            }
            let quantity = decimal_field(&row, "sz").unwrap_or(Decimal::ZERO);
            orders.push(Order {
                id: row
                    .get("oid")
                    .and_then(serde_json::Value::as_i64)
                    .map_or_else(String::new, |oid| oid.to_string()),
                client_order_id: row
                    .get("cloid")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                symbol: coin.to_string(),
                side: if row.get("side").and_then(|v| v.as_str()) == Some("B") {
                    cross_arb_core::types::Side::Buy
                } else {
                    cross_arb_core::types::Side::Sell
                },
                order_type: cross_arb_core::types::OrderType::Limit,
                price: decimal_field(&row, "limitPx"),
                quantity,
                filled: Decimal::ZERO,
                avg_fill_price: None,
                status: OrderStatus::Open,
                timestamp: chrono::Utc::now(),
                fee: None,
            });
        }
        Ok(orders)
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, ArbError> {
        let value = self.client.clearinghouse_state().await?;
        Ok(parse_balances(&value))
    }

    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>, ArbError> {
        let value = self.client.clearinghouse_state().await?;
        Ok(parse_positions(&value))
    }

    fn trading_fees(&self, _symbol: &str) -> TradingFees {
        self.fees
    }
}

fn decimal_field(value: &serde_json::Value, field: &str) -> Option<Decimal> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Decimal::from_str(s).ok())
}

fn map_status(status: Option<&str>, quantity: Decimal, filled: Decimal) -> OrderStatus {
    match status {
        Some("filled") => OrderStatus::Filled,
        Some("canceled" | "cancelled") => OrderStatus::Cancelled,
        Some("rejected") => OrderStatus::Rejected,
        Some("expired") => OrderStatus::Expired,
        _ if filled >= quantity && quantity > Decimal::ZERO => OrderStatus::Filled,
        _ if filled > Decimal::ZERO => OrderStatus::PartiallyFilled,
        _ => OrderStatus::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_uses_codified_fees() {
        let adapter = HyperliquidAdapter::from_config(&AppConfig::default());
        let fees = adapter.trading_fees("BTC");
        assert_eq!(fees.taker, dec!(0.000389));
        assert_eq!(fees.maker, dec!(0.00013));
        assert_eq!(adapter.venue(), VenueId::Hyperliquid);
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_trading_requires_credentials() {
        let adapter = HyperliquidAdapter::from_config(&AppConfig::default());
        let request = OrderRequest::market(
            "BTC",
            cross_arb_core::types::Side::Buy,
            dec!(1),
            "x_long",
        );
        let result = adapter.place_order(request).await;
        assert!(matches!(result, Err(ArbError::NotAuthenticated { .. })));
    }

    #[test]
    fn test_map_status() {
        assert_eq!(map_status(Some("filled"), dec!(1), dec!(1)), OrderStatus::Filled);
        assert_eq!(
            map_status(None, dec!(1), dec!(0.5)),
            OrderStatus::PartiallyFilled
        );
        assert_eq!(map_status(None, dec!(1), dec!(0)), OrderStatus::Open);
        assert_eq!(
            map_status(Some("canceled"), dec!(1), dec!(0)),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn test_synthesized_ticker_spread() {
        let adapter = HyperliquidAdapter::from_config(&AppConfig::default());
        let quote = adapter.synthesize_ticker("BTC", dec!(100000));
        assert_eq!(quote.bid, dec!(99950));
        assert_eq!(quote.ask, dec!(100050));
        assert!(quote.is_valid());
    }
}
