//! Test doubles shared by the unit tests in this crate.

use async_trait::async_trait;
use chrono::Utc;
use cross_arb_core::error::ArbError;
use cross_arb_core::traits::VenueAdapter;
use cross_arb_core::types::{
    Balance, Order, OrderBook, OrderRequest, OrderStatus, Quote, Side, TradingFees, VenueId,
    VenuePosition,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// In-memory venue: fills market orders at a configurable price and lets
/// tests script rejections and partial fills.
pub struct MockVenue {
    venue: VenueId,
    price: Mutex<Decimal>,
    reject_all: AtomicBool,
    reject_side: Mutex<Option<Side>>,
    /// Fraction applied to the next submission only; later orders fill in
    /// full. Models a one-off partial fill.
    partial_next: Mutex<Option<Decimal>>,
    fills_completed: AtomicBool,
    orders: Mutex<HashMap<String, Order>>,
    cancelled: Mutex<Vec<String>>,
    placed: AtomicU64,
    balances: Mutex<HashMap<String, Balance>>,
    seq: AtomicU64,
    scripted_quotes: Mutex<Vec<Quote>>,
}

impl MockVenue {
    pub fn new(venue: VenueId) -> Self {
        let mut balances = HashMap::new();
        balances.insert(
            "USDT".to_string(),
            Balance {
                asset: "USDT".to_string(),
                free: dec!(1_000_000),
                locked: Decimal::ZERO,
            },
        );
        balances.insert(
            "BTC".to_string(),
            Balance {
                asset: "BTC".to_string(),
                free: dec!(100),
                locked: Decimal::ZERO,
            },
        );
        Self {
            venue,
            price: Mutex::new(dec!(100)),
            reject_all: AtomicBool::new(false),
            reject_side: Mutex::new(None),
            partial_next: Mutex::new(None),
            fills_completed: AtomicBool::new(false),
            orders: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
            placed: AtomicU64::new(0),
            balances: Mutex::new(balances),
            seq: AtomicU64::new(0),
            scripted_quotes: Mutex::new(Vec::new()),
        }
    }

    /// Quotes `connect` will emit before leaving the stream open.
    pub fn with_quotes(self, quotes: Vec<Quote>) -> Self {
        *self.scripted_quotes.lock() = quotes;
        self
    }

    pub fn rejecting(self) -> Self {
        self.reject_all.store(true, Ordering::SeqCst);
        self
    }

    /// Rejects only orders on the given side (scripts a close-leg failure
    /// after a successful open).
    pub fn rejecting_side(&self, side: Side) {
        *self.reject_side.lock() = Some(side);
    }

    pub fn partially_filling(self, fraction: Decimal) -> Self {
        *self.partial_next.lock() = Some(fraction);
        self
    }

    pub fn with_price(self, price: Decimal) -> Self {
        *self.price.lock() = price;
        self
    }

    pub fn set_price(&self, price: Decimal) {
        *self.price.lock() = price;
    }

    /// Later `fetch_order` calls report resting orders as fully filled.
    pub fn complete_fills(&self) {
        self.fills_completed.store(true, Ordering::SeqCst);
    }

    pub fn placed_count(&self) -> u64 {
        self.placed.load(Ordering::SeqCst)
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn orders_placed(&self) -> Vec<Order> {
        self.orders.lock().values().cloned().collect()
    }
}

#[async_trait]
impl VenueAdapter for MockVenue {
    fn venue(&self) -> VenueId {
        self.venue
    }

    async fn connect(&self, _symbols: &[String]) -> Result<mpsc::Receiver<Quote>, ArbError> {
        let (tx, rx) = mpsc::channel(256);
        let quotes = self.scripted_quotes.lock().clone();
        tokio::spawn(async move {
            for quote in quotes {
                if tx.send(quote).await.is_err() {
                    return;
                }
            }
            // Keep the stream open so the hub does not cycle reconnects.
            std::future::pending::<()>().await;
        });
        Ok(rx)
    }

    async fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        true
    }

    async fn snapshot_ticker(&self, symbol: &str) -> Result<Quote, ArbError> {
        let price = *self.price.lock();
        Ok(Quote {
            venue: self.venue,
            symbol: symbol.to_string(),
            bid: price - dec!(0.5),
            ask: price + dec!(0.5),
            bid_size: Some(dec!(100)),
            ask_size: Some(dec!(100)),
            last: Some(price),
            mark_price: Some(price),
            volume_24h: Some(dec!(100000)),
            timestamp: Utc::now(),
        })
    }

    async fn snapshot_book(&self, symbol: &str, depth: usize) -> Result<OrderBook, ArbError> {
        let price = *self.price.lock();
        let levels = depth.max(1).min(10);
        let mut bids = Vec::new();
        let mut asks = Vec::new();
        for i in 0..levels {
            let offset = Decimal::from(i as u64 + 1);
            bids.push((price - offset, dec!(1000)));
            asks.push((price + offset, dec!(1000)));
        }
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids,
            asks,
            timestamp: Utc::now(),
        })
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order, ArbError> {
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(ArbError::OrderRejected {
                venue: self.venue.to_string(),
                reason: "scripted rejection".to_string(),
            });
        }
        if *self.reject_side.lock() == Some(request.side) {
            return Err(ArbError::OrderRejected {
                venue: self.venue.to_string(),
                reason: format!("scripted rejection of {} side", request.side),
            });
        }

        self.placed.fetch_add(1, Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let price = request.price.unwrap_or_else(|| *self.price.lock());

        let (filled, status) = match self.partial_next.lock().take() {
            Some(fraction) => (request.quantity * fraction, OrderStatus::PartiallyFilled),
            None => (request.quantity, OrderStatus::Filled),
        };

        let order = Order {
            id: format!("{}-{}", self.venue.as_lower(), seq),
            client_order_id: request.client_order_id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            quantity: request.quantity,
            filled,
            avg_fill_price: Some(price),
            status,
            timestamp: Utc::now(),
            fee: Some(filled * price * dec!(0.0006)),
        };
        self.orders.lock().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<bool, ArbError> {
        self.cancelled.lock().push(order_id.to_string());
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(order_id) {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Cancelled;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn fetch_order(&self, order_id: &str, _symbol: &str) -> Result<Order, ArbError> {
        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| ArbError::Decode(format!("unknown order {order_id}")))?;
        if self.fills_completed.load(Ordering::SeqCst) && !order.status.is_terminal() {
            order.filled = order.quantity;
            order.status = OrderStatus::Filled;
        }
        Ok(order.clone())
    }

    async fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<Order>, ArbError> {
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, ArbError> {
        Ok(self.balances.lock().clone())
    }

    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>, ArbError> {
        Ok(Vec::new())
    }

    fn trading_fees(&self, _symbol: &str) -> TradingFees {
        TradingFees {
            maker: dec!(0.0002),
            taker: dec!(0.0006),
        }
    }
}
