//! Hyperliquid REST client.
//!
//! Market data goes through the public `/info` endpoint; trading goes
//! through `/exchange` and requires credentials. Requests are rate-limited
//! client-side and carry a 5 s deadline.

use chrono::Utc;
use cross_arb_core::error::ArbError;
use cross_arb_core::types::{Balance, Order, OrderBook, OrderRequest, OrderStatus, VenuePosition};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Production REST endpoint.
pub const API_URL: &str = "https://api.hyperliquid.xyz";

/// Per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// REST client with client-side rate limiting.
pub struct HyperliquidClient {
    http: reqwest::Client,
    base_url: String,
    rate_limiter: DefaultDirectRateLimiter,
    api_key: Option<String>,
}

impl HyperliquidClient {
    /// Creates a client. `api_key` is the trading wallet address; absent
    /// means market-data only.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be constructed (TLS backend
    /// missing), which is a startup error.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            rate_limiter: RateLimiter::direct(Quota::per_second(nonzero!(10u32))),
            api_key,
        }
    }

    /// Whether trading calls are possible.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ArbError> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "REST request");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ArbError::Transport(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(ArbError::RateLimited {
                venue: "Hyperliquid".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(ArbError::Transport(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ArbError::Decode(e.to_string()))
    }

    /// Depth snapshot from the `l2Book` info request.
    pub async fn l2_book(&self, coin: &str, depth: usize) -> Result<OrderBook, ArbError> {
        let value = self
            .post("/info", json!({ "type": "l2Book", "coin": coin }))
            .await?;
        parse_l2_book(coin, &value, depth)
    }

    /// Mid prices for every listed coin.
    pub async fn all_mids(&self) -> Result<HashMap<String, Decimal>, ArbError> {
        let value = self.post("/info", json!({ "type": "allMids" })).await?;
        let object = value
            .as_object()
            .ok_or_else(|| ArbError::Decode("allMids is not an object".to_string()))?;
        Ok(object
            .iter()
            .filter_map(|(coin, px)| {
                px.as_str()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .map(|px| (coin.clone(), px))
            })
            .collect())
    }

    fn require_credentials(&self) -> Result<&str, ArbError> {
        self.api_key.as_deref().ok_or(ArbError::NotAuthenticated {
            venue: "Hyperliquid".to_string(),
        })
    }

    /// Submits an order action. Venue-side signing and encoding are
    /// handled by the trading gateway configured for the wallet; this
    /// client only speaks the uniform action surface.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<Order, ArbError> {
        let wallet = self.require_credentials()?;
        let body = json!({
            "action": {
                "type": "order",
                "wallet": wallet,
                "coin": request.symbol,
                "is_buy": request.side == cross_arb_core::types::Side::Buy,
                "sz": request.quantity.to_string(),
                "limit_px": request.price.map(|p| p.to_string()),
                "cloid": request.client_order_id,
            }
        });
        let value = self.post("/exchange", body).await?;
        parse_order_ack(request, &value)
    }

    /// Cancels an order by venue id.
    pub async fn cancel_order(&self, order_id: &str, coin: &str) -> Result<bool, ArbError> {
        let wallet = self.require_credentials()?;
        let body = json!({
            "action": {
                "type": "cancel",
                "wallet": wallet,
                "coin": coin,
                "oid": order_id,
            }
        });
        let value = self.post("/exchange", body).await?;
        Ok(value.get("status").and_then(Value::as_str) == Some("ok"))
    }

    /// Fetches one order's state.
    pub async fn order_status(&self, order_id: &str) -> Result<Value, ArbError> {
        let wallet = self.require_credentials()?;
        self.post(
            "/info",
            json!({ "type": "orderStatus", "user": wallet, "oid": order_id }),
        )
        .await
    }

    /// Fetches open orders.
    pub async fn open_orders(&self) -> Result<Value, ArbError> {
        let wallet = self.require_credentials()?;
        self.post("/info", json!({ "type": "openOrders", "user": wallet }))
            .await
    }

    /// Fetches the clearinghouse state: balances and positions.
    pub async fn clearinghouse_state(&self) -> Result<Value, ArbError> {
        let wallet = self.require_credentials()?;
        self.post(
            "/info",
            json!({ "type": "clearinghouseState", "user": wallet }),
        )
        .await
    }
}

/// Parses an `l2Book` response into an [`OrderBook`], truncated to `depth`.
pub fn parse_l2_book(coin: &str, value: &Value, depth: usize) -> Result<OrderBook, ArbError> {
    let levels = value
        .get("levels")
        .and_then(Value::as_array)
        .ok_or_else(|| ArbError::Decode("l2Book missing levels".to_string()))?;
    let bids = parse_side(levels.first(), depth)?;
    let asks = parse_side(levels.get(1), depth)?;

    let timestamp = value
        .get("time")
        .and_then(Value::as_i64)
        .and_then(|ms| chrono::TimeZone::timestamp_millis_opt(&Utc, ms).single())
        .unwrap_or_else(Utc::now);

    let book = OrderBook {
        symbol: coin.to_string(),
        bids,
        asks,
        timestamp,
    };
    if !book.is_valid() {
        return Err(ArbError::Decode(format!("invalid l2Book for {coin}")));
    }
    Ok(book)
}

fn parse_side(side: Option<&Value>, depth: usize) -> Result<Vec<(Decimal, Decimal)>, ArbError> {
    let levels = side
        .and_then(Value::as_array)
        .ok_or_else(|| ArbError::Decode("l2Book side missing".to_string()))?;
    levels
        .iter()
        .take(depth)
        .map(|level| {
            let px = level
                .get("px")
                .and_then(Value::as_str)
                .and_then(|s| Decimal::from_str(s).ok())
                .ok_or_else(|| ArbError::Decode("bad level px".to_string()))?;
            let sz = level
                .get("sz")
                .and_then(Value::as_str)
                .and_then(|s| Decimal::from_str(s).ok())
                .ok_or_else(|| ArbError::Decode("bad level sz".to_string()))?;
            Ok((px, sz))
        })
        .collect()
}

fn parse_order_ack(request: &OrderRequest, value: &Value) -> Result<Order, ArbError> {
    if value.get("status").and_then(Value::as_str) == Some("err") {
        let reason = value
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(ArbError::OrderRejected {
            venue: "Hyperliquid".to_string(),
            reason,
        });
    }

    let ack = value.pointer("/response/data");
    let id = ack
        .and_then(|d| d.get("oid"))
        .and_then(Value::as_i64)
        .map_or_else(|| request.client_order_id.clone(), |oid| oid.to_string());
    let filled = ack
        .and_then(|d| d.get("totalSz"))
        .and_then(Value::as_str)
        .and_then(|s| Decimal::from_str(s).ok())
        .unwrap_or(Decimal::ZERO);
    let avg_px = ack
        .and_then(|d| d.get("avgPx"))
        .and_then(Value::as_str)
        .and_then(|s| Decimal::from_str(s).ok());

    let status = if filled >= request.quantity {
        OrderStatus::Filled
    } else if filled > Decimal::ZERO {
        OrderStatus::PartiallyFilled
    } else {
        OrderStatus::Open
    };

    Ok(Order {
        id,
        client_order_id: request.client_order_id.clone(),
        symbol: request.symbol.clone(),
        side: request.side,
        order_type: request.order_type,
        price: request.price,
        quantity: request.quantity,
        filled,
        avg_fill_price: avg_px,
        status,
        timestamp: Utc::now(),
        fee: None,
    })
}

/// Extracts balances from a clearinghouse-state response.
pub fn parse_balances(value: &Value) -> HashMap<String, Balance> {
    let mut balances = HashMap::new();
    if let Some(summary) = value.get("marginSummary") {
        if let Some(free) = summary
            .get("accountValue")
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
        {
            balances.insert(
                "USDC".to_string(),
                Balance {
                    asset: "USDC".to_string(),
                    free,
                    locked: Decimal::ZERO,
                },
            );
        }
    }
    balances
}

/// Extracts venue positions from a clearinghouse-state response.
pub fn parse_positions(value: &Value) -> Vec<VenuePosition> {
    let Some(rows) = value.get("assetPositions").and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let position = row.get("position")?;
            let symbol = position.get("coin")?.as_str()?.to_string();
            let size = Decimal::from_str(position.get("szi")?.as_str()?).ok()?;
            let entry_price = position
                .get("entryPx")
                .and_then(Value::as_str)
                .and_then(|s| Decimal::from_str(s).ok())
                .unwrap_or(Decimal::ZERO);
            let unrealized = position
                .get("unrealizedPnl")
                .and_then(Value::as_str)
                .and_then(|s| Decimal::from_str(s).ok())
                .unwrap_or(Decimal::ZERO);
            Some(VenuePosition {
                symbol,
                side: if size >= Decimal::ZERO {
                    cross_arb_core::types::Side::Buy
                } else {
                    cross_arb_core::types::Side::Sell
                },
                size: size.abs(),
                entry_price,
                mark_price: entry_price,
                unrealized_pnl: unrealized,
            })
        })
        .collect()
}
