//! Hyperliquid WebSocket market-data stream.
//!
//! Connection loop with exponential backoff (1 s base, doubled per attempt,
//! reset after the per-cycle attempt cap), `l2Book` + `trades` + `allMids`
//! subscriptions, and a keep-alive ping. Frames are normalized before they
//! reach the quote channel; nothing is emitted while disconnected.

use chrono::{DateTime, TimeZone, Utc};
use cross_arb_core::config::WebsocketConfig;
use cross_arb_core::types::Quote;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::normalize::Normalizer;

/// Production WebSocket endpoint.
pub const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

/// Deadline for the initial WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Frame Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WsFrame {
    channel: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct L2BookData {
    coin: String,
    /// `[bids, asks]`, best level first.
    levels: Vec<Vec<L2Level>>,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct L2Level {
    px: String,
    sz: String,
}

#[derive(Debug, Deserialize)]
struct TradeData {
    coin: String,
    px: String,
    time: i64,
}

/// A decoded market-data event, pre-normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// Best-level book update.
    Book {
        /// Venue symbol.
        coin: String,
        /// Best bid price and size.
        bid: (Decimal, Decimal),
        /// Best ask price and size.
        ask: (Decimal, Decimal),
        /// Venue event time.
        timestamp: DateTime<Utc>,
    },
    /// Mid prices for all symbols.
    Mids {
        /// `(venue symbol, mid price)` pairs.
        mids: Vec<(String, Decimal)>,
    },
    /// Trade prints.
    Trades {
        /// `(venue symbol, price, time)` tuples.
        trades: Vec<(String, Decimal, DateTime<Utc>)>,
    },
}

/// Decodes one WebSocket text frame into market-data events.
///
/// Unknown channels and malformed frames yield an empty vector; the caller
/// counts decode errors through the normalizer instead of failing the
/// stream.
#[must_use]
pub fn parse_frame(text: &str) -> Vec<WsEvent> {
    let Ok(frame) = serde_json::from_str::<WsFrame>(text) else {
        return Vec::new();
    };

    match frame.channel.as_str() {
        "l2Book" => {
            let Ok(book) = serde_json::from_value::<L2BookData>(frame.data) else {
                return Vec::new();
            };
            let (Some(bids), Some(asks)) = (book.levels.first(), book.levels.get(1)) else {
                return Vec::new();
            };
            let (Some(best_bid), Some(best_ask)) = (bids.first(), asks.first()) else {
                return Vec::new();
            };
            let Some(bid) = parse_level(best_bid) else {
                return Vec::new();
            };
            let Some(ask) = parse_level(best_ask) else {
                return Vec::new();
            };
            vec![WsEvent::Book {
                coin: book.coin,
                bid,
                ask,
                timestamp: millis_to_utc(book.time),
            }]
        }
        "allMids" => {
            let Some(mids) = frame.data.get("mids").and_then(|m| m.as_object()) else {
                return Vec::new();
            };
            let mids = mids
                .iter()
                .filter_map(|(coin, px)| {
                    px.as_str()
                        .and_then(|s| Decimal::from_str(s).ok())
                        .map(|px| (coin.clone(), px))
                })
                .collect();
            vec![WsEvent::Mids { mids }]
        }
        "trades" => {
            let Ok(trades) = serde_json::from_value::<Vec<TradeData>>(frame.data) else {
                return Vec::new();
            };
            let trades = trades
                .into_iter()
                .filter_map(|t| {
                    Decimal::from_str(&t.px)
                        .ok()
                        .map(|px| (t.coin, px, millis_to_utc(t.time)))
                })
                .collect();
            vec![WsEvent::Trades { trades }]
        }
        other => {
            trace!(channel = %other, "Ignoring frame");
            Vec::new()
        }
    }
}

fn parse_level(level: &L2Level) -> Option<(Decimal, Decimal)> {
    Some((
        Decimal::from_str(&level.px).ok()?,
        Decimal::from_str(&level.sz).ok()?,
    ))
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn subscriptions(symbols: &[String]) -> Vec<serde_json::Value> {
    let mut messages = Vec::new();
    for symbol in symbols {
        messages.push(serde_json::json!({
            "method": "subscribe",
            "subscription": { "type": "l2Book", "coin": symbol }
        }));
        messages.push(serde_json::json!({
            "method": "subscribe",
            "subscription": { "type": "trades", "coin": symbol }
        }));
    }
    messages.push(serde_json::json!({
        "method": "subscribe",
        "subscription": { "type": "allMids" }
    }));
    messages
}

// ============================================================================
// Connection Loop
// ============================================================================

/// Runs the socket until shutdown: connect, subscribe, decode, normalize,
/// forward. Reconnects with exponential backoff on any transport failure.
pub async fn run_market_stream(
    url: String,
    symbols: Vec<String>,
    ws_config: WebsocketConfig,
    mut normalizer: Normalizer,
    quote_tx: mpsc::Sender<Quote>,
    mut shutdown_rx: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
) {
    let base_delay = Duration::from_secs(ws_config.reconnect_delay_secs.max(1));
    let max_attempts = ws_config.max_reconnect_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match timeout(CONNECT_TIMEOUT, connect_async(&url)).await {
            Ok(Ok((mut stream, response))) => {
                info!(url = %url, status = %response.status(), "Hyperliquid WebSocket connected");
                attempt = 0;
                connected.store(true, Ordering::SeqCst);

                let mut subscribed = true;
                for message in subscriptions(&symbols) {
                    if stream.send(Message::Text(message.to_string())).await.is_err() {
                        warn!("Subscribe send failed");
                        subscribed = false;
                        break;
                    }
                }

                if subscribed {
                    let mut ping = interval(Duration::from_secs(ws_config.ping_interval_secs.max(1)));
                    ping.tick().await; // first tick is immediate

                    loop {
                        tokio::select! {
                            maybe_message = stream.next() => match maybe_message {
                                Some(Ok(Message::Text(text))) => {
                                    handle_frame(&text, &mut normalizer, &quote_tx).await;
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = stream.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    warn!("Hyperliquid WebSocket closed");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(error = %e, "Hyperliquid WebSocket read error");
                                    break;
                                }
                            },
                            _ = ping.tick() => {
                                let ping_message = serde_json::json!({ "method": "ping" });
                                if stream.send(Message::Text(ping_message.to_string())).await.is_err() {
                                    warn!("Ping send failed");
                                    break;
                                }
                            },
                            changed = shutdown_rx.changed() => {
                                if changed.is_err() || *shutdown_rx.borrow() {
                                    let _ = stream.close(None).await;
                                    connected.store(false, Ordering::SeqCst);
                                    return;
                                }
                            }
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Hyperliquid connect failed");
            }
            Err(_) => {
                warn!(url = %url, "Hyperliquid connect timed out");
            }
        }

        // Exponential backoff, attempt counter capped per cycle.
        let delay = base_delay * 2u32.pow(attempt.min(8));
        attempt = (attempt + 1) % max_attempts;
        debug!(delay_secs = delay.as_secs(), "Reconnecting after backoff");
        tokio::select! {
            () = sleep(delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

async fn handle_frame(text: &str, normalizer: &mut Normalizer, quote_tx: &mpsc::Sender<Quote>) {
    for event in parse_frame(text) {
        match event {
            WsEvent::Book {
                coin,
                bid,
                ask,
                timestamp,
            } => {
                if let Some(quote) =
                    normalizer.on_book(&coin, bid.0, ask.0, Some(bid.1), Some(ask.1), timestamp)
                {
                    if quote_tx.send(quote).await.is_err() {
                        return;
                    }
                }
            }
            WsEvent::Mids { mids } => {
                let now = Utc::now();
                for (coin, mid) in mids {
                    if let Some(quote) = normalizer.on_ticker(&coin, mid, None, now) {
                        if quote_tx.send(quote).await.is_err() {
                            return;
                        }
                    }
                }
            }
            WsEvent::Trades { trades } => {
                for (coin, price, timestamp) in trades {
                    normalizer.on_trade(&coin, price, timestamp);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_l2book_frame() {
        let text = r#"{
            "channel": "l2Book",
            "data": {
                "coin": "BTC",
                "levels": [
                    [{"px": "103750.0", "sz": "1.5"}, {"px": "103749.0", "sz": "2.0"}],
                    [{"px": "103760.0", "sz": "0.8"}]
                ],
                "time": 1717243200000
            }
        }"#;
        let events = parse_frame(text);
        assert_eq!(events.len(), 1);
        let WsEvent::Book { coin, bid, ask, .. } = &events[0] else {
            panic!("expected book event");
        };
        assert_eq!(coin, "BTC");
        assert_eq!(*bid, (dec!(103750.0), dec!(1.5)));
        assert_eq!(*ask, (dec!(103760.0), dec!(0.8)));
    }

    #[test]
    fn test_parse_allmids_frame() {
        let text = r#"{
            "channel": "allMids",
            "data": { "mids": { "BTC": "103755.5", "ETH": "3890.25" } }
        }"#;
        let events = parse_frame(text);
        assert_eq!(events.len(), 1);
        let WsEvent::Mids { mids } = &events[0] else {
            panic!("expected mids event");
        };
        assert!(mids.contains(&("BTC".to_string(), dec!(103755.5))));
        assert!(mids.contains(&("ETH".to_string(), dec!(3890.25))));
    }

    #[test]
    fn test_parse_trades_frame() {
        let text = r#"{
            "channel": "trades",
            "data": [
                {"coin": "BTC", "px": "103756.0", "sz": "0.1", "side": "B", "time": 1717243200500}
            ]
        }"#;
        let events = parse_frame(text);
        assert_eq!(events.len(), 1);
        let WsEvent::Trades { trades } = &events[0] else {
            panic!("expected trades event");
        };
        assert_eq!(trades[0].0, "BTC");
        assert_eq!(trades[0].1, dec!(103756.0));
    }

    #[test]
    fn test_malformed_and_unknown_frames_yield_nothing() {
        assert!(parse_frame("not json").is_empty());
        assert!(parse_frame(r#"{"channel": "subscriptionResponse", "data": {}}"#).is_empty());
        assert!(parse_frame(r#"{"channel": "l2Book", "data": {"coin": "BTC"}}"#).is_empty());
        // Book with an empty ask side decodes to nothing rather than a
        // partial quote.
        assert!(parse_frame(
            r#"{"channel": "l2Book", "data": {"coin": "BTC", "levels": [[{"px": "1", "sz": "1"}], []], "time": 0}}"#
        )
        .is_empty());
    }
}
