//! Ingestion hub: owns the venue adapters, supervises reconnection, and
//! fans normalized quotes out to subscribers.
//!
//! Each adapter gets one forwarder task, so quotes from the same
//! `(venue, symbol)` reach every subscriber in arrival order. Subscribers
//! sit behind bounded queues; a slow subscriber never stalls the producer —
//! when its queue is full the newest quote is dropped for that subscriber
//! and a rate-limited warning is logged.

use cross_arb_core::config::WebsocketConfig;
use cross_arb_core::traits::VenueAdapter;
use cross_arb_core::types::{Quote, VenueId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 200_000;

/// Minimum interval between queue-overflow warnings per subscriber.
const OVERFLOW_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-subscriber bounded queue capacity.
    pub queue_size: usize,
    /// How long shutdown waits for subscriber queues to drain.
    pub shutdown_grace: Duration,
    /// Reconnect supervision settings.
    pub websocket: WebsocketConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            shutdown_grace: Duration::from_secs(5),
            websocket: WebsocketConfig::default(),
        }
    }
}

/// Connection lifecycle events emitted by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The adapter failed to connect or its stream ended.
    Failed {
        /// Venue concerned.
        venue: VenueId,
        /// Human-readable cause.
        reason: String,
    },
    /// The adapter reconnected after a failure.
    Restored {
        /// Venue concerned.
        venue: VenueId,
    },
}

struct Subscriber {
    name: String,
    tx: mpsc::Sender<Quote>,
    dropped: AtomicU64,
    last_overflow_warn: Mutex<Instant>,
}

struct HubInner {
    config: HubConfig,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    forwarded: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl HubInner {
    /// Delivers one quote to every subscriber in registration order.
    fn fan_out(&self, quote: &Quote) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.subscribers.read();
        for sub in subscribers.iter() {
            match sub.tx.try_send(quote.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Drop-newest policy: the incoming quote is discarded
                    // for this subscriber only.
                    let dropped = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    let mut last_warn = sub.last_overflow_warn.lock();
                    if last_warn.elapsed() >= OVERFLOW_WARN_INTERVAL {
                        *last_warn = Instant::now();
                        warn!(
                            subscriber = %sub.name,
                            dropped_total = dropped,
                            "Subscriber queue full, dropping newest quotes"
                        );
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = %sub.name, "Subscriber receiver closed");
                }
            }
        }
    }
}

/// Supervises venue adapters and fans quotes out to subscribers.
#[derive(Clone)]
pub struct IngestionHub {
    inner: Arc<HubInner>,
}

impl IngestionHub {
    /// Creates a hub and the receiver for its connection events.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (shutdown, _) = watch::channel(false);
        let hub = Self {
            inner: Arc::new(HubInner {
                config,
                subscribers: RwLock::new(Vec::new()),
                events_tx,
                forwarded: AtomicU64::new(0),
                shutdown,
            }),
        };
        (hub, events_rx)
    }

    /// Registers a subscriber and returns its bounded quote queue.
    ///
    /// Quotes from the same `(venue, symbol)` arrive in the order the venue
    /// produced them; no cross-venue ordering is promised.
    pub fn subscribe(&self, name: impl Into<String>) -> mpsc::Receiver<Quote> {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_size);
        let sub = Arc::new(Subscriber {
            name: name.into(),
            tx,
            dropped: AtomicU64::new(0),
            last_overflow_warn: Mutex::new(
                Instant::now()
                    .checked_sub(OVERFLOW_WARN_INTERVAL)
                    .unwrap_or_else(Instant::now),
            ),
        });
        info!(subscriber = %sub.name, "Registered hub subscriber");
        self.inner.subscribers.write().push(sub);
        rx
    }

    /// Registers an adapter and starts supervising it.
    ///
    /// The supervisor connects, forwards quotes until the stream ends, and
    /// reconnects with exponential backoff (base delay doubled per attempt,
    /// reset after `max_reconnect_attempts` per cycle), emitting
    /// [`ConnectionEvent`]s around each transition.
    pub fn add(&self, adapter: Arc<dyn VenueAdapter>, symbols: Vec<String>) {
        let inner = Arc::clone(&self.inner);
        let venue = adapter.venue();
        let mut shutdown_rx = self.inner.shutdown.subscribe();

        tokio::spawn(async move {
            let base_delay = Duration::from_secs(inner.config.websocket.reconnect_delay_secs.max(1));
            let max_attempts = inner.config.websocket.max_reconnect_attempts.max(1);
            let mut attempt: u32 = 0;
            let mut was_down = false;

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match adapter.connect(&symbols).await {
                    Ok(mut quote_rx) => {
                        attempt = 0;
                        if was_down {
                            was_down = false;
                            info!(venue = %venue, "Venue connection restored");
                            let _ = inner
                                .events_tx
                                .send(ConnectionEvent::Restored { venue })
                                .await;
                        }

                        loop {
                            tokio::select! {
                                maybe_quote = quote_rx.recv() => match maybe_quote {
                                    Some(quote) => inner.fan_out(&quote),
                                    None => break,
                                },
                                changed = shutdown_rx.changed() => {
                                    if changed.is_err() || *shutdown_rx.borrow() {
                                        adapter.disconnect().await;
                                        return;
                                    }
                                }
                            }
                        }

                        warn!(venue = %venue, "Venue quote stream ended");
                        was_down = true;
                        let _ = inner
                            .events_tx
                            .send(ConnectionEvent::Failed {
                                venue,
                                reason: "quote stream ended".to_string(),
                            })
                            .await;
                    }
                    Err(e) => {
                        was_down = true;
                        error!(venue = %venue, error = %e, "Venue connect failed");
                        let _ = inner
                            .events_tx
                            .send(ConnectionEvent::Failed {
                                venue,
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }

                // Exponential backoff, capped per cycle.
                let delay = base_delay * 2u32.pow(attempt.min(8));
                attempt = (attempt + 1) % max_attempts;
                tokio::select! {
                    () = sleep(delay) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            adapter.disconnect().await;
                            return;
                        }
                    }
                }
            }
            adapter.disconnect().await;
        });
    }

    /// Total quotes fanned out since startup.
    #[must_use]
    pub fn quotes_forwarded(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }

    /// Quotes dropped per subscriber due to full queues.
    #[must_use]
    pub fn dropped_by_subscriber(&self) -> Vec<(String, u64)> {
        self.inner
            .subscribers
            .read()
            .iter()
            .map(|s| (s.name.clone(), s.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    /// Stops accepting quotes, disconnects adapters, and gives subscriber
    /// queues up to the configured grace period to drain.
    pub async fn shutdown(&self) {
        info!("Ingestion hub shutting down");
        // send_replace updates the value even with no live supervisors.
        self.inner.shutdown.send_replace(true);

        let deadline = Instant::now() + self.inner.config.shutdown_grace;
        loop {
            let drained = {
                let subs = self.inner.subscribers.read();
                subs.iter()
                    .all(|s| s.tx.capacity() == s.tx.max_capacity())
            };
            if drained || Instant::now() >= deadline {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use cross_arb_core::error::ArbError;
    use cross_arb_core::types::{
        Balance, Order, OrderBook, OrderRequest, TradingFees, VenuePosition,
    };
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    fn quote(venue: VenueId, bid: rust_decimal::Decimal) -> Quote {
        Quote {
            venue,
            symbol: "BTC".to_string(),
            bid,
            ask: bid + dec!(1),
            bid_size: None,
            ask_size: None,
            last: None,
            mark_price: None,
            volume_24h: None,
            timestamp: Utc::now(),
        }
    }

    /// Adapter that emits a fixed quote sequence then ends its stream.
    struct ScriptedAdapter {
        venue: VenueId,
        quotes: Vec<Quote>,
        connects: AtomicU32,
    }

    #[async_trait]
    impl VenueAdapter for ScriptedAdapter {
        fn venue(&self) -> VenueId {
            self.venue
        }

        async fn connect(&self, _symbols: &[String]) -> Result<mpsc::Receiver<Quote>, ArbError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(64);
            let quotes = self.quotes.clone();
            tokio::spawn(async move {
                for q in quotes {
                    if tx.send(q).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn snapshot_ticker(&self, _symbol: &str) -> Result<Quote, ArbError> {
            Err(ArbError::Transport("not implemented".to_string()))
        }

        async fn snapshot_book(&self, _symbol: &str, _depth: usize) -> Result<OrderBook, ArbError> {
            Err(ArbError::Transport("not implemented".to_string()))
        }

        async fn place_order(&self, _request: OrderRequest) -> Result<Order, ArbError> {
            Err(ArbError::NotAuthenticated {
                venue: self.venue.to_string(),
            })
        }

        async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> Result<bool, ArbError> {
            Ok(false)
        }

        async fn fetch_order(&self, _order_id: &str, _symbol: &str) -> Result<Order, ArbError> {
            Err(ArbError::Transport("not implemented".to_string()))
        }

        async fn fetch_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<Order>, ArbError> {
            Ok(Vec::new())
        }

        async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, ArbError> {
            Ok(HashMap::new())
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

    #[tokio::test]
    async fn test_fan_out_preserves_per_venue_order() {
        let (hub, _events) = IngestionHub::new(HubConfig::default());
        let mut rx = hub.subscribe("detector");

        let adapter = Arc::new(ScriptedAdapter {
            venue: VenueId::Binance,
            quotes: vec![
                quote(VenueId::Binance, dec!(100)),
                quote(VenueId::Binance, dec!(101)),
                quote(VenueId::Binance, dec!(102)),
            ],
            connects: AtomicU32::new(0),
        });
        hub.add(adapter, vec!["BTC".to_string()]);

        let mut bids = Vec::new();
        for _ in 0..3 {
            let q = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("quote timed out")
                .expect("stream open");
            bids.push(q.bid);
        }
        assert_eq!(bids, vec![dec!(100), dec!(101), dec!(102)]);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_each_quote() {
        let (hub, _events) = IngestionHub::new(HubConfig::default());
        let mut rx1 = hub.subscribe("detector");
        let mut rx2 = hub.subscribe("recorder");

        let adapter = Arc::new(ScriptedAdapter {
            venue: VenueId::Bybit,
            quotes: vec![quote(VenueId::Bybit, dec!(200))],
            connects: AtomicU32::new(0),
        });
        hub.add(adapter, vec!["BTC".to_string()]);

        let q1 = tokio::time::timeout(Duration::from_secs(2), rx1.recv())
            .await
            .unwrap()
            .unwrap();
        let q2 = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q1.bid, dec!(200));
        assert_eq!(q2.bid, dec!(200));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_newest_without_stalling() {
        let config = HubConfig {
            queue_size: 2,
            ..HubConfig::default()
        };
        let (hub, _events) = IngestionHub::new(config);
        // Receiver never read: the queue fills after 2 quotes.
        let _rx = hub.subscribe("sleepy");

        let quotes: Vec<Quote> = (0..10)
            .map(|i| quote(VenueId::Gateio, dec!(100) + rust_decimal::Decimal::from(i)))
            .collect();
        let adapter = Arc::new(ScriptedAdapter {
            venue: VenueId::Gateio,
            quotes,
            connects: AtomicU32::new(0),
        });
        hub.add(adapter, vec!["BTC".to_string()]);

        // Wait for the forwarder to chew through the script.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let dropped = hub
            .dropped_by_subscriber()
            .into_iter()
            .find(|(name, _)| name == "sleepy")
            .map(|(_, n)| n)
            .unwrap();
        assert_eq!(dropped, 8);
        assert_eq!(hub.quotes_forwarded(), 10);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_stream_end_emits_failed_event() {
        let (hub, mut events) = IngestionHub::new(HubConfig::default());
        let adapter = Arc::new(ScriptedAdapter {
            venue: VenueId::KuCoin,
            quotes: vec![quote(VenueId::KuCoin, dec!(5))],
            connects: AtomicU32::new(0),
        });
        hub.add(adapter, vec!["BTC".to_string()]);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            ConnectionEvent::Failed {
                venue: VenueId::KuCoin,
                ..
            }
        ));
        hub.shutdown().await;
    }
}
