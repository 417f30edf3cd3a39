//! Engine: the explicit core handle that owns every component and runs the
//! quote → detect → risk → position pipeline.
//!
//! One consumer task processes quotes in arrival order, so risk decisions
//! are serialized globally in opportunity-emission order. Shutdown
//! propagates through the pipeline: the hub stops intake, the manager
//! force-closes every open position, and the adapters disconnect.

use chrono::{NaiveDate, Utc};
use cross_arb_core::config::AppConfig;
use cross_arb_core::traits::VenueAdapter;
use cross_arb_core::types::{Quote, Side, VenueId};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::detector::{Detector, DetectorConfig, Opportunity};
use crate::fees::FeeCalculator;
use crate::position::{PositionManager, PositionManagerConfig, PositionEvent};
use crate::risk::{RiskGate, VenueBalances};
use crate::router::{OrderRouter, RouterConfig};
use crate::slippage;
use cross_arb_ingest::{HubConfig, IngestionHub, PriceCache};

/// Whether the engine only observes or also trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeMode {
    /// Detect and publish opportunities without touching the gate or any
    /// venue order surface.
    Observe,
    /// Full pipeline: risk-gate accepted opportunities become positions.
    Trade,
}

/// Handle for requesting engine shutdown from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Flips the engine into close-all-then-stop.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Owns config, cache, hub, detector, gate, router, and manager.
pub struct Engine {
    config: AppConfig,
    mode: TradeMode,
    cache: PriceCache,
    hub: IngestionHub,
    router: OrderRouter,
    manager: Arc<PositionManager>,
    detector: Detector,
    gate: RiskGate,
    venues: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    balances: VenueBalances,
    opportunities_tx: Option<mpsc::Sender<Opportunity>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    current_day: Option<NaiveDate>,
}

impl Engine {
    /// Builds an engine from configuration. Returns the engine plus the
    /// position-event receiver for observers.
    #[must_use]
    pub fn new(config: AppConfig, mode: TradeMode) -> (Self, mpsc::Receiver<PositionEvent>) {
        let (hub, _connection_events) = IngestionHub::new(HubConfig {
            websocket: config.websocket.clone(),
            ..HubConfig::default()
        });
        let (router, _order_events) = OrderRouter::new(RouterConfig::default());
        let manager_config = PositionManagerConfig {
            stop_loss_pct: config.risk.stop_loss_percentage,
            max_position_age: std::time::Duration::from_secs(
                config.risk.max_position_duration_secs,
            ),
            ..PositionManagerConfig::default()
        };
        let (manager, position_events) = PositionManager::new(router.clone(), manager_config);
        let detector = Detector::new(DetectorConfig::from(&config.arbitrage));
        let gate = RiskGate::new(config.risk.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        (
            Self {
                config,
                mode,
                cache: PriceCache::new(),
                hub,
                router,
                manager,
                detector,
                gate,
                venues: HashMap::new(),
                balances: VenueBalances::new(),
                opportunities_tx: None,
                shutdown_tx,
                shutdown_rx,
                current_day: None,
            },
            position_events,
        )
    }

    /// Registers a venue with the hub and (in trade mode) the router.
    pub fn add_venue(&mut self, adapter: Arc<dyn VenueAdapter>, symbols: Vec<String>) {
        let venue = adapter.venue();
        self.hub.add(Arc::clone(&adapter), symbols);
        if self.mode == TradeMode::Trade {
            self.router.add_venue(Arc::clone(&adapter));
        }
        self.venues.insert(venue, adapter);
    }

    /// Opens a stream of every emitted opportunity (used by the monitor).
    pub fn opportunity_stream(&mut self) -> mpsc::Receiver<Opportunity> {
        let (tx, rx) = mpsc::channel(1024);
        self.opportunities_tx = Some(tx);
        rx
    }

    /// Returns a handle that triggers close-all-then-stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// The shared price cache.
    #[must_use]
    pub fn cache(&self) -> PriceCache {
        self.cache.clone()
    }

    /// The position manager.
    #[must_use]
    pub fn manager(&self) -> Arc<PositionManager> {
        Arc::clone(&self.manager)
    }

    /// The ingestion hub.
    #[must_use]
    pub fn hub(&self) -> IngestionHub {
        self.hub.clone()
    }

    /// Runs the pipeline until shutdown is requested or all venue streams
    /// end.
    pub async fn run(mut self) {
        let mut quotes = self.hub.subscribe("engine");
        let mut shutdown_rx = self.shutdown_rx.clone();

        if self.mode == TradeMode::Trade {
            self.refresh_balances().await;
        }
        info!(mode = ?self.mode, "Engine started");

        while !*shutdown_rx.borrow() {
            tokio::select! {
                maybe_quote = quotes.recv() => match maybe_quote {
                    Some(quote) => self.handle_quote(quote).await,
                    None => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Engine stopping: closing all positions");
        if self.mode == TradeMode::Trade {
            self.manager.close_all().await;
            for position in self.manager.active_positions() {
                warn!(position_id = %position.id, status = ?position.status, "Position not closed at shutdown");
            }
        }
        self.hub.shutdown().await;
    }

    async fn handle_quote(&mut self, quote: Quote) {
        self.roll_day_if_needed(&quote);

        // Detector runs only after the cache holds the triggering quote;
        // stale writes trigger no re-scan.
        if !self.cache.update(&quote) {
            return;
        }

        let opportunities = self.detector.on_quote(&quote, &self.cache);
        for opportunity in opportunities {
            if let Some(tx) = &self.opportunities_tx {
                let _ = tx.try_send(opportunity.clone());
            }
            if self.mode == TradeMode::Trade {
                self.try_execute(opportunity).await;
            }
        }

        if self.mode == TradeMode::Trade {
            self.evaluate_closes(&quote.symbol).await;
        }
    }

    /// UTC day rollover: clear the cache and reset daily risk counters.
    fn roll_day_if_needed(&mut self, quote: &Quote) {
        let day = quote.timestamp.date_naive();
        match self.current_day {
            Some(current) if day > current => {
                info!(day = %day, "UTC day rollover");
                self.cache.clear();
                self.gate.reset_daily();
                self.current_day = Some(day);
            }
            None => self.current_day = Some(day),
            Some(_) => {}
        }
    }

    async fn try_execute(&mut self, mut opportunity: Opportunity) {
        self.estimate_slippage(&mut opportunity).await;

        let active = self.manager.active_positions();
        let now = Utc::now();
        match self
            .gate
            .validate(&opportunity, &active, &self.balances, now)
        {
            Ok(()) => {
                let position = self.manager.open_position(&opportunity).await;
                if position.is_open() {
                    self.gate.position_opened(&position, Utc::now());
                    self.refresh_balances().await;
                }
            }
            Err(rejection) => {
                debug!(
                    opportunity_id = %opportunity.id,
                    reason = %rejection,
                    "Opportunity rejected by risk gate"
                );
            }
        }
    }

    /// Depth-snapshot both venues and attach slippage estimates. Estimation
    /// failures leave the fields unset; the gate then judges on net spread
    /// without them.
    async fn estimate_slippage(&self, opportunity: &mut Opportunity) {
        let size = opportunity.recommended_size;
        if let Some(adapter) = self.venues.get(&opportunity.buy_venue) {
            if let Ok(book) = adapter.snapshot_book(&opportunity.symbol, 20).await {
                opportunity.slippage_buy =
                    Some(slippage::estimate(&book, Side::Buy, size).slippage_pct);
            }
        }
        if let Some(adapter) = self.venues.get(&opportunity.sell_venue) {
            if let Ok(book) = adapter.snapshot_book(&opportunity.symbol, 20).await {
                opportunity.slippage_sell =
                    Some(slippage::estimate(&book, Side::Sell, size).slippage_pct);
            }
        }
    }

    /// Re-evaluates close conditions for every open position on a symbol,
    /// using the spread recomputed in the entry direction.
    async fn evaluate_closes(&mut self, symbol: &str) {
        let now = Utc::now();
        for position in self.manager.active_positions() {
            if position.symbol != symbol || !position.is_open() {
                continue;
            }
            let Some(long_quote) = self.cache.get(symbol, position.long_venue) else {
                continue;
            };
            let Some(short_quote) = self.cache.get(symbol, position.short_venue) else {
                continue;
            };

            let current_spread_pct =
                (short_quote.bid - long_quote.ask) / long_quote.ask * dec!(100);
            self.manager
                .update_unrealized(&position.id, long_quote.bid, short_quote.ask);

            let position = match self.manager.get(&position.id) {
                Some(p) => p,
                None => continue,
            };
            if let Some(reason) = self.manager.should_close(&position, current_spread_pct, now) {
                info!(
                    position_id = %position.id,
                    reason = %reason,
                    current_spread_pct = %current_spread_pct,
                    "Close condition met"
                );
                match self.manager.close_position(&position.id, reason).await {
                    Ok(true) => {
                        if let Some(closed) = self.manager.get(&position.id) {
                            self.gate.position_closed(&closed);
                        }
                        self.refresh_balances().await;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(position_id = %position.id, error = %e, "Close failed"),
                }
            }
        }
    }

    async fn refresh_balances(&mut self) {
        for (venue, adapter) in &self.venues {
            match adapter.fetch_balances().await {
                Ok(balances) => {
                    self.balances.insert(*venue, balances);
                }
                Err(e) => {
                    debug!(venue = %venue, error = %e, "Balance fetch failed");
                }
            }
        }
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Total opportunities emitted so far.
    #[must_use]
    pub fn opportunities_emitted(&self) -> u64 {
        self.detector.opportunities_emitted()
    }

    /// Fee calculator derived from the loaded configuration.
    #[must_use]
    pub fn fee_calculator(&self) -> FeeCalculator {
        FeeCalculator::from_config(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionStatus;
    use crate::testing::MockVenue;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn quote(venue: VenueId, bid: Decimal, ask: Decimal, offset_ms: i64) -> Quote {
        Quote {
            venue,
            symbol: "BTC".to_string(),
            bid,
            ask,
            bid_size: Some(dec!(100)),
            ask_size: Some(dec!(100)),
            last: None,
            mark_price: None,
            volume_24h: None,
            timestamp: Utc::now() + ChronoDuration::milliseconds(offset_ms),
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.arbitrage.min_spread_threshold = dec!(0.1);
        config.arbitrage.max_position_size = dec!(1000);
        config.arbitrage.min_profit_threshold = dec!(1);
        // Headroom over the detector's sizing so rounding never trips the
        // per-position cap in these tests.
        config.risk.max_position_size = dec!(2000);
        config.risk.min_net_spread = dec!(0.05);
        config
    }

    #[tokio::test]
    async fn test_observe_mode_publishes_opportunities_without_trading() {
        let (mut engine, _position_events) = Engine::new(test_config(), TradeMode::Observe);
        let mut opportunities = engine.opportunity_stream();

        let binance = Arc::new(MockVenue::new(VenueId::Binance).with_quotes(vec![quote(
            VenueId::Binance,
            dec!(99.9),
            dec!(100),
            0,
        )]));
        let bybit = Arc::new(MockVenue::new(VenueId::Bybit).with_quotes(vec![quote(
            VenueId::Bybit,
            dec!(101),
            dec!(101.1),
            1,
        )]));
        engine.add_venue(binance.clone(), vec!["BTC".to_string()]);
        engine.add_venue(bybit.clone(), vec!["BTC".to_string()]);

        let shutdown = engine.shutdown_handle();
        let run = tokio::spawn(engine.run());

        let opportunity = tokio::time::timeout(Duration::from_secs(2), opportunities.recv())
            .await
            .expect("opportunity timed out")
            .expect("stream open");
        assert_eq!(opportunity.buy_venue, VenueId::Binance);
        assert_eq!(opportunity.sell_venue, VenueId::Bybit);
        // Observe mode never submits orders.
        assert_eq!(binance.placed_count(), 0);
        assert_eq!(bybit.placed_count(), 0);

        shutdown.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(2), run).await;
    }

    #[tokio::test]
    async fn test_trade_mode_opens_position_on_dislocation() {
        let (mut engine, mut position_events) = Engine::new(test_config(), TradeMode::Trade);
        let manager = engine.manager();

        let binance = Arc::new(
            MockVenue::new(VenueId::Binance)
                .with_price(dec!(100))
                .with_quotes(vec![quote(VenueId::Binance, dec!(99.9), dec!(100), 0)]),
        );
        let bybit = Arc::new(
            MockVenue::new(VenueId::Bybit)
                .with_price(dec!(101))
                .with_quotes(vec![quote(VenueId::Bybit, dec!(101), dec!(101.1), 1)]),
        );
        engine.add_venue(binance.clone(), vec!["BTC".to_string()]);
        engine.add_venue(bybit.clone(), vec!["BTC".to_string()]);

        let shutdown = engine.shutdown_handle();
        let run = tokio::spawn(engine.run());

        let event = tokio::time::timeout(Duration::from_secs(2), position_events.recv())
            .await
            .expect("position event timed out")
            .expect("stream open");
        let PositionEvent::Opened(position) = event else {
            panic!("expected Opened event");
        };
        assert_eq!(position.long_venue, VenueId::Binance);
        assert_eq!(position.short_venue, VenueId::Bybit);
        assert!(binance.placed_count() >= 1);
        assert!(bybit.placed_count() >= 1);

        shutdown.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(2), run).await;
        // Shutdown force-closed the open position.
        let position = manager.get(&position.id).unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn test_trade_mode_closes_on_convergence() {
        let mut config = test_config();
        // Cooldown would otherwise block nothing here, but keep it tight.
        config.risk.cooldown_period_secs = 1;
        let (mut engine, mut position_events) = Engine::new(config, TradeMode::Trade);
        let manager = engine.manager();

        // First quotes dislocate, later quotes converge inside the 0.1 %
        // exit target.
        let binance = Arc::new(
            MockVenue::new(VenueId::Binance)
                .with_price(dec!(100))
                .with_quotes(vec![
                    quote(VenueId::Binance, dec!(99.9), dec!(100), 0),
                    quote(VenueId::Binance, dec!(100.55), dec!(100.6), 500),
                ]),
        );
        let bybit = Arc::new(
            MockVenue::new(VenueId::Bybit)
                .with_price(dec!(101))
                .with_quotes(vec![
                    quote(VenueId::Bybit, dec!(101), dec!(101.1), 1),
                    quote(VenueId::Bybit, dec!(100.6), dec!(100.7), 501),
                ]),
        );
        engine.add_venue(binance, vec!["BTC".to_string()]);
        engine.add_venue(bybit, vec!["BTC".to_string()]);

        let shutdown = engine.shutdown_handle();
        let run = tokio::spawn(engine.run());

        let opened = tokio::time::timeout(Duration::from_secs(2), position_events.recv())
            .await
            .expect("open event timed out")
            .expect("stream open");
        assert!(matches!(opened, PositionEvent::Opened(_)));

        let closed = tokio::time::timeout(Duration::from_secs(2), position_events.recv())
            .await
            .expect("close event timed out")
            .expect("stream open");
        let PositionEvent::Closed(position) = closed else {
            panic!("expected Closed event");
        };
        assert_eq!(position.status, PositionStatus::Closed);
        assert!(position.closed_at.is_some());

        shutdown.shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(2), run).await;
        assert!(manager.active_positions().is_empty());
    }
}
