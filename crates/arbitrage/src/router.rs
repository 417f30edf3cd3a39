//! Order routing over venue adapters.
//!
//! Uniform submit/cancel/status with idempotent placement keyed on
//! `client_order_id` and a short-lived monitor per order that polls the
//! venue until the order reaches a terminal state, emitting lifecycle
//! events on a channel. The first terminal status observed is
//! authoritative.

use chrono::Utc;
use cross_arb_core::error::ArbError;
use cross_arb_core::traits::VenueAdapter;
use cross_arb_core::types::{Order, OrderRequest, OrderStatus, VenueId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Order lifecycle events emitted by the router.
#[derive(Debug, Clone)]
pub enum OrderLifecycleEvent {
    /// Order accepted by the venue.
    Placed(Order),
    /// Order reached `Filled`.
    Filled(Order),
    /// Order reached `Cancelled` or `Expired`.
    Cancelled(Order),
    /// Order reached `Rejected` or monitoring gave up.
    Failed(Order),
}

/// Router timing configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Deadline for the venue to acknowledge a submission.
    pub ack_timeout: Duration,
    /// Interval between status polls.
    pub poll_interval: Duration,
    /// Total time the monitor waits for a terminal state.
    pub monitor_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            monitor_timeout: Duration::from_secs(300),
        }
    }
}

struct RouterInner {
    config: RouterConfig,
    adapters: RwLock<HashMap<VenueId, Arc<dyn VenueAdapter>>>,
    /// Orders by client id; monitors keep these current.
    orders: RwLock<HashMap<String, Order>>,
    events_tx: mpsc::Sender<OrderLifecycleEvent>,
}

/// Routes orders to venue adapters with idempotent placement.
#[derive(Clone)]
pub struct OrderRouter {
    inner: Arc<RouterInner>,
}

impl OrderRouter {
    /// Creates a router and the receiver for its lifecycle events.
    #[must_use]
    pub fn new(config: RouterConfig) -> (Self, mpsc::Receiver<OrderLifecycleEvent>) {
        let (events_tx, events_rx) = mpsc::channel(1024);
        (
            Self {
                inner: Arc::new(RouterInner {
                    config,
                    adapters: RwLock::new(HashMap::new()),
                    orders: RwLock::new(HashMap::new()),
                    events_tx,
                }),
            },
            events_rx,
        )
    }

    /// Registers the adapter for a venue.
    pub fn add_venue(&self, adapter: Arc<dyn VenueAdapter>) {
        let venue = adapter.venue();
        self.inner.adapters.write().insert(venue, adapter);
        info!(venue = %venue, "Registered order routing for venue");
    }

    fn adapter(&self, venue: VenueId) -> Result<Arc<dyn VenueAdapter>, ArbError> {
        self.inner
            .adapters
            .read()
            .get(&venue)
            .cloned()
            .ok_or_else(|| ArbError::VenueDisconnected(format!("no adapter for {venue}")))
    }

    /// Current state of an order by client id.
    #[must_use]
    pub fn get(&self, client_order_id: &str) -> Option<Order> {
        self.inner.orders.read().get(client_order_id).cloned()
    }

    /// Submits an order.
    ///
    /// Placement is idempotent on `client_order_id`: a repeated submission
    /// returns the currently known state of the existing order instead of
    /// sending a duplicate to the venue.
    ///
    /// # Errors
    ///
    /// Returns [`ArbError::Timeout`] when the venue does not acknowledge
    /// within the ack deadline, or the adapter's submission error.
    pub async fn place(&self, venue: VenueId, request: OrderRequest) -> Result<Order, ArbError> {
        if let Some(existing) = self.get(&request.client_order_id) {
            debug!(
                client_order_id = %request.client_order_id,
                status = ?existing.status,
                "Duplicate submission, returning existing order"
            );
            return Ok(existing);
        }

        let adapter = self.adapter(venue)?;
        let client_order_id = request.client_order_id.clone();
        let symbol = request.symbol.clone();

        info!(
            venue = %venue,
            symbol = %symbol,
            side = %request.side,
            quantity = %request.quantity,
            client_order_id = %client_order_id,
            "Placing order"
        );

        let order = match timeout(self.inner.config.ack_timeout, adapter.place_order(request)).await
        {
            Ok(Ok(order)) => order,
            Ok(Err(e)) => {
                error!(venue = %venue, client_order_id = %client_order_id, error = %e, "Order submission failed");
                return Err(e);
            }
            Err(_) => {
                error!(venue = %venue, client_order_id = %client_order_id, "Order ack timed out");
                return Err(ArbError::Timeout(format!(
                    "order ack on {venue} for {client_order_id}"
                )));
            }
        };

        self.inner
            .orders
            .write()
            .insert(client_order_id.clone(), order.clone());
        let _ = self
            .inner
            .events_tx
            .send(OrderLifecycleEvent::Placed(order.clone()))
            .await;

        if order.status.is_terminal() {
            self.finalize(&order).await;
        } else {
            self.spawn_monitor(venue, order.clone());
        }

        Ok(order)
    }

    /// Best-effort cancel. Returns whether the venue acknowledged it.
    pub async fn cancel(&self, venue: VenueId, order_id: &str, symbol: &str) -> bool {
        match self.adapter(venue) {
            Ok(adapter) => match adapter.cancel_order(order_id, symbol).await {
                Ok(acked) => acked,
                Err(e) => {
                    warn!(venue = %venue, order_id = %order_id, error = %e, "Cancel failed");
                    false
                }
            },
            Err(e) => {
                warn!(venue = %venue, order_id = %order_id, error = %e, "Cancel failed");
                false
            }
        }
    }

    /// Fetches the live state of an order and refreshes the local record.
    pub async fn refresh(
        &self,
        venue: VenueId,
        order_id: &str,
        symbol: &str,
    ) -> Result<Order, ArbError> {
        let adapter = self.adapter(venue)?;
        let order = adapter.fetch_order(order_id, symbol).await?;
        self.update_if_not_terminal(&order);
        Ok(order)
    }

    /// Updates the stored record unless it already reached a terminal
    /// state. Concurrent terminal transitions resolve to whichever landed
    /// first.
    fn update_if_not_terminal(&self, order: &Order) {
        let mut orders = self.inner.orders.write();
        match orders.get(&order.client_order_id) {
            Some(existing) if existing.status.is_terminal() => {}
            _ => {
                orders.insert(order.client_order_id.clone(), order.clone());
            }
        }
    }

    async fn finalize(&self, order: &Order) {
        let event = match order.status {
            OrderStatus::Filled => OrderLifecycleEvent::Filled(order.clone()),
            OrderStatus::Cancelled | OrderStatus::Expired => {
                OrderLifecycleEvent::Cancelled(order.clone())
            }
            _ => OrderLifecycleEvent::Failed(order.clone()),
        };
        let _ = self.inner.events_tx.send(event).await;
    }

    /// Polls the venue until the order is terminal or the monitor times
    /// out, keeping the local record current.
    fn spawn_monitor(&self, venue: VenueId, order: Order) {
        let router = self.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + router.inner.config.monitor_timeout;

            loop {
                sleep(router.inner.config.poll_interval).await;
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        client_order_id = %order.client_order_id,
                        "Order monitor timed out before terminal state"
                    );
                    let mut timed_out = order.clone();
                    timed_out.status = OrderStatus::Expired;
                    timed_out.timestamp = Utc::now();
                    router.update_if_not_terminal(&timed_out);
                    router.finalize(&timed_out).await;
                    return;
                }

                match router.refresh(venue, &order.id, &order.symbol).await {
                    Ok(current) => {
                        if current.status.is_terminal() {
                            debug!(
                                client_order_id = %current.client_order_id,
                                status = ?current.status,
                                "Order reached terminal state"
                            );
                            router.finalize(&current).await;
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(
                            client_order_id = %order.client_order_id,
                            error = %e,
                            "Order status poll failed"
                        );
                    }
                }
            }
        });
    }
}
