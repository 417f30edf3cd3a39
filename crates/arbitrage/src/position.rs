//! Paired position lifecycle.
//!
//! A position is a delta-neutral long/short pair across two venues. Both
//! legs are submitted concurrently; asymmetric fills are reconciled by
//! cancelling the larger leg's residual and, if needed, topping up the
//! smaller leg with a correcting market order. Only reconciliation failure
//! leaves residual exposure, and it is flagged loudly.

use chrono::{DateTime, Utc};
use cross_arb_core::error::ArbError;
use cross_arb_core::types::{Order, OrderRequest, Side, VenueId};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::detector::Opportunity;
use crate::router::OrderRouter;

// =============================================================================
// Position State
// =============================================================================

/// Position lifecycle states. Transitions never skip:
/// `Pending → Opening → {Open | Failed}`, `Open → Closing → {Closed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Created, nothing submitted yet.
    Pending,
    /// Entry legs in flight.
    Opening,
    /// Both legs filled with equal size.
    Open,
    /// Close legs in flight.
    Closing,
    /// Both close legs terminal, PnL realized.
    Closed,
    /// Terminal failure; see `error_message`.
    Failed,
}

/// Why a close was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Spread collapsed to within the exit target.
    Convergence,
    /// Position exceeded its maximum age.
    Timeout,
    /// Unrealized loss breached the stop-loss.
    StopLoss,
    /// Operator or shutdown trigger.
    Forced,
}

impl CloseReason {
    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Convergence => "convergence",
            Self::Timeout => "timeout",
            Self::StopLoss => "stop_loss",
            Self::Forced => "forced",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal position failures.
#[derive(Debug, Clone, Error)]
pub enum PositionError {
    /// A venue rejected one of the legs.
    #[error("order rejected on {venue}: {reason}")]
    OrderRejected {
        /// Rejecting venue.
        venue: String,
        /// Venue-reported reason.
        reason: String,
    },

    /// An ack or close exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Legs could not be equalized; residual exposure remains.
    #[error("reconciliation failed: {0}")]
    ReconciliationFailed(String),

    /// A venue connection dropped mid-lifecycle.
    #[error("venue disconnected: {0}")]
    VenueDisconnected(String),
}

/// A paired long/short position across two venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitragePosition {
    /// Unique id (UUID v4).
    pub id: String,
    /// Opportunity that triggered this position.
    pub opportunity_id: String,
    /// Canonical short symbol.
    pub symbol: String,
    /// Venue holding the long leg.
    pub long_venue: VenueId,
    /// Venue holding the short leg.
    pub short_venue: VenueId,
    /// Size in base asset (equalized across legs once open).
    pub size: Decimal,
    /// Spread percent at entry.
    pub entry_spread: Decimal,
    /// Convergence exit target in percent.
    pub exit_target_pct: Decimal,
    /// Entry buy order.
    pub long_order: Option<Order>,
    /// Entry sell order.
    pub short_order: Option<Order>,
    /// Closing sell order on the long venue.
    pub close_long_order: Option<Order>,
    /// Closing buy order on the short venue.
    pub close_short_order: Option<Order>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When both legs were confirmed filled.
    pub opened_at: Option<DateTime<Utc>>,
    /// When both close legs were confirmed terminal.
    pub closed_at: Option<DateTime<Utc>>,
    /// Realized PnL net of fees (set on close).
    pub realized_pnl: Decimal,
    /// Mark-to-market PnL while open.
    pub unrealized_pnl: Decimal,
    /// Fees accumulated across all legs.
    pub fees_paid: Decimal,
    /// Lifecycle state.
    pub status: PositionStatus,
    /// Failure detail, when `Failed`.
    pub error_message: Option<String>,
    /// True when a failed reconciliation left one-sided exposure.
    pub residual_exposure: bool,
}

impl ArbitragePosition {
    fn from_opportunity(opp: &Opportunity, exit_target_pct: Decimal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            opportunity_id: opp.id.clone(),
            symbol: opp.symbol.clone(),
            long_venue: opp.buy_venue,
            short_venue: opp.sell_venue,
            size: opp.recommended_size,
            entry_spread: opp.spread_pct,
            exit_target_pct,
            long_order: None,
            short_order: None,
            close_long_order: None,
            close_short_order: None,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            status: PositionStatus::Pending,
            error_message: None,
            residual_exposure: false,
        }
    }

    /// Whether the position currently holds both legs.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Notional value at entry, in quote asset.
    #[must_use]
    pub fn value(&self) -> Decimal {
        let entry = self
            .long_order
            .as_ref()
            .and_then(Order::fill_price)
            .unwrap_or(Decimal::ZERO);
        self.size * entry
    }

    /// Seconds held, measured from `opened_at`.
    #[must_use]
    pub fn duration_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        let opened = self.opened_at?;
        let end = self.closed_at.unwrap_or(now);
        Some((end - opened).num_seconds())
    }
}

// =============================================================================
// Position Manager
// =============================================================================

/// Close-policy configuration.
#[derive(Debug, Clone)]
pub struct PositionManagerConfig {
    /// Convergence exit target in percent.
    pub exit_target_pct: Decimal,
    /// Maximum position age before a timeout close.
    pub max_position_age: Duration,
    /// Stop-loss as percent of position value.
    pub stop_loss_pct: Decimal,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            exit_target_pct: dec!(0.1),
            max_position_age: Duration::from_secs(24 * 3600),
            stop_loss_pct: dec!(2.0),
        }
    }
}

/// Position lifecycle events emitted by the manager.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    /// Both legs filled; position is live.
    Opened(ArbitragePosition),
    /// Position closed with realized PnL.
    Closed(ArbitragePosition),
    /// Position failed terminally.
    Failed(ArbitragePosition),
}

/// Aggregate statistics over closed positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionStats {
    /// All positions ever created.
    pub total: usize,
    /// Currently active (non-terminal).
    pub active: usize,
    /// Reached `Closed`.
    pub closed: usize,
    /// Reached `Failed`.
    pub failed: usize,
    /// Fraction of closed positions with positive PnL (0-100).
    pub win_rate_pct: f64,
    /// Sum of realized PnL over closed positions.
    pub total_pnl: Decimal,
}

/// Opens, monitors, and closes paired positions. Sole mutator of the
/// position store; observers receive cloned snapshots.
pub struct PositionManager {
    router: OrderRouter,
    config: PositionManagerConfig,
    active: RwLock<HashMap<String, ArbitragePosition>>,
    history: RwLock<Vec<ArbitragePosition>>,
    events_tx: mpsc::Sender<PositionEvent>,
}

impl PositionManager {
    /// Creates a manager and the receiver for its lifecycle events.
    #[must_use]
    pub fn new(
        router: OrderRouter,
        config: PositionManagerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<PositionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            Arc::new(Self {
                router,
                config,
                active: RwLock::new(HashMap::new()),
                history: RwLock::new(Vec::new()),
                events_tx,
            }),
            events_rx,
        )
    }

    /// Snapshot of all non-terminal positions.
    #[must_use]
    pub fn active_positions(&self) -> Vec<ArbitragePosition> {
        self.active.read().values().cloned().collect()
    }

    /// Snapshot of one position by id, active or historical.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ArbitragePosition> {
        if let Some(p) = self.active.read().get(id) {
            return Some(p.clone());
        }
        self.history.read().iter().find(|p| p.id == id).cloned()
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> PositionStats {
        let active = self.active.read().len();
        let history = self.history.read();
        let closed: Vec<&ArbitragePosition> = history
            .iter()
            .filter(|p| p.status == PositionStatus::Closed)
            .collect();
        let failed = history
            .iter()
            .filter(|p| p.status == PositionStatus::Failed)
            .count();
        let wins = closed
            .iter()
            .filter(|p| p.realized_pnl > Decimal::ZERO)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let win_rate_pct = if closed.is_empty() {
            0.0
        } else {
            wins as f64 / closed.len() as f64 * 100.0
        };
        PositionStats {
            total: active + history.len(),
            active,
            closed: closed.len(),
            failed,
            win_rate_pct,
            total_pnl: closed.iter().map(|p| p.realized_pnl).sum(),
        }
    }

    /// Opens a paired position for an accepted opportunity.
    ///
    /// Both legs are submitted concurrently with deterministic client ids.
    /// The returned snapshot is `Open` on success and `Failed` otherwise.
    pub async fn open_position(&self, opp: &Opportunity) -> ArbitragePosition {
        let mut position = ArbitragePosition::from_opportunity(opp, self.config.exit_target_pct);
        position.status = PositionStatus::Opening;
        let id = position.id.clone();
        self.active.write().insert(id.clone(), position.clone());

        info!(
            position_id = %id,
            opportunity_id = %opp.id,
            symbol = %opp.symbol,
            long_venue = %opp.buy_venue,
            short_venue = %opp.sell_venue,
            size = %opp.recommended_size,
            "Opening position"
        );

        let long_req = OrderRequest::market(
            opp.symbol.clone(),
            Side::Buy,
            opp.recommended_size,
            format!("{id}_long"),
        );
        let short_req = OrderRequest::market(
            opp.symbol.clone(),
            Side::Sell,
            opp.recommended_size,
            format!("{id}_short"),
        );

        let (long_result, short_result) = tokio::join!(
            self.router.place(opp.buy_venue, long_req),
            self.router.place(opp.sell_venue, short_req),
        );

        match (long_result, short_result) {
            (Ok(long), Ok(short)) if long.status.is_fill() && short.status.is_fill() => {
                position.fees_paid += long.fee.unwrap_or(Decimal::ZERO)
                    + short.fee.unwrap_or(Decimal::ZERO);
                if long.filled == short.filled && long.filled > Decimal::ZERO {
                    position.long_order = Some(long);
                    position.short_order = Some(short);
                    position.size = position.long_order.as_ref().map_or(position.size, |o| o.filled);
                    self.mark_open(position.clone()).await;
                } else {
                    match self.reconcile_entry(&mut position, long, short).await {
                        Ok(()) => self.mark_open(position.clone()).await,
                        Err(e) => {
                            self.mark_failed(position.clone(), &e, true).await;
                        }
                    }
                }
            }
            (Ok(long), Ok(short)) => {
                // One or both legs came back unfilled (rejected/expired at
                // the venue). Flatten whichever filled.
                self.unwind_single_leg(&mut position, &long, &short).await;
                let err = PositionError::OrderRejected {
                    venue: if long.status.is_fill() {
                        position.short_venue.to_string()
                    } else {
                        position.long_venue.to_string()
                    },
                    reason: "leg not filled".to_string(),
                };
                self.mark_failed(position.clone(), &err, false).await;
            }
            (Ok(long), Err(e)) => {
                self.flatten_leg(&mut position, &long, Side::Buy).await;
                let err = leg_error(position.short_venue, &e);
                self.mark_failed(position.clone(), &err, false).await;
            }
            (Err(e), Ok(short)) => {
                self.flatten_leg(&mut position, &short, Side::Sell).await;
                let err = leg_error(position.long_venue, &e);
                self.mark_failed(position.clone(), &err, false).await;
            }
            (Err(long_err), Err(short_err)) => {
                let err = PositionError::OrderRejected {
                    venue: format!("{}+{}", position.long_venue, position.short_venue),
                    reason: format!("{long_err}; {short_err}"),
                };
                self.mark_failed(position.clone(), &err, false).await;
            }
        }

        self.get(&id).unwrap_or(position)
    }

    /// Decides whether an open position should close, given the current
    /// spread (recomputed in the entry direction) and its unrealized PnL.
    #[must_use]
    pub fn should_close(
        &self,
        position: &ArbitragePosition,
        current_spread_pct: Decimal,
        now: DateTime<Utc>,
    ) -> Option<CloseReason> {
        if !position.is_open() {
            return None;
        }

        // Boundary inclusive: a spread exactly at the target closes.
        if current_spread_pct.abs() <= position.exit_target_pct {
            return Some(CloseReason::Convergence);
        }

        if let Some(opened_at) = position.opened_at {
            let age = now - opened_at;
            if age.num_seconds() >= self.config.max_position_age.as_secs() as i64 {
                return Some(CloseReason::Timeout);
            }
        }

        let stop_level = -(self.config.stop_loss_pct / Decimal::ONE_HUNDRED) * position.value();
        if position.unrealized_pnl <= stop_level && position.unrealized_pnl < Decimal::ZERO {
            return Some(CloseReason::StopLoss);
        }

        None
    }

    /// Recomputes unrealized PnL from current marks: the long leg against
    /// the bid it could exit at, the short leg against the ask.
    pub fn update_unrealized(&self, id: &str, long_exit_bid: Decimal, short_exit_ask: Decimal) {
        let mut active = self.active.write();
        if let Some(position) = active.get_mut(id) {
            let long_entry = position
                .long_order
                .as_ref()
                .and_then(Order::fill_price)
                .unwrap_or(Decimal::ZERO);
            let short_entry = position
                .short_order
                .as_ref()
                .and_then(Order::fill_price)
                .unwrap_or(Decimal::ZERO);
            position.unrealized_pnl = (long_exit_bid - long_entry) * position.size
                + (short_entry - short_exit_ask) * position.size;
        }
    }

    /// Closes an open position. Two concurrent triggers collapse to one
    /// close: the status check-and-set under the write lock serializes them.
    ///
    /// Returns false when the position was not open (already closing,
    /// closed, or failed).
    pub async fn close_position(&self, id: &str, reason: CloseReason) -> Result<bool, ArbError> {
        let mut position = {
            let mut active = self.active.write();
            match active.get_mut(id) {
                Some(p) if p.status == PositionStatus::Open => {
                    p.status = PositionStatus::Closing;
                    p.clone()
                }
                Some(_) | None => return Ok(false),
            }
        };

        info!(position_id = %id, reason = %reason, "Closing position");

        let close_long_req = OrderRequest::market(
            position.symbol.clone(),
            Side::Sell,
            position.size,
            format!("{id}_close_long"),
        );
        let close_short_req = OrderRequest::market(
            position.symbol.clone(),
            Side::Buy,
            position.size,
            format!("{id}_close_short"),
        );

        let (long_result, short_result) = tokio::join!(
            self.router.place(position.long_venue, close_long_req),
            self.router.place(position.short_venue, close_short_req),
        );

        match (long_result, short_result) {
            (Ok(close_long), Ok(close_short))
                if close_long.status.is_fill() && close_short.status.is_fill() =>
            {
                position.fees_paid += close_long.fee.unwrap_or(Decimal::ZERO)
                    + close_short.fee.unwrap_or(Decimal::ZERO);
                if close_long.filled == close_short.filled {
                    position.close_long_order = Some(close_long);
                    position.close_short_order = Some(close_short);
                    self.mark_closed(position).await;
                    Ok(true)
                } else {
                    match self
                        .reconcile_close(&mut position, close_long, close_short)
                        .await
                    {
                        Ok(()) => {
                            self.mark_closed(position).await;
                            Ok(true)
                        }
                        Err(e) => {
                            self.mark_failed(position, &e, true).await;
                            Ok(false)
                        }
                    }
                }
            }
            (long_result, short_result) => {
                let detail = match (&long_result, &short_result) {
                    (Err(e), _) | (_, Err(e)) => e.to_string(),
                    _ => "close leg not filled".to_string(),
                };
                let err = PositionError::ReconciliationFailed(format!(
                    "close legs incomplete: {detail}"
                ));
                self.mark_failed(position, &err, true).await;
                Ok(false)
            }
        }
    }

    /// Forced close of every open position (shutdown path).
    pub async fn close_all(&self) {
        let ids: Vec<String> = self
            .active
            .read()
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.id.clone())
            .collect();
        for id in ids {
            if let Err(e) = self.close_position(&id, CloseReason::Forced).await {
                error!(position_id = %id, error = %e, "Forced close failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn mark_open(&self, mut position: ArbitragePosition) {
        position.status = PositionStatus::Open;
        position.opened_at = Some(Utc::now());
        info!(
            position_id = %position.id,
            size = %position.size,
            fees = %position.fees_paid,
            "Position opened"
        );
        self.active
            .write()
            .insert(position.id.clone(), position.clone());
        let _ = self.events_tx.send(PositionEvent::Opened(position)).await;
    }

    async fn mark_closed(&self, mut position: ArbitragePosition) {
        position.realized_pnl = realized_pnl(&position);
        position.status = PositionStatus::Closed;
        position.closed_at = Some(Utc::now());
        position.unrealized_pnl = Decimal::ZERO;
        info!(
            position_id = %position.id,
            realized_pnl = %position.realized_pnl,
            fees = %position.fees_paid,
            "Position closed"
        );
        self.active.write().remove(&position.id);
        self.history.write().push(position.clone());
        let _ = self.events_tx.send(PositionEvent::Closed(position)).await;
    }

    async fn mark_failed(
        &self,
        mut position: ArbitragePosition,
        err: &PositionError,
        residual: bool,
    ) {
        position.status = PositionStatus::Failed;
        position.error_message = Some(err.to_string());
        // Keep a residual flag set by a failed flatten attempt.
        position.residual_exposure = position.residual_exposure || residual;
        if position.residual_exposure {
            error!(
                position_id = %position.id,
                error = %err,
                "POSITION FAILED WITH RESIDUAL EXPOSURE - operator attention required"
            );
        } else {
            warn!(position_id = %position.id, error = %err, "Position failed");
        }
        self.active.write().remove(&position.id);
        self.history.write().push(position.clone());
        let _ = self.events_tx.send(PositionEvent::Failed(position)).await;
    }

    /// Equalizes asymmetric entry fills: cancel the larger leg's residual,
    /// then top up the smaller leg with a correcting market order.
    async fn reconcile_entry(
        &self,
        position: &mut ArbitragePosition,
        long: Order,
        short: Order,
    ) -> Result<(), PositionError> {
        let (mut long, mut short) = (long, short);
        warn!(
            position_id = %position.id,
            long_filled = %long.filled,
            short_filled = %short.filled,
            "Asymmetric entry fills, reconciling"
        );

        // Cancel the residual of whichever leg filled more.
        if long.filled > short.filled {
            self.cancel_residual(position.long_venue, &long).await;
        } else {
            self.cancel_residual(position.short_venue, &short).await;
        }

        // Refresh both legs after the cancel.
        if let Ok(o) = self
            .router
            .refresh(position.long_venue, &long.id, &long.symbol)
            .await
        {
            long = o;
        }
        if let Ok(o) = self
            .router
            .refresh(position.short_venue, &short.id, &short.symbol)
            .await
        {
            short = o;
        }

        if long.filled != short.filled {
            // Top up the smaller leg to match.
            let (venue, side, deficit) = if long.filled < short.filled {
                (position.long_venue, Side::Buy, short.filled - long.filled)
            } else {
                (position.short_venue, Side::Sell, long.filled - short.filled)
            };
            let request = OrderRequest::market(
                position.symbol.clone(),
                side,
                deficit,
                format!("{}_reconcile", position.id),
            );
            match self.router.place(venue, request).await {
                Ok(correction) if correction.filled == deficit => {
                    position.fees_paid += correction.fee.unwrap_or(Decimal::ZERO);
                    if side == Side::Buy {
                        long.filled += correction.filled;
                    } else {
                        short.filled += correction.filled;
                    }
                }
                Ok(correction) => {
                    return Err(PositionError::ReconciliationFailed(format!(
                        "correcting order filled {} of {}",
                        correction.filled, deficit
                    )));
                }
                Err(e) => {
                    return Err(PositionError::ReconciliationFailed(format!(
                        "correcting order failed: {e}"
                    )));
                }
            }
        }

        if long.filled != short.filled {
            return Err(PositionError::ReconciliationFailed(format!(
                "legs still unequal: long {} vs short {}",
                long.filled, short.filled
            )));
        }

        position.size = long.filled;
        position.long_order = Some(long);
        position.short_order = Some(short);
        Ok(())
    }

    /// Same reconciliation rules applied to the closing pair.
    async fn reconcile_close(
        &self,
        position: &mut ArbitragePosition,
        close_long: Order,
        close_short: Order,
    ) -> Result<(), PositionError> {
        let (mut close_long, mut close_short) = (close_long, close_short);
        warn!(
            position_id = %position.id,
            close_long_filled = %close_long.filled,
            close_short_filled = %close_short.filled,
            "Asymmetric close fills, reconciling"
        );

        if close_long.filled > close_short.filled {
            self.cancel_residual(position.long_venue, &close_long).await;
        } else {
            self.cancel_residual(position.short_venue, &close_short)
                .await;
        }

        if let Ok(o) = self
            .router
            .refresh(position.long_venue, &close_long.id, &close_long.symbol)
            .await
        {
            close_long = o;
        }
        if let Ok(o) = self
            .router
            .refresh(position.short_venue, &close_short.id, &close_short.symbol)
            .await
        {
            close_short = o;
        }

        if close_long.filled != close_short.filled {
            let (venue, side, deficit) = if close_long.filled < close_short.filled {
                (
                    position.long_venue,
                    Side::Sell,
                    close_short.filled - close_long.filled,
                )
            } else {
                (
                    position.short_venue,
                    Side::Buy,
                    close_long.filled - close_short.filled,
                )
            };
            let request = OrderRequest::market(
                position.symbol.clone(),
                side,
                deficit,
                format!("{}_close_reconcile", position.id),
            );
            match self.router.place(venue, request).await {
                Ok(correction) if correction.filled == deficit => {
                    position.fees_paid += correction.fee.unwrap_or(Decimal::ZERO);
                    if side == Side::Sell {
                        close_long.filled += correction.filled;
                    } else {
                        close_short.filled += correction.filled;
                    }
                }
                _ => {
                    return Err(PositionError::ReconciliationFailed(
                        "close correcting order failed".to_string(),
                    ));
                }
            }
        }

        position.close_long_order = Some(close_long);
        position.close_short_order = Some(close_short);
        Ok(())
    }

    async fn cancel_residual(&self, venue: VenueId, order: &Order) {
        if order.remaining() > Decimal::ZERO {
            let acked = self.router.cancel(venue, &order.id, &order.symbol).await;
            if !acked {
                warn!(
                    venue = %venue,
                    order_id = %order.id,
                    "Residual cancel not acknowledged"
                );
            }
        }
    }

    /// One leg rejected outright: cancel or flatten whichever leg exists.
    async fn unwind_single_leg(
        &self,
        position: &mut ArbitragePosition,
        long: &Order,
        short: &Order,
    ) {
        if long.status.is_fill() && long.filled > Decimal::ZERO {
            self.flatten_leg(position, long, Side::Buy).await;
        } else if !long.status.is_terminal() {
            self.cancel_residual(position.long_venue, long).await;
        }
        if short.status.is_fill() && short.filled > Decimal::ZERO {
            self.flatten_leg(position, short, Side::Sell).await;
        } else if !short.status.is_terminal() {
            self.cancel_residual(position.short_venue, short).await;
        }
    }

    /// Immediately reverses a filled leg with an opposite market order.
    async fn flatten_leg(&self, position: &mut ArbitragePosition, leg: &Order, leg_side: Side) {
        if leg.filled <= Decimal::ZERO {
            let venue = if leg_side == Side::Buy {
                position.long_venue
            } else {
                position.short_venue
            };
            self.cancel_residual(venue, leg).await;
            return;
        }
        let venue = if leg_side == Side::Buy {
            position.long_venue
        } else {
            position.short_venue
        };
        warn!(
            position_id = %position.id,
            venue = %venue,
            filled = %leg.filled,
            "Flattening orphaned leg"
        );
        let request = OrderRequest::market(
            leg.symbol.clone(),
            leg_side.opposite(),
            leg.filled,
            format!("{}_flatten", position.id),
        );
        match self.router.place(venue, request).await {
            Ok(order) => {
                position.fees_paid += order.fee.unwrap_or(Decimal::ZERO);
            }
            Err(e) => {
                error!(
                    position_id = %position.id,
                    venue = %venue,
                    error = %e,
                    "Failed to flatten orphaned leg"
                );
                position.residual_exposure = true;
            }
        }
    }
}

fn leg_error(venue: VenueId, err: &ArbError) -> PositionError {
    match err {
        ArbError::Timeout(detail) => PositionError::Timeout(detail.clone()),
        ArbError::VenueDisconnected(detail) => PositionError::VenueDisconnected(detail.clone()),
        other => PositionError::OrderRejected {
            venue: venue.to_string(),
            reason: other.to_string(),
        },
    }
}

/// `(closeLong − openLong)·size + (openShort − closeShort)·size − fees`.
fn realized_pnl(position: &ArbitragePosition) -> Decimal {
    let open_long = position
        .long_order
        .as_ref()
        .and_then(Order::fill_price)
        .unwrap_or(Decimal::ZERO);
    let open_short = position
        .short_order
        .as_ref()
        .and_then(Order::fill_price)
        .unwrap_or(Decimal::ZERO);
    let close_long = position
        .close_long_order
        .as_ref()
        .and_then(Order::fill_price)
        .unwrap_or(Decimal::ZERO);
    let close_short = position
        .close_short_order
        .as_ref()
        .and_then(Order::fill_price)
        .unwrap_or(Decimal::ZERO);

    (close_long - open_long) * position.size + (open_short - close_short) * position.size
        - position.fees_paid
}
