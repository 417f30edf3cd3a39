//! Cross-venue arbitrage core: detection, risk gating, order routing, and
//! the paired position lifecycle.
//!
//! # Pipeline
//!
//! ```text
//! IngestionHub ──quotes──▶ PriceCache ──▶ Detector ──▶ RiskGate ──▶ PositionManager ──▶ OrderRouter
//! ```
//!
//! Each stage is a single consumer on a bounded channel; [`engine::Engine`]
//! wires them together and serializes risk decisions in emission order.

pub mod detector;
pub mod engine;
pub mod fees;
pub mod position;
pub mod risk;
pub mod router;
pub mod slippage;

#[cfg(test)]
pub(crate) mod testing;

pub use detector::{Detector, DetectorConfig, Opportunity};
pub use engine::{Engine, ShutdownHandle, TradeMode};
pub use fees::{FeeCalculator, PairFees};
pub use position::{
    ArbitragePosition, CloseReason, PositionError, PositionEvent, PositionManager,
    PositionManagerConfig, PositionStats, PositionStatus,
};
pub use risk::{RiskGate, RiskRejection, RiskStatus, VenueBalances};
pub use router::{OrderLifecycleEvent, OrderRouter, RouterConfig};
pub use slippage::{estimate, SlippageEstimate, INFEASIBLE_SLIPPAGE_PCT};
