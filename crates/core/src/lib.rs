//! Core types, venue contract, and configuration for the cross-venue
//! arbitrage engine.
//!
//! Downstream crates build on three things defined here:
//!
//! - the normalized data model ([`types`]): [`Quote`], [`OrderBook`],
//!   [`Order`], balances, and the venue/side/status enums;
//! - the uniform venue capability set ([`traits::VenueAdapter`]);
//! - the immutable [`config::AppConfig`] loaded once at startup.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{AppConfig, ArbitrageConfig, FeesConfig, RiskConfig, ThresholdProfile};
pub use config_loader::ConfigLoader;
pub use error::ArbError;
pub use traits::VenueAdapter;
pub use types::{
    Balance, Order, OrderBook, OrderRequest, OrderStatus, OrderType, Quote, Side, TradingFees,
    VenueId, VenuePosition,
};
