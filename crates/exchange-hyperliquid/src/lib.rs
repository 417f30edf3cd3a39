//! Hyperliquid venue adapter.
//!
//! WebSocket market data (`l2Book`, `trades`, `allMids`) normalized into
//! core [`cross_arb_core::types::Quote`]s, REST snapshots for cold start
//! and slippage estimation, and the trading surface behind credentials.
//! The [`normalize`] module is venue-agnostic; further adapters reuse it.

pub mod adapter;
pub mod client;
pub mod normalize;
pub mod websocket;

pub use adapter::HyperliquidAdapter;
pub use client::{HyperliquidClient, API_URL};
pub use normalize::{Normalizer, NormalizerCounters, StreamKind};
pub use websocket::{parse_frame, WsEvent, WS_URL};
