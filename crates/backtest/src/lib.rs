//! Replay-driven backtesting.
//!
//! Feeds recorded quote logs through the same cache/detector pipeline as
//! live mode and paper-trades accepted opportunities with a flat
//! fee-and-slippage fill model.

pub mod engine;
pub mod execution;
pub mod metrics;

pub use engine::{BacktestConfig, BacktestEngine};
pub use execution::PaperFillModel;
pub use metrics::{BacktestReport, ExitKind, SymbolSummary, TradeRecord};
