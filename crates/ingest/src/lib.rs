//! Multi-venue quote ingestion.
//!
//! [`IngestionHub`] owns the venue adapters, supervises reconnection, and
//! fans normalized quotes out over bounded per-subscriber queues.
//! [`PriceCache`] keeps the latest quote per `(symbol, venue)` with
//! monotonic timestamps.

pub mod cache;
pub mod hub;

pub use cache::PriceCache;
pub use hub::{ConnectionEvent, HubConfig, IngestionHub, DEFAULT_QUEUE_SIZE};
