//! Last-writer-wins price cache.
//!
//! Two-level map `symbol → venue → Quote` with monotonic per-slot
//! timestamps. The hub is the single logical writer; readers receive cloned
//! snapshots and can never observe a torn quote.

use chrono::{DateTime, Utc};
use cross_arb_core::types::{Quote, VenueId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared price cache handle. Cloning is cheap.
#[derive(Clone, Default)]
pub struct PriceCache {
    inner: Arc<RwLock<HashMap<String, HashMap<VenueId, Quote>>>>,
}

impl PriceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a quote unless an equal-or-newer one is already present for
    /// the same `(symbol, venue)` slot. Returns whether the write took.
    pub fn update(&self, quote: &Quote) -> bool {
        let mut map = self.inner.write();
        let venues = map.entry(quote.symbol.clone()).or_default();
        match venues.get(&quote.venue) {
            Some(existing) if existing.timestamp > quote.timestamp => false,
            _ => {
                venues.insert(quote.venue, quote.clone());
                true
            }
        }
    }

    /// Snapshot of all venue quotes for a symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> HashMap<VenueId, Quote> {
        self.inner.read().get(symbol).cloned().unwrap_or_default()
    }

    /// Quote for one `(symbol, venue)` slot.
    #[must_use]
    pub fn get(&self, symbol: &str, venue: VenueId) -> Option<Quote> {
        self.inner
            .read()
            .get(symbol)
            .and_then(|venues| venues.get(&venue))
            .cloned()
    }

    /// Symbols currently tracked.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Number of venues quoting a symbol.
    #[must_use]
    pub fn venue_count(&self, symbol: &str) -> usize {
        self.inner.read().get(symbol).map_or(0, HashMap::len)
    }

    /// Timestamp of the freshest quote for a symbol across venues.
    #[must_use]
    pub fn latest_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .get(symbol)
            .and_then(|venues| venues.values().map(|q| q.timestamp).max())
    }

    /// Clears all entries. Called on UTC day rollover.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}
