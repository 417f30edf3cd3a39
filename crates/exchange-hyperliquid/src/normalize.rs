//! Venue-frame normalization.
//!
//! Turns raw venue events into [`Quote`]s that always satisfy the core
//! invariant (`bid > 0 && ask > 0 && bid <= ask`). Violating frames are
//! dropped and counted, never emitted. Per `(symbol, stream-kind)` a
//! minimum inter-event gap throttles bursts; gaps are independent per
//! stream kind. Ticker-only updates synthesize a tight spread around the
//! last price, but only while no book-derived quote is fresh — book data
//! is authoritative inside the freshness window.

use chrono::{DateTime, Duration, Utc};
use cross_arb_core::types::{Quote, VenueId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// How long a book-derived quote suppresses ticker synthesis.
pub const BOOK_FRESHNESS_WINDOW_MS: i64 = 500;

/// Half-spread applied around `last` when synthesizing (±0.05 %).
pub const SYNTHETIC_HALF_SPREAD: Decimal = Decimal::from_parts(5, 0, 0, false, 4); // 0.0005

/// Stream kinds with independent throttle gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Ticker/mid updates: 500 ms minimum gap.
    Ticker,
    /// Order-book updates: 200 ms minimum gap.
    Book,
    /// Trade prints: 100 ms minimum gap.
    Trade,
}

impl StreamKind {
    /// Minimum gap between emitted events of this kind.
    #[must_use]
    pub fn min_gap(self) -> Duration {
        match self {
            Self::Ticker => Duration::milliseconds(500),
            Self::Book => Duration::milliseconds(200),
            Self::Trade => Duration::milliseconds(100),
        }
    }
}

/// Drop counters, shared with the adapter for observability.
#[derive(Debug, Default)]
pub struct NormalizerCounters {
    /// Frames violating the quote invariant (includes crossed books).
    pub invalid: AtomicU64,
    /// Events inside the per-stream minimum gap.
    pub throttled: AtomicU64,
    /// Events for symbols missing from the venue symbol table.
    pub unknown_symbol: AtomicU64,
}

impl NormalizerCounters {
    /// Invalid-frame count.
    #[must_use]
    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    /// Throttled-event count.
    #[must_use]
    pub fn throttled(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }

    /// Unknown-symbol count.
    #[must_use]
    pub fn unknown_symbol(&self) -> u64 {
        self.unknown_symbol.load(Ordering::Relaxed)
    }
}

/// Per-venue normalization state. Owned by the connection task.
pub struct Normalizer {
    venue: VenueId,
    /// Venue symbol → canonical short form.
    symbol_map: HashMap<String, String>,
    last_emit: HashMap<(String, StreamKind), DateTime<Utc>>,
    last_book_quote: HashMap<String, DateTime<Utc>>,
    last_trade_price: HashMap<String, Decimal>,
    volume_24h: HashMap<String, Decimal>,
    counters: Arc<NormalizerCounters>,
}

impl Normalizer {
    /// Creates a normalizer with the venue's symbol table.
    #[must_use]
    pub fn new(venue: VenueId, symbol_map: HashMap<String, String>) -> Self {
        Self {
            venue,
            symbol_map,
            last_emit: HashMap::new(),
            last_book_quote: HashMap::new(),
            last_trade_price: HashMap::new(),
            volume_24h: HashMap::new(),
            counters: Arc::new(NormalizerCounters::default()),
        }
    }

    /// Identity table for venues already quoting canonical symbols.
    #[must_use]
    pub fn identity_map(symbols: &[String]) -> HashMap<String, String> {
        symbols.iter().map(|s| (s.clone(), s.clone())).collect()
    }

    /// Shared drop counters.
    #[must_use]
    pub fn counters(&self) -> Arc<NormalizerCounters> {
        Arc::clone(&self.counters)
    }

    /// Maps a venue symbol to its canonical form; unknown symbols are
    /// counted and discarded.
    pub fn map_symbol(&self, raw: &str) -> Option<String> {
        match self.symbol_map.get(raw) {
            Some(canonical) => Some(canonical.clone()),
            None => {
                self.counters.unknown_symbol.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Records a 24 h volume observation for later quotes.
    pub fn note_volume(&mut self, symbol: &str, volume: Decimal) {
        self.volume_24h.insert(symbol.to_string(), volume);
    }

    /// Normalizes a best-level book update.
    pub fn on_book(
        &mut self,
        raw_symbol: &str,
        bid: Decimal,
        ask: Decimal,
        bid_size: Option<Decimal>,
        ask_size: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Option<Quote> {
        let symbol = self.map_symbol(raw_symbol)?;
        if !self.pass_throttle(&symbol, StreamKind::Book, timestamp) {
            return None;
        }

        let quote = Quote {
            venue: self.venue,
            symbol: symbol.clone(),
            bid,
            ask,
            bid_size,
            ask_size,
            last: self.last_trade_price.get(&symbol).copied(),
            mark_price: None,
            volume_24h: self.volume_24h.get(&symbol).copied(),
            timestamp,
        };
        if !quote.is_valid() {
            self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            trace!(venue = %self.venue, symbol = %symbol, bid = %bid, ask = %ask, "Dropped invalid book frame");
            return None;
        }

        self.last_book_quote.insert(symbol, timestamp);
        Some(quote)
    }

    /// Normalizes a ticker update. Synthesizes a ±0.05 % spread around
    /// `last` only when no book-derived quote is fresher than 500 ms.
    pub fn on_ticker(
        &mut self,
        raw_symbol: &str,
        last: Decimal,
        mark_price: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Option<Quote> {
        let symbol = self.map_symbol(raw_symbol)?;

        if let Some(book_ts) = self.last_book_quote.get(&symbol) {
            if timestamp - *book_ts < Duration::milliseconds(BOOK_FRESHNESS_WINDOW_MS) {
                // Book data is authoritative inside the window.
                return None;
            }
        }
        if !self.pass_throttle(&symbol, StreamKind::Ticker, timestamp) {
            return None;
        }

        let quote = Quote {
            venue: self.venue,
            symbol: symbol.clone(),
            bid: last * (Decimal::ONE - SYNTHETIC_HALF_SPREAD),
            ask: last * (Decimal::ONE + SYNTHETIC_HALF_SPREAD),
            bid_size: None,
            ask_size: None,
            last: Some(last),
            mark_price,
            volume_24h: self.volume_24h.get(&symbol).copied(),
            timestamp,
        };
        if !quote.is_valid() {
            self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(quote)
    }

    /// Throttles and records a trade print; the accepted price becomes the
    /// symbol's `last`.
    pub fn on_trade(&mut self, raw_symbol: &str, price: Decimal, timestamp: DateTime<Utc>) -> bool {
        let Some(symbol) = self.map_symbol(raw_symbol) else {
            return false;
        };
        if !self.pass_throttle(&symbol, StreamKind::Trade, timestamp) {
            return false;
        }
        self.last_trade_price.insert(symbol, price);
        true
    }

    fn pass_throttle(&mut self, symbol: &str, kind: StreamKind, timestamp: DateTime<Utc>) -> bool {
        let key = (symbol.to_string(), kind);
        if let Some(previous) = self.last_emit.get(&key) {
            if timestamp - *previous < kind.min_gap() {
                self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        self.last_emit.insert(key, timestamp);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            VenueId::Hyperliquid,
            Normalizer::identity_map(&["BTC".to_string(), "ETH".to_string()]),
        )
    }

    #[test]
    fn test_book_quote_passes() {
        let mut n = normalizer();
        let ts = Utc::now();
        let quote = n
            .on_book("BTC", dec!(100), dec!(101), Some(dec!(2)), Some(dec!(3)), ts)
            .unwrap();
        assert_eq!(quote.venue, VenueId::Hyperliquid);
        assert_eq!(quote.bid, dec!(100));
        assert_eq!(quote.ask, dec!(101));
    }

    #[test]
    fn test_crossed_book_dropped_and_counted() {
        let mut n = normalizer();
        let counters = n.counters();
        let ts = Utc::now();
        // bid > ask never escapes the adapter.
        assert!(n.on_book("BTC", dec!(100), dec!(99), None, None, ts).is_none());
        assert_eq!(counters.invalid(), 1);

        // Non-positive prices are dropped the same way.
        assert!(n
            .on_book("BTC", dec!(0), dec!(99), None, None, ts + Duration::seconds(1))
            .is_none());
        assert_eq!(counters.invalid(), 2);
    }

    #[test]
    fn test_unknown_symbol_discarded() {
        let mut n = normalizer();
        let counters = n.counters();
        assert!(n
            .on_book("DOGE", dec!(1), dec!(2), None, None, Utc::now())
            .is_none());
        assert_eq!(counters.unknown_symbol(), 1);
    }

    #[test]
    fn test_book_throttle_200ms() {
        let mut n = normalizer();
        let counters = n.counters();
        let t0 = Utc::now();
        assert!(n.on_book("BTC", dec!(100), dec!(101), None, None, t0).is_some());
        // 100 ms later: inside the 200 ms book gap.
        assert!(n
            .on_book(
                "BTC",
                dec!(100),
                dec!(101),
                None,
                None,
                t0 + Duration::milliseconds(100)
            )
            .is_none());
        assert_eq!(counters.throttled(), 1);
        // 250 ms later: past the gap.
        assert!(n
            .on_book(
                "BTC",
                dec!(100),
                dec!(101),
                None,
                None,
                t0 + Duration::milliseconds(250)
            )
            .is_some());
    }

    #[test]
    fn test_throttle_gaps_are_independent_per_stream_kind() {
        let mut n = normalizer();
        let t0 = Utc::now();
        assert!(n.on_book("BTC", dec!(100), dec!(101), None, None, t0).is_some());
        // A trade 50 ms later passes its own (empty) gap even though the
        // book gap is still closed.
        assert!(n.on_trade("BTC", dec!(100.5), t0 + Duration::milliseconds(50)));
        // Second trade 50 ms after that is inside the 100 ms trade gap.
        assert!(!n.on_trade("BTC", dec!(100.6), t0 + Duration::milliseconds(100)));
    }

    #[test]
    fn test_ticker_synthesizes_only_without_fresh_book() {
        let mut n = normalizer();
        let t0 = Utc::now();
        assert!(n.on_book("BTC", dec!(100), dec!(101), None, None, t0).is_some());

        // 300 ms later the book quote is still fresh: no synthesis.
        assert!(n
            .on_ticker("BTC", dec!(100.5), None, t0 + Duration::milliseconds(300))
            .is_none());

        // 600 ms later the window has expired: synthesize ±0.05 %.
        let quote = n
            .on_ticker("BTC", dec!(100), None, t0 + Duration::milliseconds(600))
            .unwrap();
        assert_eq!(quote.bid, dec!(99.95));
        assert_eq!(quote.ask, dec!(100.05));
        assert_eq!(quote.last, Some(dec!(100)));
    }

    #[test]
    fn test_ticker_throttle_500ms() {
        let mut n = normalizer();
        let t0 = Utc::now();
        assert!(n.on_ticker("BTC", dec!(100), None, t0).is_some());
        assert!(n
            .on_ticker("BTC", dec!(100.2), None, t0 + Duration::milliseconds(300))
            .is_none());
        assert!(n
            .on_ticker("BTC", dec!(100.2), None, t0 + Duration::milliseconds(600))
            .is_some());
    }

    #[test]
    fn test_trade_price_feeds_book_quote_last() {
        let mut n = normalizer();
        let t0 = Utc::now();
        assert!(n.on_trade("BTC", dec!(100.7), t0));
        let quote = n
            .on_book(
                "BTC",
                dec!(100),
                dec!(101),
                None,
                None,
                t0 + Duration::milliseconds(250),
            )
            .unwrap();
        assert_eq!(quote.last, Some(dec!(100.7)));
    }

    #[test]
    fn test_volume_carried_onto_quotes() {
        let mut n = normalizer();
        n.note_volume("BTC", dec!(123456));
        let quote = n
            .on_book("BTC", dec!(100), dec!(101), None, None, Utc::now())
            .unwrap();
        assert_eq!(quote.volume_24h, Some(dec!(123456)));
    }
}
