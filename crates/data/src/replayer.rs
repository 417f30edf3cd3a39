//! Deterministic replay of recorded quote logs.
//!
//! Reads the per-day, per-venue CSV files the recorder produced, merges
//! them in timestamp order (stable, so per-venue FIFO survives ties), and
//! emits quotes on the same bounded-channel interface a live adapter
//! provides. The time driver selects wall-clock pacing or
//! as-fast-as-possible.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use cross_arb_core::types::{Quote, VenueId};
use flate2::read::MultiGzDecoder;
use rust_decimal::Decimal;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pacing for replayed quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDriver {
    /// Emit as fast as the consumer drains.
    AsFastAsPossible,
    /// Sleep the recorded inter-quote gaps (capped so day boundaries do
    /// not stall the replay).
    WallClock,
}

/// Maximum gap honored by the wall-clock driver.
const MAX_WALL_CLOCK_GAP: Duration = Duration::from_secs(5);

/// Replays recorded quote logs for a date range.
pub struct QuoteReplayer {
    root: PathBuf,
    start: NaiveDate,
    end: NaiveDate,
    symbols: Option<Vec<String>>,
}

impl QuoteReplayer {
    /// Creates a replayer over `[start, end]` inclusive.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            root: root.into(),
            start,
            end,
            symbols: None,
        }
    }

    /// Restricts replay to a symbol set.
    #[must_use]
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// Loads every matching row into a timestamp-ordered vector.
    ///
    /// # Errors
    ///
    /// Returns an error when a log file exists but cannot be read or
    /// parsed. Missing days are skipped silently.
    pub fn load(&self) -> Result<Vec<Quote>> {
        let mut quotes = Vec::new();
        let mut date = self.start;
        while date <= self.end {
            let date_str = date.format("%Y%m%d").to_string();
            let dir = self.root.join(&date_str);
            if dir.is_dir() {
                for entry in std::fs::read_dir(&dir)
                    .with_context(|| format!("failed to list {}", dir.display()))?
                {
                    let path = entry?.path();
                    if is_quote_log(&path) {
                        self.read_file(&path, &mut quotes)?;
                    }
                }
            }
            date = date
                .succ_opt()
                .context("date range overflowed the calendar")?;
        }

        // Stable by-timestamp sort: rows within one venue file are already
        // chronological, so per-venue FIFO survives equal timestamps.
        quotes.sort_by_key(|q| q.timestamp);
        info!(
            rows = quotes.len(),
            start = %self.start,
            end = %self.end,
            "Loaded quote logs"
        );
        Ok(quotes)
    }

    /// Streams the loaded quotes on a bounded channel with the chosen
    /// pacing. The receiver side matches the live hub interface.
    ///
    /// # Errors
    ///
    /// Returns an error when loading fails; streaming itself cannot fail.
    pub fn stream(&self, driver: TimeDriver) -> Result<mpsc::Receiver<Quote>> {
        let quotes = self.load()?;
        let (tx, rx) = mpsc::channel(8192);

        tokio::spawn(async move {
            let mut previous_ts: Option<DateTime<Utc>> = None;
            for quote in quotes {
                if driver == TimeDriver::WallClock {
                    if let Some(previous) = previous_ts {
                        let gap = (quote.timestamp - previous)
                            .to_std()
                            .unwrap_or(Duration::ZERO)
                            .min(MAX_WALL_CLOCK_GAP);
                        if !gap.is_zero() {
                            tokio::time::sleep(gap).await;
                        }
                    }
                    previous_ts = Some(quote.timestamp);
                }
                if tx.send(quote).await.is_err() {
                    debug!("Replay consumer dropped, stopping");
                    return;
                }
            }
        });

        Ok(rx)
    }

    fn read_file(&self, path: &Path, quotes: &mut Vec<Quote>) -> Result<()> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let mut csv_reader = csv::Reader::from_reader(reader);

        for record in csv_reader.records() {
            let record = record.with_context(|| format!("bad row in {}", path.display()))?;
            match parse_row(&record) {
                Ok(quote) => {
                    if self
                        .symbols
                        .as_ref()
                        .map_or(true, |symbols| symbols.contains(&quote.symbol))
                    {
                        quotes.push(quote);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unparseable row");
                }
            }
        }
        Ok(())
    }
}

fn is_quote_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.contains("_prices_") && (name.ends_with(".csv") || name.ends_with(".csv.gz"))
}

fn parse_row(record: &csv::StringRecord) -> Result<Quote> {
    let timestamp: DateTime<Utc> = record
        .get(0)
        .context("missing timestamp")?
        .parse::<DateTime<chrono::FixedOffset>>()
        .context("bad timestamp")?
        .with_timezone(&Utc);
    let venue: VenueId = record
        .get(1)
        .context("missing exchange")?
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let symbol = record.get(2).context("missing symbol")?.to_string();
    let bid = Decimal::from_str(record.get(3).context("missing bid")?)?;
    let ask = Decimal::from_str(record.get(4).context("missing ask")?)?;

    Ok(Quote {
        venue,
        symbol,
        bid,
        ask,
        bid_size: parse_optional(record.get(5)),
        ask_size: parse_optional(record.get(6)),
        last: parse_optional(record.get(7)),
        mark_price: parse_optional(record.get(8)),
        volume_24h: parse_optional(record.get(9)),
        timestamp,
    })
}

fn parse_optional(field: Option<&str>) -> Option<Decimal> {
    field
        .filter(|s| !s.is_empty())
        .and_then(|s| Decimal::from_str(s).ok())
}
