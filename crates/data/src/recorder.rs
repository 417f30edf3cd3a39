//! Quote log recorder.
//!
//! Writes normalized quotes to per-day, per-venue CSV files under
//! `<root>/<YYYYMMDD>/<venue>_prices_<YYYYMMDD>.csv[.gz]`, rotating at UTC
//! midnight. Delta mode records a row only when bid or ask moved by more
//! than a relative threshold since the last recorded row for that
//! `(venue, symbol)`.

use anyhow::{Context, Result};
use chrono::{NaiveDate, SecondsFormat};
use cross_arb_core::types::{Quote, VenueId};
use flate2::write::GzEncoder;
use flate2::Compression;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// CSV header, fixed order.
pub const CSV_HEADER: [&str; 10] = [
    "timestamp",
    "exchange",
    "symbol",
    "bid",
    "ask",
    "bid_size",
    "ask_size",
    "last",
    "mark_price",
    "volume_24h",
];

/// What triggers a row in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Every quote becomes a row.
    Full,
    /// Only quotes whose bid or ask moved more than the threshold.
    Delta,
}

/// Recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Log root, typically `data/price_logs`.
    pub root: PathBuf,
    /// Gzip output files (default gzip level).
    pub compress: bool,
    /// Full or delta recording.
    pub mode: RecordMode,
    /// Relative bid/ask change required in delta mode.
    pub price_change_threshold: Decimal,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/price_logs"),
            compress: false,
            mode: RecordMode::Full,
            price_change_threshold: Decimal::new(1, 5), // 1e-5
        }
    }
}

/// Per-venue recording statistics.
#[derive(Debug, Clone, Default)]
pub struct RecorderStats {
    /// Rows written per venue.
    pub rows_written: HashMap<VenueId, u64>,
    /// Quotes skipped by the delta filter.
    pub rows_skipped: u64,
}

struct VenueWriter {
    writer: csv::Writer<Box<dyn Write + Send>>,
}

/// Appends normalized quotes to rotated CSV logs.
pub struct QuoteRecorder {
    config: RecorderConfig,
    writers: HashMap<VenueId, VenueWriter>,
    current_date: Option<NaiveDate>,
    last_recorded: HashMap<(VenueId, String), Quote>,
    stats: RecorderStats,
}

impl QuoteRecorder {
    /// Creates a recorder; files are opened lazily on the first quote.
    #[must_use]
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            writers: HashMap::new(),
            current_date: None,
            last_recorded: HashMap::new(),
            stats: RecorderStats::default(),
        }
    }

    /// Recording statistics so far.
    #[must_use]
    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    /// Records one quote. Returns whether a row was written (delta mode
    /// skips unchanged quotes).
    ///
    /// Rotation is driven by the quote's own UTC date, which keeps
    /// record/replay deterministic.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory or file cannot be written.
    pub fn record(&mut self, quote: &Quote) -> Result<bool> {
        let date = quote.timestamp.date_naive();
        self.rotate_if_needed(date)?;

        if self.config.mode == RecordMode::Delta && !self.changed_enough(quote) {
            self.stats.rows_skipped += 1;
            return Ok(false);
        }

        let date_str = date.format("%Y%m%d").to_string();
        if !self.writers.contains_key(&quote.venue) {
            let writer = self.open_writer(quote.venue, &date_str)?;
            self.writers.insert(quote.venue, writer);
        }
        let venue_writer = self
            .writers
            .get_mut(&quote.venue)
            .expect("writer inserted above");

        venue_writer
            .writer
            .write_record(&[
                quote
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Micros, false),
                quote.venue.as_str().to_string(),
                quote.symbol.clone(),
                quote.bid.to_string(),
                quote.ask.to_string(),
                optional(quote.bid_size),
                optional(quote.ask_size),
                optional(quote.last),
                optional(quote.mark_price),
                optional(quote.volume_24h),
            ])
            .context("failed to write quote row")?;

        *self.stats.rows_written.entry(quote.venue).or_default() += 1;
        self.last_recorded
            .insert((quote.venue, quote.symbol.clone()), quote.clone());
        Ok(true)
    }

    /// Flushes all open files.
    ///
    /// # Errors
    ///
    /// Returns an error when an underlying flush fails.
    pub fn flush(&mut self) -> Result<()> {
        for venue_writer in self.writers.values_mut() {
            venue_writer.writer.flush()?;
        }
        Ok(())
    }

    /// Flushes and closes all files.
    ///
    /// # Errors
    ///
    /// Returns an error when an underlying flush fails.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn rotate_if_needed(&mut self, date: NaiveDate) -> Result<()> {
        match self.current_date {
            Some(current) if current == date => Ok(()),
            Some(current) => {
                info!(from = %current, to = %date, "Rotating quote logs at UTC midnight");
                self.flush()?;
                self.writers.clear();
                // Rotation also clears the delta baselines.
                self.last_recorded.clear();
                self.current_date = Some(date);
                Ok(())
            }
            None => {
                self.current_date = Some(date);
                Ok(())
            }
        }
    }

    fn changed_enough(&self, quote: &Quote) -> bool {
        let Some(previous) = self
            .last_recorded
            .get(&(quote.venue, quote.symbol.clone()))
        else {
            return true;
        };
        relative_change(previous.bid, quote.bid) > self.config.price_change_threshold
            || relative_change(previous.ask, quote.ask) > self.config.price_change_threshold
    }

    fn open_writer(&self, venue: VenueId, date_str: &str) -> Result<VenueWriter> {
        let dir = self.config.root.join(date_str);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;

        let path = log_file_path(&self.config.root, venue, date_str, self.config.compress);
        let fresh = !path.exists() || path.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;

        debug!(path = %path.display(), "Opened quote log");
        let sink: Box<dyn Write + Send> = if self.config.compress {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        let mut writer = csv::Writer::from_writer(sink);
        if fresh {
            writer.write_record(CSV_HEADER)?;
        }
        Ok(VenueWriter { writer })
    }
}

/// `<root>/<YYYYMMDD>/<venue>_prices_<YYYYMMDD>.csv[.gz]`.
#[must_use]
pub fn log_file_path(root: &Path, venue: VenueId, date_str: &str, compress: bool) -> PathBuf {
    let suffix = if compress { ".csv.gz" } else { ".csv" };
    root.join(date_str)
        .join(format!("{}_prices_{date_str}{suffix}", venue.as_lower()))
}

fn optional(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn relative_change(previous: Decimal, current: Decimal) -> Decimal {
    if previous.is_zero() {
        return Decimal::MAX;
    }
    ((current - previous) / previous).abs()
}

/// Consumes a hub subscription and records everything until the stream
/// ends, flushing on the given interval.
pub async fn record_stream(
    mut quotes: tokio::sync::mpsc::Receiver<Quote>,
    mut recorder: QuoteRecorder,
    flush_interval: std::time::Duration,
) -> Result<RecorderStats> {
    let mut ticker = tokio::time::interval(flush_interval.max(std::time::Duration::from_secs(1)));
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            maybe_quote = quotes.recv() => match maybe_quote {
                Some(quote) => {
                    recorder.record(&quote)?;
                }
                None => break,
            },
            _ = ticker.tick() => recorder.flush()?,
        }
    }
    recorder.flush()?;
    let stats = recorder.stats().clone();
    recorder.close()?;
    Ok(stats)
}
