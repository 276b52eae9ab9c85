//! CSV observation files.
//!
//! Expected format (header optional):
//! ```csv
//! ticker,time,price
//! MSFT,1690968600000,326.00
//! ```
//! `time` is milliseconds since the Unix epoch.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use super::traits::PriceSource;
use super::types::{FetchOutcome, Observation};

const HEADER: &str = "ticker,time,price";

/// Rows parsed from a CSV file, plus the count of rejected rows.
#[derive(Debug, Default)]
pub struct ParsedCsv {
    pub observations: Vec<Observation>,
    pub dropped: usize,
}

/// Parse observation rows. Bad rows are logged and counted, never fatal.
pub fn parse_observations(content: &str) -> ParsedCsv {
    let mut parsed = ParsedCsv::default();

    for (line_num, line) in content.lines().enumerate() {
        // Skip header
        if line_num == 0 && line.starts_with("ticker") {
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }

        match parse_row(line) {
            Ok(obs) => parsed.observations.push(obs),
            Err(e) => {
                warn!(line = line_num + 1, "Dropping malformed row: {:#}", e);
                parsed.dropped += 1;
            }
        }
    }

    parsed
}

fn parse_row(line: &str) -> Result<Observation> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 3 {
        anyhow::bail!(
            "Expected 3 columns (ticker,time,price), got {}",
            parts.len()
        );
    }

    let instrument = parts[0].trim();
    anyhow::ensure!(!instrument.is_empty(), "Empty ticker");

    let timestamp: i64 = parts[1]
        .trim()
        .parse()
        .with_context(|| format!("Invalid timestamp: {}", parts[1]))?;
    let price: f64 = parts[2]
        .trim()
        .parse()
        .with_context(|| format!("Invalid price: {}", parts[2]))?;
    anyhow::ensure!(price.is_finite(), "Non-finite price: {}", parts[2]);

    Ok(Observation::new(instrument, timestamp, price))
}

/// Write observations in `ticker,time,price` format.
pub fn write_observations<P: AsRef<Path>>(path: P, observations: &[Observation]) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);

    writeln!(writer, "{}", HEADER)?;
    for obs in observations {
        writeln!(writer, "{},{},{}", obs.instrument, obs.timestamp, obs.price)?;
    }
    writer.flush()?;

    Ok(())
}

/// Price source backed by a CSV file loaded up front.
///
/// Rows rejected at load time are reported once, in the `dropped` count of
/// the first fetch.
pub struct CsvPriceSource {
    /// Observations grouped by (instrument, day), ascending by timestamp
    by_key: HashMap<(String, NaiveDate), Vec<Observation>>,
    dropped: usize,
    unreported: AtomicUsize,
}

impl CsvPriceSource {
    /// Load observations from a CSV file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        let source = Self::from_csv_content(&content);
        info!(
            path = %path.display(),
            series = source.by_key.len(),
            dropped = source.dropped,
            "Loaded CSV price source"
        );
        Ok(source)
    }

    /// Build a source from CSV content.
    pub fn from_csv_content(content: &str) -> Self {
        let parsed = parse_observations(content);
        let mut dropped = parsed.dropped;
        let mut by_key: HashMap<(String, NaiveDate), Vec<Observation>> = HashMap::new();

        for obs in parsed.observations {
            let Some(day) = obs.trading_day() else {
                dropped += 1;
                continue;
            };
            by_key
                .entry((obs.instrument.clone(), day))
                .or_default()
                .push(obs);
        }

        for series in by_key.values_mut() {
            series.sort_by_key(|o| o.timestamp);
        }

        Self {
            by_key,
            dropped,
            unreported: AtomicUsize::new(dropped),
        }
    }

    /// Rows rejected while loading.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[async_trait]
impl PriceSource for CsvPriceSource {
    async fn fetch(&self, instrument: &str, day: NaiveDate) -> Result<FetchOutcome> {
        let observations = self
            .by_key
            .get(&(instrument.to_string(), day))
            .cloned()
            .unwrap_or_default();
        let dropped = self.unreported.swap(0, Ordering::Relaxed);
        Ok(FetchOutcome::new(observations, dropped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::day_start_ms;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 8, 2).unwrap()
    }

    #[test]
    fn test_parse_counts_bad_rows() {
        let start = day_start_ms(day());
        let csv = format!(
            "ticker,time,price\nMSFT,{},326.0\nMSFT,not-a-time,1.0\nAMZN,{},abc\nshort\n\nAMZN,{},130.5\n",
            start,
            start + 10,
            start + 20
        );

        let parsed = parse_observations(&csv);
        assert_eq!(parsed.observations.len(), 2);
        assert_eq!(parsed.dropped, 3);
    }

    #[tokio::test]
    async fn test_source_groups_by_instrument_and_day() {
        let start = day_start_ms(day());
        let csv = format!(
            "MSFT,{},2.0\nMSFT,{},1.0\nAMZN,{},3.0\nMSFT,{},9.0\n",
            start + 60_000,
            start,
            start,
            start + 86_400_000
        );

        let source = CsvPriceSource::from_csv_content(&csv);
        let msft = source.fetch("MSFT", day()).await.unwrap();
        assert_eq!(msft.observations.len(), 2);
        assert_eq!(msft.observations[0].price, 1.0);
        assert_eq!(msft.observations[1].price, 2.0);

        let missing = source.fetch("NFLX", day()).await.unwrap();
        assert!(missing.observations.is_empty());
    }

    #[tokio::test]
    async fn test_load_drops_reported_once() {
        let start = day_start_ms(day());
        let csv = format!(
            "MSFT,{},2.0\nMSFT,oops,1.0\nAMZN,{},abc\n",
            start, start
        );

        let source = CsvPriceSource::from_csv_content(&csv);
        assert_eq!(source.dropped(), 2);

        let first = source.fetch("MSFT", day()).await.unwrap();
        assert_eq!(first.observations.len(), 1);
        assert_eq!(first.dropped, 2);

        let second = source.fetch("MSFT", day()).await.unwrap();
        assert_eq!(second.dropped, 0);
        assert_eq!(source.dropped(), 2);
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.csv");
        let observations = vec![
            Observation::new("AAPL", 0, 100.0),
            Observation::new("AAPL", 10, 101.25),
        ];

        write_observations(&path, &observations).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(HEADER));

        let parsed = parse_observations(&content);
        assert_eq!(parsed.observations, observations);
        assert_eq!(parsed.dropped, 0);
    }
}
