//! Alpha Vantage intraday REST client.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::traits::PriceSource;
use super::types::{FetchOutcome, Observation};
use crate::config::DataSourceConfig;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One intraday bar as returned by the provider. Only the open is used.
#[derive(Debug, Deserialize)]
struct IntradayBar {
    #[serde(rename = "1. open")]
    open: String,
}

/// REST client for the `TIME_SERIES_INTRADAY` endpoint.
pub struct AlphaVantageClient {
    http: Client,
    api_key: String,
    base_url: String,
    interval: String,
}

impl AlphaVantageClient {
    /// Create a new client from configuration.
    pub fn new(config: &DataSourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            interval: config.interval.clone(),
        })
    }

    /// Fetch the raw intraday JSON document for a symbol.
    #[instrument(skip(self))]
    async fn fetch_intraday(&self, symbol: &str) -> Result<serde_json::Value> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("function", "TIME_SERIES_INTRADAY"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
                ("interval", self.interval.as_str()),
                ("extended_hours", "false"),
                ("outputsize", "full"),
            ])
            .send()
            .await
            .context("Failed to fetch intraday series")?
            .error_for_status()
            .context("Intraday request rejected")?;

        response
            .json()
            .await
            .context("Failed to parse intraday response")
    }

    /// Extract the requested day's observations from an intraday document.
    ///
    /// Entries with an unparsable timestamp or price are dropped and counted.
    pub fn parse_intraday(
        &self,
        instrument: &str,
        document: &serde_json::Value,
        day: NaiveDate,
    ) -> Result<FetchOutcome> {
        if let Some(message) = document
            .get("Error Message")
            .or_else(|| document.get("Note"))
            .or_else(|| document.get("Information"))
        {
            anyhow::bail!("Provider returned an error for {}: {}", instrument, message);
        }

        let key = format!("Time Series ({})", self.interval);
        let series = document
            .get(&key)
            .with_context(|| format!("Missing '{}' in response for {}", key, instrument))?;

        let bars: HashMap<String, serde_json::Value> =
            serde_json::from_value(series.clone()).context("Malformed time series object")?;

        let day_prefix = day.format("%Y-%m-%d").to_string();
        let mut observations = Vec::new();
        let mut dropped = 0;

        for (stamp, bar) in bars {
            if !stamp.starts_with(&day_prefix) {
                continue;
            }

            match parse_bar(instrument, &stamp, bar) {
                Ok(obs) => observations.push(obs),
                Err(e) => {
                    warn!(instrument, stamp = %stamp, "Dropping malformed bar: {:#}", e);
                    dropped += 1;
                }
            }
        }

        observations.sort_by_key(|o| o.timestamp);
        debug!(
            instrument,
            day = %day,
            count = observations.len(),
            dropped,
            "Parsed intraday bars"
        );

        Ok(FetchOutcome::new(observations, dropped))
    }
}

fn parse_bar(instrument: &str, stamp: &str, bar: serde_json::Value) -> Result<Observation> {
    let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .with_context(|| format!("Invalid timestamp: {}", stamp))?
        .and_utc()
        .timestamp_millis();

    let bar: IntradayBar = serde_json::from_value(bar).context("Missing open price")?;
    let price: f64 = bar
        .open
        .trim()
        .parse()
        .with_context(|| format!("Invalid price: {}", bar.open))?;
    anyhow::ensure!(price.is_finite(), "Non-finite price: {}", bar.open);

    Ok(Observation::new(instrument, timestamp, price))
}

#[async_trait]
impl PriceSource for AlphaVantageClient {
    async fn fetch(&self, instrument: &str, day: NaiveDate) -> Result<FetchOutcome> {
        let document = self.fetch_intraday(instrument).await?;
        self.parse_intraday(instrument, &document, day)
    }
}
