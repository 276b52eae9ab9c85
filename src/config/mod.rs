//! Configuration management for the tick trader.
//!
//! Loads settings from an optional `config.toml` and environment variables.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instruments and trading days to replay
    #[serde(default)]
    pub market: MarketConfig,
    /// Interpolation parameters
    #[serde(default)]
    pub densify: DensifyConfig,
    /// Bus and sliding-window parameters
    #[serde(default)]
    pub stream: StreamConfig,
    /// Strategy and ledger parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Market data provider settings
    #[serde(default)]
    pub data_source: DataSourceConfig,
    /// Trade store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Instrument symbols, fetched and densified together each day
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,
    /// Trading days to replay, in order
    #[serde(default = "default_trading_days")]
    pub trading_days: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensifyConfig {
    /// Output cadence in milliseconds
    #[serde(default = "default_cadence_ms")]
    pub cadence_ms: i64,
    /// Lower bound of the per-sample price perturbation
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    /// Upper bound of the per-sample price perturbation
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// Number of parallel segments (0 = available parallelism)
    #[serde(default = "default_segment_count")]
    pub segment_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Broker address handed to the bus
    #[serde(default = "default_broker")]
    pub broker: String,
    /// Topic the densified series is published on
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Trailing window span in milliseconds
    #[serde(default = "default_lookback_ms")]
    pub lookback_ms: i64,
    /// Maximum time a single poll waits for the first record
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Maximum records returned by one poll
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Cash available at process start
    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,
    /// Maximum units bought per instrument per decision
    #[serde(default = "default_max_lot_size")]
    pub max_lot_size: i64,
    /// Compare each instrument to its own mean instead of the window mean
    #[serde(default)]
    pub per_instrument_mean: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Alpha Vantage API key
    #[serde(default)]
    pub api_key: String,
    /// Provider base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Intraday bar interval
    #[serde(default = "default_interval")]
    pub interval: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path for executed trades
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_instruments() -> Vec<String> {
    ["MSFT", "AMZN", "GOOGL", "META", "NFLX"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_trading_days() -> Vec<NaiveDate> {
    NaiveDate::from_ymd_opt(2023, 8, 2).into_iter().collect()
}

fn default_cadence_ms() -> i64 {
    10
}

fn default_jitter_min() -> f64 {
    -0.5
}

fn default_jitter_max() -> f64 {
    0.5
}

fn default_segment_count() -> usize {
    14
}

fn default_broker() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "PRICES".to_string()
}

fn default_lookback_ms() -> i64 {
    30_000 // 30 seconds
}

fn default_poll_timeout_ms() -> u64 {
    10
}

fn default_max_poll_records() -> usize {
    500
}

fn default_initial_cash() -> f64 {
    1_000_000.0
}

fn default_max_lot_size() -> i64 {
    1000
}

fn default_base_url() -> String {
    "https://www.alphavantage.co".to_string()
}

fn default_interval() -> String {
    "1min".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_db_path() -> String {
    "data/trades.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration from a named file (extension optional) layered under
    /// `TICK__SECTION__KEY` environment variables.
    pub fn load_from(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("TICK")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("market.instruments")
                    .with_list_parse_key("market.trading_days")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.market.instruments.is_empty(),
            "at least one instrument is required"
        );
        anyhow::ensure!(
            !self.market.trading_days.is_empty(),
            "at least one trading day is required"
        );
        anyhow::ensure!(self.densify.cadence_ms > 0, "cadence_ms must be positive");
        anyhow::ensure!(
            self.densify.jitter_min.is_finite()
                && self.densify.jitter_max.is_finite()
                && self.densify.jitter_min <= self.densify.jitter_max,
            "jitter bounds must be finite with jitter_min <= jitter_max"
        );
        anyhow::ensure!(self.stream.lookback_ms > 0, "lookback_ms must be positive");
        anyhow::ensure!(
            self.stream.poll_timeout_ms > 0,
            "poll_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.stream.max_poll_records > 0,
            "max_poll_records must be positive"
        );
        anyhow::ensure!(
            self.trading.initial_cash.is_finite() && self.trading.initial_cash >= 0.0,
            "initial_cash must be finite and non-negative"
        );
        anyhow::ensure!(
            self.trading.max_lot_size > 0,
            "max_lot_size must be positive"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            densify: DensifyConfig::default(),
            stream: StreamConfig::default(),
            trading: TradingConfig::default(),
            data_source: DataSourceConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
            trading_days: default_trading_days(),
        }
    }
}

impl Default for DensifyConfig {
    fn default() -> Self {
        Self {
            cadence_ms: default_cadence_ms(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            segment_count: default_segment_count(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            topic: default_topic(),
            lookback_ms: default_lookback_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_poll_records: default_max_poll_records(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            max_lot_size: default_max_lot_size(),
            per_instrument_mean: false,
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            interval: default_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_reference_run() {
        let config = Config::default();
        assert_eq!(config.market.instruments.len(), 5);
        assert_eq!(config.stream.lookback_ms, 30_000);
        assert_eq!(config.densify.cadence_ms, 10);
        assert_eq!(config.trading.max_lot_size, 1000);
        assert_eq!(config.stream.topic, "PRICES");
    }

    #[test]
    fn test_inverted_jitter_rejected() {
        let mut config = Config::default();
        config.densify.jitter_min = 1.0;
        config.densify.jitter_max = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_instruments_rejected() {
        let mut config = Config::default();
        config.market.instruments.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tick.toml");
        std::fs::write(
            &path,
            r#"
[market]
instruments = ["AAPL"]
trading_days = ["2024-01-02", "2024-01-03"]

[trading]
initial_cash = 5000.0
max_lot_size = 10
"#,
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.market.instruments, vec!["AAPL"]);
        assert_eq!(config.market.trading_days.len(), 2);
        assert_eq!(config.trading.initial_cash, 5000.0);
        assert_eq!(config.trading.max_lot_size, 10);
        // Untouched sections fall back to defaults
        assert_eq!(config.densify.cadence_ms, 10);
    }
}
