//! Observation and trade records shared by every stage of the pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds in one calendar day.
pub const MS_PER_DAY: i64 = 86_400_000;

/// A single price sample for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub instrument: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub price: f64,
}

impl Observation {
    pub fn new(instrument: impl Into<String>, timestamp: i64, price: f64) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            price,
        }
    }

    /// Calendar day (UTC) the observation falls on.
    pub fn trading_day(&self) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp).map(|dt| dt.date_naive())
    }
}

/// A proposed order produced by a strategy, before ledger application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub instrument: String,
    pub timestamp: i64,
    /// Signed units: positive buys, negative sells
    pub quantity: i64,
    pub price: f64,
}

impl TradeIntent {
    pub fn buy(instrument: impl Into<String>, timestamp: i64, quantity: i64, price: f64) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            quantity,
            price,
        }
    }

    /// Cash moved by this trade (positive for buys).
    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.price
    }

    pub fn is_buy(&self) -> bool {
        self.quantity > 0
    }
}

/// Observations returned by a price source for one instrument and day.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Parsed observations, ascending by timestamp
    pub observations: Vec<Observation>,
    /// Records that could not be parsed and were dropped
    pub dropped: usize,
}

impl FetchOutcome {
    pub fn new(observations: Vec<Observation>, dropped: usize) -> Self {
        Self {
            observations,
            dropped,
        }
    }
}

/// Start of the given day in epoch milliseconds.
pub fn day_start_ms(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_day_from_timestamp() {
        let day = NaiveDate::from_ymd_opt(2023, 8, 2).unwrap();
        // 09:30 on the day
        let obs = Observation::new("MSFT", day_start_ms(day) + 34_200_000, 325.0);
        assert_eq!(obs.trading_day(), Some(day));
    }

    #[test]
    fn test_trade_notional() {
        let trade = TradeIntent::buy("AAPL", 0, 10, 101.5);
        assert_eq!(trade.notional(), 1015.0);
        assert!(trade.is_buy());

        let sell = TradeIntent { quantity: -3, ..trade };
        assert_eq!(sell.notional(), -304.5);
        assert!(!sell.is_buy());
    }

    #[test]
    fn test_day_start_is_midnight_utc() {
        let day = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(day_start_ms(day), MS_PER_DAY);
    }
}
