//! Moving-average crossover entry rule over the lookback window.

use std::collections::HashMap;

use tracing::trace;

use super::TradingStrategy;
use crate::config::TradingConfig;
use crate::market::{Observation, TradeIntent};
use crate::stream::StreamWindow;

/// Which average an instrument's latest price is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AverageMode {
    /// One mean across every observation in the window
    #[default]
    Global,
    /// Each instrument against the mean of its own observations
    PerInstrument,
}

#[derive(Debug, Default)]
struct InstrumentStats {
    sum: f64,
    count: usize,
    latest_price: f64,
    latest_timestamp: i64,
}

/// Buys every instrument whose latest price sits strictly below the average.
#[derive(Debug, Clone)]
pub struct MovingAverageStrategy {
    max_lot_size: i64,
    mode: AverageMode,
}

impl MovingAverageStrategy {
    pub fn new(max_lot_size: i64, mode: AverageMode) -> Self {
        Self {
            max_lot_size: max_lot_size.max(0),
            mode,
        }
    }

    pub fn from_config(config: &TradingConfig) -> Self {
        let mode = if config.per_instrument_mean {
            AverageMode::PerInstrument
        } else {
            AverageMode::Global
        };
        Self::new(config.max_lot_size, mode)
    }

    pub fn mode(&self) -> AverageMode {
        self.mode
    }

    /// Evaluate any ordered sequence of observations against `cash`.
    ///
    /// Cash is spent greedily in the order instruments first appear.
    pub fn evaluate<'a, I>(&self, window: I, cash: f64) -> Vec<TradeIntent>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let mut order: Vec<&'a str> = Vec::new();
        let mut stats: HashMap<&'a str, InstrumentStats> = HashMap::new();
        let (mut total, mut count) = (0.0, 0usize);

        for obs in window {
            total += obs.price;
            count += 1;

            let entry = stats.entry(obs.instrument.as_str()).or_insert_with(|| {
                order.push(obs.instrument.as_str());
                InstrumentStats::default()
            });
            entry.sum += obs.price;
            entry.count += 1;
            entry.latest_price = obs.price;
            entry.latest_timestamp = obs.timestamp;
        }

        if count == 0 {
            return Vec::new();
        }
        let global_mean = total / count as f64;

        let mut remaining = cash;
        let mut intents = Vec::new();

        for instrument in order {
            let Some(s) = stats.get(instrument) else {
                continue;
            };
            let threshold = match self.mode {
                AverageMode::Global => global_mean,
                AverageMode::PerInstrument => s.sum / s.count as f64,
            };

            let price = s.latest_price;
            if price <= 0.0 || price >= threshold || price.is_nan() {
                continue;
            }

            let affordable = (remaining / price).floor();
            let quantity = if affordable.is_finite() && affordable > 0.0 {
                affordable.min(self.max_lot_size as f64) as i64
            } else {
                0
            };
            if quantity <= 0 {
                trace!(instrument, price, remaining, "Signal without affordable lot");
                continue;
            }

            remaining -= quantity as f64 * price;
            intents.push(TradeIntent::buy(instrument, s.latest_timestamp, quantity, price));
        }

        intents
    }
}

impl TradingStrategy for MovingAverageStrategy {
    fn decide(&self, window: &StreamWindow, cash: f64) -> Vec<TradeIntent> {
        self.evaluate(window.iter(), cash)
    }
}
