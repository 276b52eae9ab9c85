//! Trading decisions over the streamed window.
//!
//! A strategy is stateless apart from its configuration: given the current
//! window and the cash available, it returns the trades it wants to make.

mod moving_average;

pub use moving_average::{AverageMode, MovingAverageStrategy};

use crate::market::TradeIntent;
use crate::stream::StreamWindow;

/// Decision contract shared by all strategies.
pub trait TradingStrategy: Send + Sync {
    fn decide(&self, window: &StreamWindow, cash: f64) -> Vec<TradeIntent>;
}
