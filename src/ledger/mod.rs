//! Cash, holdings and realized P&L for one run.
//!
//! Each instrument carries a weighted-average cost basis that moves on buys.
//! Sells realize `closed * (price - average_cost)` against the units actually
//! held; selling more than is held only moves cash for the excess. A holding
//! whose quantity drops to zero or below is removed. Ledger state survives
//! across trading days and is never reset inside a run.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::market::TradeIntent;

/// Accounting failures that make the ledger untrustworthy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("trade for {instrument} at {timestamp} has a non-finite price")]
    NonFinitePrice { instrument: String, timestamp: i64 },

    #[error("cash became non-finite applying {instrument} at {timestamp}")]
    NonFiniteCash { instrument: String, timestamp: i64 },

    #[error("cost basis for {instrument} became non-finite")]
    NonFiniteCostBasis { instrument: String },

    #[error("realized P&L became non-finite applying {instrument} at {timestamp}")]
    NonFinitePnl { instrument: String, timestamp: i64 },
}

/// Units held of one instrument with their average cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Holding {
    pub quantity: f64,
    pub average_cost: f64,
}

/// Mutable accounting state, changed only through [`PositionLedger::apply`].
#[derive(Debug, Clone, Serialize)]
pub struct PositionLedger {
    initial_cash: f64,
    cash: f64,
    holdings: HashMap<String, Holding>,
    realized_pnl: f64,
    trade_counts: BTreeMap<String, usize>,
}

impl PositionLedger {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            holdings: HashMap::new(),
            realized_pnl: 0.0,
            trade_counts: BTreeMap::new(),
        }
    }

    /// Apply trades in order.
    ///
    /// Trades before a failing one stay applied; the failing trade leaves
    /// the ledger untouched.
    pub fn apply(&mut self, trades: &[TradeIntent]) -> Result<(), LedgerError> {
        for trade in trades {
            self.apply_one(trade)?;
        }

        if !trades.is_empty() {
            debug!(
                trades = trades.len(),
                cash = self.cash,
                realized_pnl = self.realized_pnl,
                "Applied trades"
            );
        }
        Ok(())
    }

    fn apply_one(&mut self, trade: &TradeIntent) -> Result<(), LedgerError> {
        if !trade.price.is_finite() {
            return Err(LedgerError::NonFinitePrice {
                instrument: trade.instrument.clone(),
                timestamp: trade.timestamp,
            });
        }

        let cash = self.cash - trade.notional();
        if !cash.is_finite() {
            return Err(LedgerError::NonFiniteCash {
                instrument: trade.instrument.clone(),
                timestamp: trade.timestamp,
            });
        }

        let current = self.holdings.get(&trade.instrument).copied().unwrap_or(Holding {
            quantity: 0.0,
            average_cost: 0.0,
        });
        let units = trade.quantity as f64;
        let quantity = current.quantity + units;

        let (average_cost, realized) = if trade.quantity > 0 {
            let cost = if current.quantity > 0.0 {
                (current.quantity * current.average_cost + units * trade.price) / quantity
            } else {
                trade.price
            };
            (cost, 0.0)
        } else {
            let closed = (-units).min(current.quantity.max(0.0));
            (
                current.average_cost,
                closed * (trade.price - current.average_cost),
            )
        };

        if !average_cost.is_finite() {
            return Err(LedgerError::NonFiniteCostBasis {
                instrument: trade.instrument.clone(),
            });
        }
        let realized_pnl = self.realized_pnl + realized;
        if !realized_pnl.is_finite() {
            return Err(LedgerError::NonFinitePnl {
                instrument: trade.instrument.clone(),
                timestamp: trade.timestamp,
            });
        }

        self.cash = cash;
        self.realized_pnl = realized_pnl;
        if quantity > 0.0 {
            self.holdings.insert(
                trade.instrument.clone(),
                Holding {
                    quantity,
                    average_cost,
                },
            );
        } else {
            self.holdings.remove(&trade.instrument);
        }
        *self.trade_counts.entry(trade.instrument.clone()).or_default() += 1;

        if self.cash < 0.0 {
            warn!(
                instrument = %trade.instrument,
                cash = self.cash,
                "Cash went negative"
            );
        }
        Ok(())
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn holdings(&self) -> &HashMap<String, Holding> {
        &self.holdings
    }

    pub fn holding(&self, instrument: &str) -> Option<&Holding> {
        self.holdings.get(instrument)
    }

    /// Applied trades per instrument, sorted by name.
    pub fn trade_counts(&self) -> &BTreeMap<String, usize> {
        &self.trade_counts
    }

    /// Cash plus holdings valued at `prices`, falling back to cost basis
    /// for instruments without a known price.
    pub fn equity(&self, prices: &HashMap<String, f64>) -> f64 {
        self.cash
            + self
                .holdings
                .iter()
                .map(|(instrument, h)| {
                    let price = prices.get(instrument).copied().unwrap_or(h.average_cost);
                    h.quantity * price
                })
                .sum::<f64>()
    }
}
