//! End-of-run report.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    // Progress
    pub days_processed: usize,
    pub skipped_days: Vec<NaiveDate>,
    /// Fetch rows plus bus records that failed to parse
    pub dropped_records: usize,
    pub failed_segments: usize,
    /// Trade batches the store rejected
    pub failed_persists: usize,

    // Accounting
    pub initial_cash: f64,
    pub final_cash: f64,
    pub realized_pnl: f64,
    /// Cash plus holdings at the last seen prices
    pub equity: f64,
    pub trade_counts: BTreeMap<String, usize>,
}

impl RunSummary {
    /// Equity minus the starting cash.
    pub fn net_pnl(&self) -> f64 {
        self.equity - self.initial_cash
    }

    pub fn total_trades(&self) -> usize {
        self.trade_counts.values().sum()
    }

    /// Format the run as a summary string.
    pub fn summary(&self) -> String {
        let skipped = if self.skipped_days.is_empty() {
            "none".to_string()
        } else {
            self.skipped_days
                .iter()
                .map(NaiveDate::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut trades = String::new();
        for (instrument, count) in &self.trade_counts {
            trades.push_str(&format!("  {:<18} {}\n", format!("{}:", instrument), count));
        }
        if trades.is_empty() {
            trades.push_str("  (no trades)\n");
        }

        format!(
            r#"═══════════════════════════════════════════════
RUN SUMMARY ({})
═══════════════════════════════════════════════
PROGRESS
  Days Processed:    {}
  Skipped Days:      {}
  Dropped Records:   {}
  Failed Segments:   {}
  Failed Persists:   {}

ACCOUNT
  Initial Cash:      ${:.2}
  Final Cash:        ${:.2}
  Realized P&L:      ${:.2}
  Equity:            ${:.2}
  Net P&L:           ${:.2}

TRADES ({} total)
{}═══════════════════════════════════════════════"#,
            self.run_id,
            self.days_processed,
            skipped,
            self.dropped_records,
            self.failed_segments,
            self.failed_persists,
            self.initial_cash,
            self.final_cash,
            self.realized_pnl,
            self.equity,
            self.net_pnl(),
            self.total_trades(),
            trades,
        )
    }
}
