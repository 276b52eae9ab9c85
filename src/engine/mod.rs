//! Run orchestration and reporting.
//!
//! The [`Orchestrator`] walks the trading days in order. Each day moves
//! through `Fetching`, `Densifying` and `Publishing`, then loops
//! `Polling` / `Deciding` / `Settling` until the bus runs dry, and ends in
//! `DayComplete`, which clears the window but keeps the ledger.

mod orchestrator;
mod summary;

pub use orchestrator::{DayPhase, DayStats, EngineError, Orchestrator};
pub use summary::RunSummary;
