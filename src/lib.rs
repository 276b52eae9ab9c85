//! # Tick Trader
//!
//! Densifies sparse intraday price observations into a fixed-cadence series,
//! streams it through a message bus and paper trades a moving-average rule
//! against it.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `market`: Observation types and price sources (HTTP, CSV, canned)
//! - `densify`: Parallel segment interpolation
//! - `bus`: Publish/poll transport for the densified series
//! - `stream`: Sliding lookback window fed by bounded polls
//! - `strategy`: Trade decisions over the window
//! - `ledger`: Cash, holdings and cost-basis accounting
//! - `persistence`: SQLite trade and run storage
//! - `engine`: Per-day orchestration and run summaries
//! - `utils`: Shared utilities (profiling)

pub mod bus;
pub mod config;
pub mod densify;
pub mod engine;
pub mod ledger;
pub mod market;
pub mod persistence;
pub mod strategy;
pub mod stream;
pub mod utils;

pub use config::Config;
