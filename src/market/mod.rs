//! Market data: observation types and the price sources that produce them.
//!
//! ## Sources
//! - `AlphaVantageClient`: intraday bars over HTTP
//! - `CsvPriceSource`: observation files for offline replays
//! - `CannedPriceSource`: canned data with simulated outages

mod alpha_vantage;
pub mod csv;
pub mod mock;
mod traits;
mod types;

pub use alpha_vantage::AlphaVantageClient;
pub use csv::CsvPriceSource;
pub use mock::CannedPriceSource;
pub use traits::PriceSource;
#[cfg(test)]
pub use traits::MockPriceSource;
pub use types::*;
