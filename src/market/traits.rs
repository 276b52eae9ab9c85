//! Provider-agnostic interface for historical price observations.
//!
//! Implementations return one instrument's observations for a single trading
//! day. The orchestrator treats a source as a pure function of
//! `(instrument, day)`; any caching is the implementation's business.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::types::FetchOutcome;

/// Source of sparse price observations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the observations for `instrument` on `day`, ascending by timestamp.
    ///
    /// Malformed records are dropped and counted in the outcome; an `Err`
    /// means the provider itself was unavailable.
    async fn fetch(&self, instrument: &str, day: NaiveDate) -> anyhow::Result<FetchOutcome>;
}
