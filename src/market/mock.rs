//! In-memory price source for offline runs and tests.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::PriceSource;
use super::types::{FetchOutcome, Observation};

/// Price source serving canned observations, with per-day outage simulation.
#[derive(Default)]
pub struct CannedPriceSource {
    series: RwLock<HashMap<(String, NaiveDate), Vec<Observation>>>,
    unavailable_days: RwLock<HashSet<NaiveDate>>,
}

impl CannedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the observations returned for `(instrument, day)`.
    pub async fn insert(&self, instrument: &str, day: NaiveDate, mut observations: Vec<Observation>) {
        observations.sort_by_key(|o| o.timestamp);
        self.series
            .write()
            .await
            .insert((instrument.to_string(), day), observations);
    }

    /// Make every fetch for `day` fail as if the provider were down.
    pub async fn fail_day(&self, day: NaiveDate) {
        self.unavailable_days.write().await.insert(day);
    }
}

#[async_trait]
impl PriceSource for CannedPriceSource {
    async fn fetch(&self, instrument: &str, day: NaiveDate) -> Result<FetchOutcome> {
        if self.unavailable_days.read().await.contains(&day) {
            anyhow::bail!("Price source unavailable for {}", day);
        }

        let observations = self
            .series
            .read()
            .await
            .get(&(instrument.to_string(), day))
            .cloned()
            .unwrap_or_default();

        debug!(instrument, day = %day, count = observations.len(), "Mock fetch");
        Ok(FetchOutcome::new(observations, 0))
    }
}
