//! Bounded-poll consumer feeding a [`StreamWindow`].

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::window::StreamWindow;
use crate::bus::{BusRecord, MessageBus};
use crate::market::Observation;

/// Observations decoded from one poll.
#[derive(Debug, Clone, Default)]
pub struct DecodedBatch {
    pub observations: Vec<Observation>,
    pub dropped: usize,
}

/// Decode a polled batch, dropping records that do not parse.
pub fn decode_batch(records: &[BusRecord]) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for record in records {
        match record.decode() {
            Ok(obs) => batch.observations.push(obs),
            Err(e) => {
                warn!("Dropping bus record: {}", e);
                batch.dropped += 1;
            }
        }
    }
    batch
}

/// Polls a bus with a short timeout and absorbs what arrives.
#[derive(Debug, Clone)]
pub struct StreamConsumer {
    poll_timeout: Duration,
    dropped: usize,
}

impl StreamConsumer {
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            dropped: 0,
        }
    }

    /// Poll once and absorb the decoded batch into `window`.
    ///
    /// Returns the decoded observations so the caller can track prices. A
    /// batch whose records all fail to decode is not treated as exhaustion.
    pub async fn poll_into<B>(&mut self, bus: &B, window: &mut StreamWindow) -> Result<Vec<Observation>>
    where
        B: MessageBus + ?Sized,
    {
        let records = bus.poll(self.poll_timeout).await.context("Bus poll failed")?;
        if records.is_empty() {
            window.absorb(Vec::new());
            return Ok(Vec::new());
        }

        let DecodedBatch {
            observations,
            dropped,
        } = decode_batch(&records);
        self.dropped += dropped;

        debug!(
            records = records.len(),
            decoded = observations.len(),
            dropped,
            "Polled batch"
        );

        if !observations.is_empty() {
            window.absorb(observations.clone());
        }
        Ok(observations)
    }

    /// Records dropped since construction.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
