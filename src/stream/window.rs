//! Time-bounded sliding buffer over the streamed series.

use std::collections::VecDeque;

use crate::market::Observation;

/// Most recent `lookback_ms` of observations, all instruments combined.
///
/// Entries are kept in arrival order; the window never reorders.
#[derive(Debug, Clone)]
pub struct StreamWindow {
    lookback_ms: i64,
    buffer: VecDeque<Observation>,
    latest: Option<i64>,
    exhausted: bool,
}

impl StreamWindow {
    pub fn new(lookback_ms: i64) -> Self {
        Self {
            lookback_ms: lookback_ms.max(0),
            buffer: VecDeque::new(),
            latest: None,
            exhausted: false,
        }
    }

    /// Append a polled batch and evict entries older than the lookback.
    ///
    /// An empty batch means the poll timed out with nothing to read, which
    /// marks the stream as exhausted.
    pub fn absorb(&mut self, batch: Vec<Observation>) {
        if batch.is_empty() {
            self.exhausted = true;
            return;
        }
        self.exhausted = false;

        for obs in batch {
            self.latest = Some(self.latest.map_or(obs.timestamp, |t| t.max(obs.timestamp)));
            self.buffer.push_back(obs);
        }

        if let Some(latest) = self.latest {
            let cutoff = latest.saturating_sub(self.lookback_ms);
            while self
                .buffer
                .front()
                .is_some_and(|front| front.timestamp < cutoff)
            {
                self.buffer.pop_front();
            }
        }
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Observation> {
        self.buffer.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.buffer.iter()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Latest timestamp absorbed since the last reset.
    pub fn latest_timestamp(&self) -> Option<i64> {
        self.latest
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the window for a new trading day.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.latest = None;
        self.exhausted = false;
    }
}
