//! Publish/subscribe transport between the densifier and the trading loop.
//!
//! Each observation travels as a [`BusRecord`] keyed by instrument, with the
//! price as text and the sample time as the message timestamp. Consumers see
//! records of one topic in publish order.

mod memory;
mod record;

pub use memory::{BusConfig, InMemoryBus};
pub use record::{BusRecord, RecordError};

use std::time::Duration;

use async_trait::async_trait;

use crate::market::Observation;

/// Message bus seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish every observation of `series` as its own record, in order.
    /// Returns the number of records handed to the transport.
    async fn publish(&self, series: &[Observation]) -> anyhow::Result<usize>;

    /// Wait up to `timeout` for records and return the next batch.
    /// An empty batch means nothing arrived before the timeout.
    async fn poll(&self, timeout: Duration) -> anyhow::Result<Vec<BusRecord>>;
}
