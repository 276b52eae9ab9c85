//! In-process single-topic bus backed by a tokio channel.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::record::BusRecord;
use super::MessageBus;
use crate::config::StreamConfig;
use crate::market::Observation;

/// Connection settings for a bus instance.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub broker: String,
    pub topic: String,
    /// Maximum records returned by one poll
    pub max_poll_records: usize,
}

impl BusConfig {
    pub fn from_stream(config: &StreamConfig) -> Self {
        Self {
            broker: config.broker.clone(),
            topic: config.topic.clone(),
            max_poll_records: config.max_poll_records,
        }
    }
}

/// Bus that delivers records in publish order to a single consumer.
pub struct InMemoryBus {
    config: BusConfig,
    tx: mpsc::UnboundedSender<BusRecord>,
    rx: Mutex<mpsc::UnboundedReceiver<BusRecord>>,
}

impl InMemoryBus {
    pub fn new(config: BusConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        info!(
            broker = %config.broker,
            topic = %config.topic,
            "In-memory bus ready"
        );

        Self {
            config: BusConfig {
                max_poll_records: config.max_poll_records.max(1),
                ..config
            },
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Publish an already-encoded record.
    pub fn publish_record(&self, record: BusRecord) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|_| anyhow::anyhow!("Topic {} is closed", self.config.topic))
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, series: &[Observation]) -> Result<usize> {
        for obs in series {
            self.publish_record(BusRecord::encode(obs))?;
        }
        debug!(topic = %self.config.topic, records = series.len(), "Published series");
        Ok(series.len())
    }

    async fn poll(&self, timeout: Duration) -> Result<Vec<BusRecord>> {
        let mut rx = self.rx.lock().await;

        let first = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(record)) => record,
            // Timed out, or every sender is gone
            Ok(None) | Err(_) => return Ok(Vec::new()),
        };

        let mut batch = Vec::with_capacity(self.config.max_poll_records);
        batch.push(first);
        while batch.len() < self.config.max_poll_records {
            match rx.try_recv() {
                Ok(record) => batch.push(record),
                Err(_) => break,
            }
        }

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(max_poll_records: usize) -> InMemoryBus {
        InMemoryBus::new(BusConfig {
            broker: "localhost:9092".to_string(),
            topic: "PRICES".to_string(),
            max_poll_records,
        })
    }

    fn series(n: i64) -> Vec<Observation> {
        (0..n)
            .map(|i| Observation::new("AAPL", i * 10, 100.0 + i as f64))
            .collect()
    }

    #[tokio::test]
    async fn test_poll_preserves_publish_order_in_batches() {
        let bus = bus(3);
        assert_eq!(bus.publish(&series(7)).await.unwrap(), 7);

        let timeout = Duration::from_millis(10);
        let sizes = [
            bus.poll(timeout).await.unwrap(),
            bus.poll(timeout).await.unwrap(),
            bus.poll(timeout).await.unwrap(),
        ];
        assert_eq!(sizes.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);

        let stamps: Vec<i64> = sizes.iter().flatten().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![0, 10, 20, 30, 40, 50, 60]);
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let bus = bus(10);
        let batch = bus.poll(Duration::from_millis(10)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_topic_from_config() {
        let bus = InMemoryBus::new(BusConfig::from_stream(&StreamConfig::default()));
        assert_eq!(bus.topic(), "PRICES");
    }
}
