//! Wire shape of a bus message: key = instrument, payload = price text.

use serde::{Deserialize, Serialize};

use crate::market::Observation;

/// A single message as carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusRecord {
    pub key: String,
    pub payload: String,
    /// Message timestamp, milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// A record that could not be turned back into an observation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("record at {timestamp} has an empty key")]
    EmptyKey { timestamp: i64 },

    #[error("record for {key} has an unparsable payload: {payload:?}")]
    InvalidPayload { key: String, payload: String },

    #[error("record for {key} carries a non-finite price")]
    NonFinitePrice { key: String },
}

impl BusRecord {
    pub fn encode(obs: &Observation) -> Self {
        Self {
            key: obs.instrument.clone(),
            payload: obs.price.to_string(),
            timestamp: obs.timestamp,
        }
    }

    pub fn decode(&self) -> Result<Observation, RecordError> {
        if self.key.is_empty() {
            return Err(RecordError::EmptyKey {
                timestamp: self.timestamp,
            });
        }

        let price: f64 = self
            .payload
            .trim()
            .parse()
            .map_err(|_| RecordError::InvalidPayload {
                key: self.key.clone(),
                payload: self.payload.clone(),
            })?;

        if !price.is_finite() {
            return Err(RecordError::NonFinitePrice {
                key: self.key.clone(),
            });
        }

        Ok(Observation::new(self.key.clone(), self.timestamp, price))
    }
}
