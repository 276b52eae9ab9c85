//! Incremental consumption of the published series.

mod consumer;
mod window;

pub use consumer::{decode_batch, DecodedBatch, StreamConsumer};
pub use window::StreamWindow;
