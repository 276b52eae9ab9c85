//! Shared utilities.

mod profiler;

pub use profiler::{ComponentTiming, Profiler};
