//! Wall-clock accounting per pipeline component.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Accumulated time for one component.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComponentTiming {
    pub total: Duration,
    pub calls: u64,
}

impl ComponentTiming {
    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.total / self.calls as u32
    }
}

/// Thread-safe collection of component timings.
#[derive(Debug, Default)]
pub struct Profiler {
    timings: Mutex<BTreeMap<String, ComponentTiming>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, component: &str, elapsed: Duration) {
        let mut timings = self.timings.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = timings.entry(component.to_string()).or_default();
        entry.total += elapsed;
        entry.calls += 1;
    }

    /// Time a synchronous closure.
    pub fn measure<T>(&self, component: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(component, start.elapsed());
        out
    }

    /// Time a future from first poll to completion.
    pub async fn measure_async<F>(&self, component: &str, fut: F) -> F::Output
    where
        F: Future,
    {
        let start = Instant::now();
        let out = fut.await;
        self.record(component, start.elapsed());
        out
    }

    pub fn timings(&self) -> BTreeMap<String, ComponentTiming> {
        self.timings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One line per component, sorted by name.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (component, timing) in self.timings() {
            out.push_str(&format!(
                "  {:<12} {:>10.3}s over {} calls (avg {:.3}ms)\n",
                component,
                timing.total.as_secs_f64(),
                timing.calls,
                timing.average().as_secs_f64() * 1000.0,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_accumulates() {
        let profiler = Profiler::new();
        assert_eq!(profiler.measure("Densifying", || 2 + 2), 4);
        profiler.record("Densifying", Duration::from_millis(10));

        let timings = profiler.timings();
        let densify = timings["Densifying"];
        assert_eq!(densify.calls, 2);
        assert!(densify.total >= Duration::from_millis(10));
    }

    #[test]
    fn test_measure_async() {
        let profiler = Profiler::new();
        let value = tokio_test::block_on(profiler.measure_async("Fetching", async { 7 }));
        assert_eq!(value, 7);
        assert_eq!(profiler.timings()["Fetching"].calls, 1);
        assert!(profiler.report().contains("Fetching"));
    }

    #[test]
    fn test_average_of_nothing() {
        assert_eq!(ComponentTiming::default().average(), Duration::ZERO);
    }
}
