//! Densification of sparse observations into a fixed-cadence series.
//!
//! The input is split into contiguous, one-observation-overlapping segments
//! that are interpolated on scoped worker threads. Each worker builds its
//! result locally and appends it to a single mutex-guarded buffer; the merged
//! buffer is then sorted once, after every worker has joined. Segment
//! boundaries do not follow global time order across instruments, so the
//! final sort is what makes the output ordered.

mod segment;

pub use segment::{
    interpolate_segment, samples_for_span, split_ranges, Jitter, SegmentError, MAX_PAIR_SPAN_MS,
};

use std::sync::{Mutex, PoisonError};
use std::thread;

use tracing::{debug, instrument, warn};

use crate::config::DensifyConfig;
use crate::market::Observation;

/// A segment that was abandoned, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFailure {
    pub segment: usize,
    pub error: SegmentError,
}

/// Output of one densification call.
#[derive(Debug, Clone, Default)]
pub struct DensifyReport {
    /// Interpolated samples, ascending by timestamp
    pub series: Vec<Observation>,
    /// Number of segments the input was split into
    pub segments: usize,
    /// Segments whose output was discarded
    pub failures: Vec<SegmentFailure>,
}

impl DensifyReport {
    /// True when every segment contributed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_segments(&self) -> usize {
        self.failures.len()
    }
}

/// Parallel linear interpolator.
#[derive(Debug, Clone)]
pub struct Densifier {
    cadence_ms: i64,
    jitter: Jitter,
    segment_count: usize,
}

impl Densifier {
    /// Create a densifier. A `segment_count` of 0 uses the available parallelism.
    pub fn new(cadence_ms: i64, jitter: Jitter, segment_count: usize) -> Self {
        let segment_count = if segment_count == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            segment_count
        };

        Self {
            cadence_ms: cadence_ms.max(1),
            jitter,
            segment_count,
        }
    }

    pub fn from_config(config: &DensifyConfig) -> Self {
        Self::new(
            config.cadence_ms,
            Jitter::new(config.jitter_min, config.jitter_max),
            config.segment_count,
        )
    }

    pub fn cadence_ms(&self) -> i64 {
        self.cadence_ms
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    /// Interpolate `observations` into a uniform-cadence series.
    ///
    /// Observations of one instrument must be non-decreasing in time; runs of
    /// different instruments may follow each other in any order. A failing
    /// segment contributes nothing and is reported in the result.
    #[instrument(
        skip_all,
        fields(observations = observations.len(), segments = tracing::field::Empty)
    )]
    pub fn densify(&self, observations: &[Observation]) -> DensifyReport {
        let ranges = split_ranges(observations.len(), self.segment_count);
        tracing::Span::current().record("segments", ranges.len());

        let merged: Mutex<Vec<Observation>> = Mutex::new(Vec::new());
        let mut failures = Vec::new();

        thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .map(|range| {
                    let segment = &observations[range.clone()];
                    let merged = &merged;
                    let (cadence_ms, jitter) = (self.cadence_ms, self.jitter);

                    scope.spawn(move || {
                        let mut rng = rand::thread_rng();
                        let local = interpolate_segment(segment, cadence_ms, jitter, &mut rng)?;
                        merged
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend(local);
                        Ok::<(), SegmentError>(())
                    })
                })
                .collect();

            for (index, handle) in handles.into_iter().enumerate() {
                let outcome = handle.join().unwrap_or(Err(SegmentError::WorkerPanicked));
                if let Err(error) = outcome {
                    warn!(segment = index, "Segment abandoned: {}", error);
                    failures.push(SegmentFailure {
                        segment: index,
                        error,
                    });
                }
            }
        });

        let mut series = merged.into_inner().unwrap_or_else(PoisonError::into_inner);
        series.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.instrument.cmp(&b.instrument))
        });

        debug!(
            samples = series.len(),
            failed = failures.len(),
            "Densification complete"
        );

        DensifyReport {
            series,
            segments: ranges.len(),
            failures,
        }
    }
}
