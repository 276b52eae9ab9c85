//! Segment splitting and per-segment linear interpolation.

use std::ops::Range;

use rand::Rng;

use crate::market::{Observation, MS_PER_DAY};

/// Widest gap a single pair may span.
pub const MAX_PAIR_SPAN_MS: i64 = MS_PER_DAY;

/// Bounds of the uniform perturbation added to each interpolated sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    pub min: f64,
    pub max: f64,
}

impl Jitter {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// No perturbation.
    pub fn none() -> Self {
        Self { min: 0.0, max: 0.0 }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.min >= self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

/// Why a segment was abandoned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SegmentError {
    #[error("timestamps go backwards for {instrument}: {next} follows {prev}")]
    NonMonotonic {
        instrument: String,
        prev: i64,
        next: i64,
    },

    #[error("non-finite price for {instrument} at {timestamp}")]
    NonFinitePrice { instrument: String, timestamp: i64 },

    #[error("gap too wide for {instrument}: {prev} to {next}")]
    SpanTooLarge {
        instrument: String,
        prev: i64,
        next: i64,
    },

    #[error("interpolation worker panicked")]
    WorkerPanicked,
}

/// Split `len` observations into at most `segments` contiguous ranges.
///
/// Adjacent ranges share their boundary observation, so every consecutive
/// pair `(i, i + 1)` belongs to exactly one range. Fewer than two
/// observations yield no ranges.
pub fn split_ranges(len: usize, segments: usize) -> Vec<Range<usize>> {
    if len < 2 || segments == 0 {
        return Vec::new();
    }

    let pairs = len - 1;
    let segments = segments.min(pairs);
    let base = pairs / segments;
    let extra = pairs % segments;

    let mut ranges = Vec::with_capacity(segments);
    let mut start = 0;
    for i in 0..segments {
        let pair_count = base + usize::from(i < extra);
        let end = start + pair_count;
        // Include the `next` of the last pair
        ranges.push(start..end + 1);
        start = end;
    }

    ranges
}

/// Number of samples a pair spanning `span_ms` produces at `cadence_ms`.
pub fn samples_for_span(span_ms: i64, cadence_ms: i64) -> usize {
    if span_ms <= 0 || cadence_ms <= 0 {
        return 0;
    }
    (span_ms / cadence_ms + i64::from(span_ms % cadence_ms != 0)) as usize
}

/// Interpolate one segment in isolation.
///
/// For each consecutive pair of the same instrument, samples are emitted at
/// `prev.timestamp + k * cadence_ms` while strictly below `next.timestamp`.
/// Pairs that straddle two instruments are skipped. The first malformed pair
/// aborts the whole segment, including a gap wider than [`MAX_PAIR_SPAN_MS`].
pub fn interpolate_segment<R: Rng + ?Sized>(
    segment: &[Observation],
    cadence_ms: i64,
    jitter: Jitter,
    rng: &mut R,
) -> Result<Vec<Observation>, SegmentError> {
    let cadence_ms = cadence_ms.max(1);
    let mut out = Vec::new();

    for pair in segment.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.instrument != next.instrument {
            continue;
        }

        for obs in [prev, next] {
            if !obs.price.is_finite() {
                return Err(SegmentError::NonFinitePrice {
                    instrument: obs.instrument.clone(),
                    timestamp: obs.timestamp,
                });
            }
        }

        if next.timestamp < prev.timestamp {
            return Err(SegmentError::NonMonotonic {
                instrument: prev.instrument.clone(),
                prev: prev.timestamp,
                next: next.timestamp,
            });
        }

        let span = next
            .timestamp
            .checked_sub(prev.timestamp)
            .filter(|span| *span <= MAX_PAIR_SPAN_MS)
            .ok_or_else(|| SegmentError::SpanTooLarge {
                instrument: prev.instrument.clone(),
                prev: prev.timestamp,
                next: next.timestamp,
            })?;

        out.reserve(samples_for_span(span, cadence_ms));
        let delta = next.price - prev.price;
        let mut t = prev.timestamp;
        while t < next.timestamp {
            let fraction = (t - prev.timestamp) as f64 / span as f64;
            let price = prev.price + fraction * delta + jitter.sample(rng);
            out.push(Observation::new(prev.instrument.clone(), t, price));
            match t.checked_add(cadence_ms) {
                Some(next_t) => t = next_t,
                None => break,
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_split_ranges_overlap_by_one() {
        let ranges = split_ranges(10, 3);
        assert_eq!(ranges, vec![0..4, 3..7, 6..10]);
    }

    #[test]
    fn test_split_ranges_caps_at_pair_count() {
        let ranges = split_ranges(3, 14);
        assert_eq!(ranges, vec![0..2, 1..3]);
    }

    #[test]
    fn test_split_ranges_too_short() {
        assert!(split_ranges(0, 4).is_empty());
        assert!(split_ranges(1, 4).is_empty());
    }

    #[test]
    fn test_coverage_ten_seconds_at_ten_ms() {
        let segment = vec![
            Observation::new("AAPL", 0, 100.0),
            Observation::new("AAPL", 10_000, 110.0),
        ];
        let out = interpolate_segment(&segment, 10, Jitter::none(), &mut rng()).unwrap();
        assert_eq!(out.len(), 1000);
        assert_eq!(out[0].timestamp, 0);
        assert_eq!(out[999].timestamp, 9_990);
        assert_eq!(out[500].price, 105.0);
    }

    #[test]
    fn test_single_observation_yields_nothing() {
        let segment = vec![Observation::new("AAPL", 0, 100.0)];
        let out = interpolate_segment(&segment, 10, Jitter::none(), &mut rng()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_upper_bound_is_exclusive() {
        let segment = vec![
            Observation::new("AAPL", 0, 100.0),
            Observation::new("AAPL", 20, 102.0),
        ];
        let out = interpolate_segment(&segment, 10, Jitter::none(), &mut rng()).unwrap();
        assert_eq!(
            out,
            vec![
                Observation::new("AAPL", 0, 100.0),
                Observation::new("AAPL", 10, 101.0),
            ]
        );
    }

    #[test]
    fn test_instrument_boundary_not_interpolated() {
        let segment = vec![
            Observation::new("AAPL", 0, 100.0),
            Observation::new("AAPL", 20, 102.0),
            Observation::new("MSFT", 0, 300.0),
            Observation::new("MSFT", 10, 301.0),
        ];
        let out = interpolate_segment(&segment, 10, Jitter::none(), &mut rng()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().filter(|o| o.instrument == "MSFT").count(), 1);
    }

    #[test]
    fn test_backwards_timestamp_aborts_segment() {
        let segment = vec![
            Observation::new("AAPL", 100, 100.0),
            Observation::new("AAPL", 50, 102.0),
        ];
        let err = interpolate_segment(&segment, 10, Jitter::none(), &mut rng()).unwrap_err();
        assert!(matches!(err, SegmentError::NonMonotonic { prev: 100, next: 50, .. }));
    }

    #[test]
    fn test_nan_price_aborts_segment() {
        let segment = vec![
            Observation::new("AAPL", 0, f64::NAN),
            Observation::new("AAPL", 50, 102.0),
        ];
        assert!(matches!(
            interpolate_segment(&segment, 10, Jitter::none(), &mut rng()),
            Err(SegmentError::NonFinitePrice { .. })
        ));
    }

    #[test]
    fn test_extreme_gaps_abort_segment() {
        for (prev, next) in [(0, 9_000_000_000_000_000_000), (i64::MIN, i64::MAX)] {
            let segment = vec![
                Observation::new("AAPL", prev, 100.0),
                Observation::new("AAPL", next, 102.0),
            ];
            let err = interpolate_segment(&segment, 10, Jitter::none(), &mut rng()).unwrap_err();
            assert_eq!(
                err,
                SegmentError::SpanTooLarge {
                    instrument: "AAPL".to_string(),
                    prev,
                    next,
                }
            );
        }
    }

    #[test]
    fn test_sampling_stops_at_i64_max() {
        let start = i64::MAX - 25;
        let segment = vec![
            Observation::new("AAPL", start, 100.0),
            Observation::new("AAPL", i64::MAX, 100.0),
        ];
        let out = interpolate_segment(&segment, 10, Jitter::none(), &mut rng()).unwrap();
        let stamps: Vec<i64> = out.iter().map(|o| o.timestamp).collect();
        assert_eq!(stamps, vec![start, start + 10, start + 20]);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let jitter = Jitter::new(-0.5, 0.5);
        let mut rng = rng();
        for _ in 0..1000 {
            let v = jitter.sample(&mut rng);
            assert!((-0.5..=0.5).contains(&v));
        }
        assert_eq!(Jitter::new(0.25, 0.25).sample(&mut rng), 0.25);
    }

    #[test]
    fn test_samples_for_span() {
        assert_eq!(samples_for_span(10_000, 10), 1000);
        assert_eq!(samples_for_span(25, 10), 3);
        assert_eq!(samples_for_span(0, 10), 0);
        assert_eq!(samples_for_span(i64::MAX, 10), (i64::MAX / 10 + 1) as usize);
    }
}
