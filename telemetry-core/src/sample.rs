// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The recorded unit of observation and the clamp applied to it on the way
//! in.

/// A single numeric observation recorded into a histogram.
///
/// This is a plain `i32` rather than a newtype so that it composes cheaply
/// with the atomic bucket math; the clamp in [`clamp_sample`] is what keeps
/// the invariant that a `Sample` is always in `[0, SAMPLE_MAX - 1]` once it
/// reaches a sample store.
pub type Sample = i32;

/// The maximum positive value representable by [`Sample`]. Recording clamps
/// incoming values to `[0, SAMPLE_MAX - 1]`; `SAMPLE_MAX` itself is reserved
/// as the closing (exclusive) boundary of every `BucketRanges`.
pub const SAMPLE_MAX: Sample = i32::MAX;

/// Clamp a raw value to the representable sample range `[0, SAMPLE_MAX - 1]`.
///
/// Negative inputs are floored to 0 rather than rejected: the original
/// design treats a negative duration or count as a measurement bug at the
/// call site, not something the histogram should refuse to record.
pub fn clamp_sample(value: i64) -> Sample {
    if value < 0 {
        0
    } else if value >= SAMPLE_MAX as i64 {
        SAMPLE_MAX - 1
    } else {
        value as Sample
    }
}

/// Converts a duration to whole milliseconds, clamped to a valid [`Sample`].
pub fn sample_from_duration_millis(duration: std::time::Duration) -> Sample {
    clamp_sample(duration.as_millis() as i64)
}

/// Converts a duration to whole microseconds, clamped to a valid [`Sample`].
///
/// Per §3, hosts without a high-resolution clock should not report
/// microsecond granularity at all. This crate has no access to the clock
/// itself (supplying timestamps is a caller concern), so the no-op case is
/// expressed as `None` and left to the caller's clock-resolution check;
/// see [`crate::single_sample_metric`] for a usage example.
pub fn sample_from_duration_micros(duration: std::time::Duration, high_resolution_clock: bool) -> Option<Sample> {
    if !high_resolution_clock {
        return None;
    }
    Some(clamp_sample(duration.as_micros() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_negative_to_zero() {
        assert_eq!(clamp_sample(-1), 0);
        assert_eq!(clamp_sample(-1_000_000), 0);
    }

    #[test]
    fn clamps_overflow_to_sample_max_minus_one() {
        assert_eq!(clamp_sample(SAMPLE_MAX as i64), SAMPLE_MAX - 1);
        assert_eq!(clamp_sample(i64::MAX), SAMPLE_MAX - 1);
    }

    #[test]
    fn passes_through_in_range_values() {
        assert_eq!(clamp_sample(0), 0);
        assert_eq!(clamp_sample(42), 42);
    }

    #[test]
    fn low_resolution_clock_drops_microseconds() {
        assert_eq!(
            sample_from_duration_micros(std::time::Duration::from_micros(5), false),
            None
        );
        assert_eq!(
            sample_from_duration_micros(std::time::Duration::from_micros(5), true),
            Some(5)
        );
    }
}
