// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A linear histogram wrapper that divides every recorded count by a
//! fixed scale, carrying the fractional remainder forward exactly rather
//! than rounding it away, so the reported total converges to
//! `added_count / scale` with error at most one per bucket.

use core::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use super::{ConstructionArgs, Histogram, HistogramType};
use crate::registry::StatisticsRegistry;
use crate::sample::Sample;

/// Wraps a linear histogram over `[minimum, minimum + count)` with a
/// per-bucket remainder tracked alongside it.
pub struct ScaledLinearHistogram {
    histogram: Arc<Histogram>,
    scale: i64,
    minimum: Sample,
    remainders: Box<[AtomicI32]>,
}

impl ScaledLinearHistogram {
    /// `count` buckets starting at `minimum`, each recorded count divided
    /// by `scale` (clamped to at least 1).
    pub fn new(name: &str, minimum: Sample, count: usize, scale: i64) -> Self {
        let bucket_count = count + 1;
        let histogram = StatisticsRegistry::current().factory_get(
            name,
            ConstructionArgs::bucketed(HistogramType::Linear, minimum, minimum + count as Sample, bucket_count),
            0,
        );
        Self {
            histogram,
            scale: scale.max(1),
            minimum,
            remainders: (0..count.max(1)).map(|_| AtomicI32::new(0)).collect(),
        }
    }

    pub fn histogram(&self) -> &Arc<Histogram> {
        &self.histogram
    }

    /// Records `count` at `sample`, scaled by `1 / scale`. The fractional
    /// remainder is carried in this bucket's slot and flushed as an extra
    /// unit to the underlying histogram once it reaches a full `scale`.
    pub fn add_scaled_count(&self, sample: Sample, count: i64) {
        if count == 0 {
            return;
        }
        if self.scale <= 1 {
            let _ = self.histogram.add_count(sample, count);
            return;
        }

        let index = (sample - self.minimum).max(0) as usize;
        let index = index.min(self.remainders.len() - 1);
        let slot = &self.remainders[index];

        let whole = count / self.scale;
        let fractional = count % self.scale;
        let mut extra = 0i64;

        loop {
            let current = slot.load(Ordering::Relaxed) as i64;
            let mut new_remainder = current + fractional;
            extra = 0;
            if new_remainder >= self.scale {
                extra = 1;
                new_remainder -= self.scale;
            }
            if slot
                .compare_exchange_weak(current as i32, new_remainder as i32, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        let scaled_count = whole + extra;
        if scaled_count > 0 {
            let _ = self.histogram.add_count(sample, scaled_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedRegistry;

    #[test]
    fn remainder_flushes_exactly_every_scale_counts() {
        let _scope = ScopedRegistry::new();
        let scaled = ScaledLinearHistogram::new("Scaled", 1, 4, 1000);
        for _ in 0..10 {
            scaled.add_scaled_count(2, 333);
        }
        // 10 * 333 = 3330; floor div by 1000 per call is 0 each time, the
        // remainder carries 330 three times (990) then the fourth push
        // crosses 1000 and flushes one unit, and so on.
        let total = scaled.histogram().snapshot_all().total_count();
        assert_eq!(total, 3330 / 1000);
    }

    #[test]
    fn scale_of_one_behaves_like_a_plain_add_count() {
        let _scope = ScopedRegistry::new();
        let scaled = ScaledLinearHistogram::new("Unscaled", 1, 4, 1);
        scaled.add_scaled_count(2, 5);
        assert_eq!(scaled.histogram().snapshot_all().total_count(), 5);
    }
}
