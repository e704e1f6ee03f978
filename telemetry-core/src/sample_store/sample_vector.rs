// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The dense sample store used by exponential, linear, boolean, and custom
//! histograms: every recorded sample updates an atomic `sum`/`count` pair,
//! and the per-bucket counts live inline in a single-sample slot until a
//! second distinct bucket forces a one-time upgrade to a full array.

use core::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::OnceLock;

use crate::sample::Sample;
use crate::sample_store::single_sample::{Accumulate, AtomicSingleSample};

/// A dense, fixed-shape array of per-bucket counts plus running `sum` and
/// `redundant_count` totals.
///
/// `redundant_count` is the sum of every count ever added; it is compared
/// against the sum of the per-bucket counts array at snapshot time as a
/// cheap corruption check (see [`crate::snapshot`]).
#[derive(Debug)]
pub struct SampleVector {
    bucket_count: usize,
    single_sample: AtomicSingleSample,
    counts: OnceLock<Box<[AtomicI32]>>,
    sum: AtomicI64,
    redundant_count: AtomicI64,
}

impl SampleVector {
    pub fn new(bucket_count: usize) -> Self {
        Self {
            bucket_count,
            single_sample: AtomicSingleSample::new(),
            counts: OnceLock::new(),
            sum: AtomicI64::new(0),
            redundant_count: AtomicI64::new(0),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn sum(&self) -> i64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn redundant_count(&self) -> i64 {
        self.redundant_count.load(Ordering::Relaxed)
    }

    /// Total of the per-bucket counts array, or the single-sample slot's
    /// count if the array has not been allocated yet. Compared against
    /// [`Self::redundant_count`] to detect corruption.
    pub fn total_count(&self) -> i64 {
        match self.counts.get() {
            Some(counts) => counts.iter().map(|c| c.load(Ordering::Relaxed) as i64).sum(),
            None => self.single_sample.load().map(|(_, count)| count as i64).unwrap_or(0),
        }
    }

    /// Records `count` occurrences of `value`, which fell into
    /// `bucket_index`.
    pub fn add(&self, bucket_index: usize, value: Sample, count: i64) {
        debug_assert!(bucket_index < self.bucket_count);
        if count <= 0 {
            return;
        }
        self.sum.fetch_add(value as i64 * count, Ordering::Relaxed);
        self.redundant_count.fetch_add(count, Ordering::Relaxed);

        if self.counts.get().is_none() {
            if let (Ok(bucket_u16), Ok(count_u16)) = (u16::try_from(bucket_index), u16::try_from(count)) {
                match self.single_sample.accumulate(bucket_u16, count_u16) {
                    Accumulate::Accepted => return,
                    Accumulate::Disabled(prior) => self.promote(prior),
                }
            } else {
                // Out of single-sample range; force the promotion path and
                // fold in whatever the slot was holding.
                self.promote(self.single_sample.extract_and_disable());
            }
        }

        self.counts_slice()[bucket_index].fetch_add(count as i32, Ordering::Relaxed);
    }

    /// Installs the full counts array (a no-op if another thread already
    /// installed it) and folds `prior`, the single-sample slot's last
    /// value, into it.
    fn promote(&self, prior: Option<(u16, u16)>) {
        let fresh: Box<[AtomicI32]> = (0..self.bucket_count).map(|_| AtomicI32::new(0)).collect();
        let _ = self.counts.set(fresh);
        if let Some((bucket, count)) = prior {
            self.counts_slice()[bucket as usize].fetch_add(count as i32, Ordering::Relaxed);
        }
    }

    fn counts_slice(&self) -> &[AtomicI32] {
        self.counts.get().expect("promote must install the array before use")
    }

    /// Snapshot of the per-bucket counts, for iteration by a caller
    /// building a delta or a percentile.
    pub fn counts(&self) -> Vec<i64> {
        match self.counts.get() {
            Some(counts) => counts.iter().map(|c| c.load(Ordering::Relaxed) as i64).collect(),
            None => {
                let mut out = vec![0i64; self.bucket_count];
                if let Some((bucket, count)) = self.single_sample.load() {
                    out[bucket as usize] = count as i64;
                }
                out
            }
        }
    }

    /// Subtracts another vector's counts from this one in place, used when
    /// computing an unlogged-sample delta. Both vectors must share the
    /// same `bucket_count`.
    pub fn subtract_from(&self, other_counts: &[i64], other_sum: i64, other_redundant_count: i64) {
        self.promote_if_needed();
        let counts = self.counts_slice();
        for (slot, delta) in counts.iter().zip(other_counts.iter()) {
            slot.fetch_sub(*delta as i32, Ordering::Relaxed);
        }
        self.sum.fetch_sub(other_sum, Ordering::Relaxed);
        self.redundant_count.fetch_sub(other_redundant_count, Ordering::Relaxed);
    }

    fn promote_if_needed(&self) {
        if self.counts.get().is_none() {
            self.promote(self.single_sample.extract_and_disable());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_stays_inline_until_a_second_bucket_appears() {
        let vector = SampleVector::new(8);
        vector.add(2, 3, 1);
        assert_eq!(vector.counts(), vec![0, 0, 1, 0, 0, 0, 0, 0]);
        assert_eq!(vector.sum(), 3);

        vector.add(2, 3, 1);
        assert_eq!(vector.counts(), vec![0, 0, 2, 0, 0, 0, 0, 0]);

        vector.add(4, 10, 1);
        assert_eq!(vector.counts(), vec![0, 0, 2, 0, 1, 0, 0, 0]);
        assert_eq!(vector.sum(), 3 + 3 + 10);
        assert_eq!(vector.total_count(), 3);
        assert_eq!(vector.redundant_count(), 3);
    }

    #[test]
    fn add_count_greater_than_one_is_folded_in() {
        let vector = SampleVector::new(8);
        vector.add(2, 3, 5);
        assert_eq!(vector.counts()[2], 5);
        assert_eq!(vector.sum(), 15);
    }

    #[test]
    fn non_positive_count_is_ignored() {
        let vector = SampleVector::new(8);
        vector.add(2, 3, 0);
        vector.add(2, 3, -1);
        assert_eq!(vector.total_count(), 0);
    }
}
