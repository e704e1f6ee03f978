// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The sparse sample store used by [`crate::histogram::sparse`], for
//! histograms whose live value set is small relative to its possible
//! range.

use std::collections::HashMap;

use core::sync::atomic::{AtomicI64, Ordering};
use parking_lot::RwLock;

use crate::sample::Sample;

/// A map from exact sample value to running count, guarded by a single
/// reader-writer lock.
///
/// Unlike [`super::sample_vector::SampleVector`] there is no inline
/// fast path: a sparse histogram's whole reason for existing is that its
/// value set is not known ahead of time, so there is no fixed array to be
/// lock-free over. Reads (the common snapshot case) take the shared lock;
/// only a value never seen before takes the exclusive one.
#[derive(Debug, Default)]
pub struct SparseSampleMap {
    counts: RwLock<HashMap<Sample, i64>>,
    sum: AtomicI64,
    redundant_count: AtomicI64,
}

impl SparseSampleMap {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
            sum: AtomicI64::new(0),
            redundant_count: AtomicI64::new(0),
        }
    }

    pub fn sum(&self) -> i64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn redundant_count(&self) -> i64 {
        self.redundant_count.load(Ordering::Relaxed)
    }

    pub fn total_count(&self) -> i64 {
        self.counts.read().values().sum()
    }

    /// Records `count` occurrences of `value`.
    pub fn add(&self, value: Sample, count: i64) {
        if count <= 0 {
            return;
        }
        self.sum.fetch_add(value as i64 * count, Ordering::Relaxed);
        self.redundant_count.fetch_add(count, Ordering::Relaxed);

        *self.counts.write().entry(value).or_insert(0) += count;
    }

    /// A sorted `(value, count)` snapshot, for iteration by a caller
    /// building a delta or serializing for IPC.
    pub fn counts(&self) -> Vec<(Sample, i64)> {
        let mut entries: Vec<(Sample, i64)> = self.counts.read().iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_unstable_by_key(|(value, _)| *value);
        entries
    }

    /// Subtracts another map's counts from this one in place, used when
    /// computing an unlogged-sample delta.
    pub fn subtract_from(&self, other_counts: &[(Sample, i64)], other_sum: i64, other_redundant_count: i64) {
        let mut counts = self.counts.write();
        for (value, delta) in other_counts {
            let entry = counts.entry(*value).or_insert(0);
            *entry -= delta;
        }
        counts.retain(|_, count| *count != 0);
        drop(counts);
        self.sum.fetch_sub(other_sum, Ordering::Relaxed);
        self.redundant_count.fetch_sub(other_redundant_count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_distinct_values_independently() {
        let map = SparseSampleMap::new();
        map.add(5, 1);
        map.add(5, 1);
        map.add(1000, 1);
        assert_eq!(map.counts(), vec![(5, 2), (1000, 1)]);
        assert_eq!(map.sum(), 5 + 5 + 1000);
        assert_eq!(map.total_count(), 3);
    }

    #[test]
    fn concurrent_adds_to_the_same_key_are_not_lost() {
        use std::sync::Arc;
        use std::thread;

        let map = Arc::new(SparseSampleMap::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    map.add(42, 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.counts(), vec![(42, 800)]);
    }

    #[test]
    fn subtract_removes_zeroed_entries() {
        let map = SparseSampleMap::new();
        map.add(5, 3);
        map.subtract_from(&[(5, 3)], 15, 3);
        assert_eq!(map.counts(), vec![]);
    }
}
