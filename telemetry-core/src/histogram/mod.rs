// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The histogram family: a tagged variant over the five concrete shapes
//! (exponential, linear, boolean, custom, sparse) plus a dummy no-op
//! variant, sharing one recording/snapshotting contract.
//!
//! Every family exposes `add`/`add_count`/`add_scaled` on the way in and
//! `snapshot_all`/`snapshot_unlogged`/`snapshot_delta`/
//! `snapshot_final_delta`/`mark_samples_as_logged` on the way out; a
//! `Histogram` closes over its variant once at construction and never
//! re-dispatches virtually after that.

pub mod boolean;
pub mod custom;
pub mod dummy;
pub mod exponential;
pub mod linear;
pub mod scaled_linear;
pub mod sparse;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bucket_ranges::BucketRanges;
use crate::error::Error;
use crate::flags::Flags;
use crate::hash::hash_name;
use crate::registry::observer::DispatchHandle;
use crate::sample::{clamp_sample, Sample};
use crate::sample_store::{Samples, Snapshot};

/// Which concrete family a [`Histogram`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistogramType {
    Exponential,
    Linear,
    Boolean,
    Custom,
    Sparse,
    Dummy,
}

/// The construction parameters `factory_get` compares to detect a
/// mismatched re-registration under the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructionArgs {
    pub kind: HistogramType,
    pub min: Sample,
    pub max: Sample,
    pub bucket_count: usize,
    pub custom_boundaries: Option<Vec<Sample>>,
}

impl ConstructionArgs {
    pub fn bucketed(kind: HistogramType, min: Sample, max: Sample, bucket_count: usize) -> Self {
        Self { kind, min, max, bucket_count, custom_boundaries: None }
    }

    pub fn custom(boundaries: Vec<Sample>) -> Self {
        Self {
            kind: HistogramType::Custom,
            min: 0,
            max: 0,
            bucket_count: 0,
            custom_boundaries: Some(boundaries),
        }
    }

    pub fn sparse() -> Self {
        Self { kind: HistogramType::Sparse, min: 0, max: 0, bucket_count: 0, custom_boundaries: None }
    }

    pub fn dummy() -> Self {
        Self { kind: HistogramType::Dummy, min: 0, max: 0, bucket_count: 0, custom_boundaries: None }
    }
}

/// A named histogram: a type tag, a flag bitset, an optional shared
/// [`BucketRanges`] (absent for sparse and dummy), and two sample stores
/// (`unlogged` and `logged`).
#[derive(Debug)]
pub struct Histogram {
    name: Arc<str>,
    name_hash: u64,
    construction_args: ConstructionArgs,
    flags: Flags,
    ranges: Option<Arc<BucketRanges>>,
    unlogged: Samples,
    logged: Samples,
    final_delta_taken: AtomicBool,
    dispatch: DispatchHandle,
}

impl Histogram {
    /// Builds a bucketed (exponential/linear/boolean/custom) histogram
    /// over a pre-built, already-canonicalized `ranges`.
    pub(crate) fn new_bucketed(
        name: impl Into<Arc<str>>,
        construction_args: ConstructionArgs,
        ranges: Arc<BucketRanges>,
        dispatch: DispatchHandle,
    ) -> Self {
        let name = name.into();
        let bucket_count = ranges.bucket_count();
        Self {
            name_hash: hash_name(&name),
            name,
            construction_args,
            flags: Flags::from_bits(Flags::NONE),
            ranges: Some(ranges),
            unlogged: Samples::Dense(crate::sample_store::SampleVector::new(bucket_count)),
            logged: Samples::Dense(crate::sample_store::SampleVector::new(bucket_count)),
            final_delta_taken: AtomicBool::new(false),
            dispatch,
        }
    }

    /// Builds a sparse histogram, which has no shared `BucketRanges`.
    pub(crate) fn new_sparse(name: impl Into<Arc<str>>, dispatch: DispatchHandle) -> Self {
        let name = name.into();
        Self {
            name_hash: hash_name(&name),
            name,
            construction_args: ConstructionArgs::sparse(),
            flags: Flags::from_bits(Flags::NONE),
            ranges: None,
            unlogged: Samples::Sparse(crate::sample_store::SparseSampleMap::new()),
            logged: Samples::Sparse(crate::sample_store::SparseSampleMap::new()),
            final_delta_taken: AtomicBool::new(false),
            dispatch,
        }
    }

    /// Builds the dummy histogram: every record operation is a no-op and
    /// every snapshot is empty.
    pub(crate) fn new_dummy(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        Self {
            name_hash: hash_name(&name),
            name,
            construction_args: ConstructionArgs::dummy(),
            flags: Flags::from_bits(Flags::NONE),
            ranges: None,
            unlogged: Samples::Sparse(crate::sample_store::SparseSampleMap::new()),
            logged: Samples::Sparse(crate::sample_store::SparseSampleMap::new()),
            final_delta_taken: AtomicBool::new(false),
            dispatch: DispatchHandle::noop(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    pub fn histogram_type(&self) -> HistogramType {
        self.construction_args.kind
    }

    pub fn construction_args(&self) -> &ConstructionArgs {
        &self.construction_args
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// The shared bucket layout, if this family has one (`None` for
    /// sparse and dummy).
    pub fn ranges(&self) -> Option<&Arc<BucketRanges>> {
        self.ranges.as_ref()
    }

    fn is_dummy(&self) -> bool {
        self.construction_args.kind == HistogramType::Dummy
    }

    fn bucket_index_for(&self, sample: Sample) -> Option<usize> {
        self.ranges.as_ref().map(|ranges| ranges.bucket_index(sample))
    }

    /// Adds one occurrence of `sample`.
    pub fn add(&self, sample: Sample) {
        // `Add` never fails in the original: count 1 is always positive.
        let _ = self.add_count(sample, 1);
    }

    /// Adds `count` occurrences of `sample`. `count` must be positive;
    /// `AddCount(_, 0)` and negative counts are rejected rather than
    /// silently accepted, matching the debug-assertion in the original.
    pub fn add_count(&self, sample: Sample, count: i64) -> Result<(), Error> {
        if count == 0 {
            return Ok(());
        }
        if count < 0 {
            return Err(Error::NonPositiveCount);
        }
        if self.is_dummy() {
            return Ok(());
        }

        let clamped = clamp_sample(sample as i64);
        match (&self.unlogged, self.bucket_index_for(clamped)) {
            (Samples::Dense(vector), Some(bucket_index)) => vector.add(bucket_index, clamped, count),
            (Samples::Sparse(map), None) => map.add(clamped, count),
            _ => unreachable!("a histogram's sample store shape always matches its ranges presence"),
        }

        // `notify` self-gates on `sample_callbacks_active()`, which covers
        // both the global observer and any per-hash ones; `CallbackExists`
        // only tracks the latter and must not be used to skip the former.
        self.dispatch.notify(&self.name, self.name_hash, clamped);

        Ok(())
    }

    /// Records `floor(count / scale)` directly and probabilistically
    /// rounds the remainder against a uniform `[0, scale)` draw, so that
    /// over many calls the reported total converges to `count / scale`.
    pub fn add_scaled(&self, sample: Sample, count: i64, scale: i64) -> Result<(), Error> {
        if scale <= 0 {
            return Err(Error::NonPositiveCount);
        }
        if count == 0 {
            return Ok(());
        }

        let whole = count / scale;
        let remainder = count % scale;
        let mut total = whole;
        if remainder != 0 {
            use rand::Rng;
            let draw = rand::thread_rng().gen_range(0..scale);
            if draw < remainder {
                total += 1;
            }
        }

        if total > 0 {
            self.add_count(sample, total)?;
        }
        Ok(())
    }

    /// Convenience wrapper fixing `scale` at 1000 (e.g. for
    /// per-millisecond-weighted byte counters).
    pub fn add_scaled_1000(&self, sample: Sample, count: i64) -> Result<(), Error> {
        self.add_scaled(sample, count, 1000)
    }

    /// Convenience wrapper fixing `scale` at 1024 (e.g. for byte counts
    /// reported in kibibytes).
    pub fn add_scaled_1024(&self, sample: Sample, count: i64) -> Result<(), Error> {
        self.add_scaled(sample, count, 1024)
    }

    /// An independent copy of every sample recorded so far (logged and
    /// unlogged combined).
    pub fn snapshot_all(&self) -> Snapshot {
        let unlogged = self.unlogged.snapshot();
        let logged = self.logged.snapshot();
        merge_snapshots(&unlogged, &logged)
    }

    /// An independent copy of the samples not yet accounted for by any
    /// prior [`Self::mark_samples_as_logged`] or [`Self::snapshot_delta`].
    pub fn snapshot_unlogged(&self) -> Snapshot {
        self.unlogged.snapshot()
    }

    /// Atomically extracts the unlogged samples into a fresh snapshot and
    /// folds them into the logged store, so the next call only sees
    /// samples recorded since.
    pub fn snapshot_delta(&self) -> Snapshot {
        let delta = self.unlogged.snapshot();
        // Best-effort: a concurrent `add` between the snapshot and the
        // subtract below lands in the *next* delta, never lost and never
        // double-counted, per the documented ordering guarantee.
        let _ = self.unlogged.subtract(&delta);
        let _ = self.logged.subtract(&Snapshot {
            sum: -delta.sum,
            redundant_count: -delta.redundant_count,
            counts: negate_counts(&delta.counts),
        });
        delta
    }

    /// Non-mutating variant of [`Self::snapshot_delta`]: returns the
    /// unlogged samples without transferring them to the logged store.
    /// May be called at most once per histogram.
    pub fn snapshot_final_delta(&self) -> Result<Snapshot, Error> {
        if self.final_delta_taken.swap(true, Ordering::AcqRel) {
            return Err(Error::FinalDeltaAlreadyTaken);
        }
        Ok(self.unlogged.snapshot())
    }

    /// Subtracts `samples` from the unlogged store and adds them to the
    /// logged store. Used together with [`Self::snapshot_unlogged`] when a
    /// caller needs to inspect a delta before committing to it.
    pub fn mark_samples_as_logged(&self, samples: &Snapshot) -> Result<(), Error> {
        self.unlogged.subtract(samples)?;
        let negated = Snapshot {
            sum: -samples.sum,
            redundant_count: -samples.redundant_count,
            counts: negate_counts(&samples.counts),
        };
        self.logged.subtract(&negated)
    }

    /// Folds a foreign delta, already extracted and validated elsewhere,
    /// into this histogram's unlogged store. Used by
    /// `persistent::PersistentAllocatorView` to harvest a peer process's
    /// counts into the local registry's copy of a shared histogram.
    pub(crate) fn add_samples(&self, delta: &Snapshot) -> Result<(), Error> {
        self.unlogged.merge(delta)
    }
}

fn negate_counts(counts: &crate::sample_store::Counts) -> crate::sample_store::Counts {
    match counts {
        crate::sample_store::Counts::Dense(values) => {
            crate::sample_store::Counts::Dense(values.iter().map(|v| -v).collect())
        }
        crate::sample_store::Counts::Sparse(values) => {
            crate::sample_store::Counts::Sparse(values.iter().map(|(k, v)| (*k, -v)).collect())
        }
    }
}

fn merge_snapshots(a: &Snapshot, b: &Snapshot) -> Snapshot {
    let counts = match (&a.counts, &b.counts) {
        (crate::sample_store::Counts::Dense(a), crate::sample_store::Counts::Dense(b)) => {
            crate::sample_store::Counts::Dense(a.iter().zip(b).map(|(x, y)| x + y).collect())
        }
        (crate::sample_store::Counts::Sparse(a), crate::sample_store::Counts::Sparse(b)) => {
            let mut merged: std::collections::HashMap<Sample, i64> = std::collections::HashMap::new();
            for (value, count) in a.iter().chain(b.iter()) {
                *merged.entry(*value).or_insert(0) += count;
            }
            let mut entries: Vec<(Sample, i64)> = merged.into_iter().filter(|(_, c)| *c != 0).collect();
            entries.sort_unstable_by_key(|(value, _)| *value);
            crate::sample_store::Counts::Sparse(entries)
        }
        _ => unreachable!("unlogged and logged stores of the same histogram always share a shape"),
    };
    Snapshot {
        sum: a.sum + b.sum,
        redundant_count: a.redundant_count + b.redundant_count,
        counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::observer::DispatchHandle;

    fn exponential(name: &str, min: Sample, max: Sample, bucket_count: usize) -> Histogram {
        let ranges = Arc::new(BucketRanges::exponential(bucket_count, min, max));
        Histogram::new_bucketed(
            name,
            ConstructionArgs::bucketed(HistogramType::Exponential, min, max, bucket_count),
            ranges,
            DispatchHandle::noop(),
        )
    }

    #[test]
    fn latency_scenario_matches_worked_example() {
        let histogram = exponential("Latency", 1, 64, 8);
        histogram.add(3);
        histogram.add(10);
        histogram.add(50);

        let delta = histogram.snapshot_delta();
        assert_eq!(delta.total_count(), 3);
        assert_eq!(
            delta.counts,
            crate::sample_store::Counts::Dense(vec![0, 0, 1, 0, 1, 0, 1, 0])
        );

        let second = histogram.snapshot_delta();
        assert_eq!(second.total_count(), 0);
    }

    #[test]
    fn mark_samples_as_logged_excludes_them_from_the_next_delta() {
        let histogram = exponential("Latency", 1, 64, 8);
        histogram.add(3);
        let unlogged = histogram.snapshot_unlogged();
        histogram.mark_samples_as_logged(&unlogged).unwrap();

        let delta = histogram.snapshot_delta();
        assert_eq!(delta.total_count(), 0);
    }

    #[test]
    fn snapshot_final_delta_is_at_most_once() {
        let histogram = exponential("Latency", 1, 64, 8);
        histogram.add(3);
        assert!(histogram.snapshot_final_delta().is_ok());
        assert_eq!(histogram.snapshot_final_delta(), Err(Error::FinalDeltaAlreadyTaken));
    }

    #[test]
    fn add_count_rejects_negative_and_ignores_zero() {
        let histogram = exponential("Latency", 1, 64, 8);
        assert_eq!(histogram.add_count(3, -1), Err(Error::NonPositiveCount));
        assert!(histogram.add_count(3, 0).is_ok());
        assert_eq!(histogram.snapshot_all().total_count(), 0);
    }

    #[test]
    fn snapshot_all_combines_logged_and_unlogged() {
        let histogram = exponential("Latency", 1, 64, 8);
        histogram.add(3);
        histogram.snapshot_delta();
        histogram.add(10);
        assert_eq!(histogram.snapshot_all().total_count(), 2);
    }

    #[test]
    fn add_scaled_converges_to_count_over_scale() {
        let histogram = exponential("Bytes", 1, 1_000_000, 50);
        for _ in 0..10_000 {
            histogram.add_scaled(100, 333, 1000).unwrap();
        }
        let total = histogram.snapshot_all().total_count();
        // Expected ~3330; allow generous slack for the random rounding.
        assert!((3000..3700).contains(&total), "total was {total}");
    }
}
