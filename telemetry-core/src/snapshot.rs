// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The delta snapshot engine: extracts unlogged samples from a batch of
//! histograms, validates their integrity, and hands survivors to an
//! external flattener.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CorruptionError, Error};
use crate::histogram::Histogram;
use crate::sample_store::Snapshot;

/// Count mismatches up to this absolute difference between
/// `redundant_count` and the bucket-count total are tolerated as ordinary
/// races between concurrent recorders and a concurrent snapshot, rather
/// than reported as corruption.
pub const COMMON_RACE_BASED_COUNT_MISMATCH: i64 = 5;

/// The external sink that receives validated deltas during a collection
/// pass. Called from the snapshotting thread; implementations must not
/// re-enter the engine for the same histogram during the call.
pub trait Flattener {
    fn record_delta(&mut self, histogram: &Histogram, samples: &Snapshot);
}

/// The result of one [`SnapshotEngine::prepare_deltas`] pass.
#[derive(Debug, Clone, Default)]
pub struct PrepareDeltasReport {
    pub transaction_id: u64,
    /// `(name_hash, error)` pairs for checksum/ordering corruption. Fatal
    /// per §7, but this crate does not abort the host process on the
    /// engine's behalf; see [`assert_not_corrupt`] for an opt-in helper
    /// that does.
    pub fatal_corruptions: Vec<(u64, CorruptionError)>,
    /// `(name_hash, error)` pairs for count-mismatch corruption that was
    /// reported (first occurrence for that histogram) and whose delta was
    /// therefore discarded.
    pub reported_count_errors: Vec<(u64, CorruptionError)>,
}

/// Aborts the process if `report` contains any fatal corruption,
/// mirroring the original implementation's behavior. Library code never
/// calls this itself; a binary opts in explicitly.
pub fn assert_not_corrupt(report: &PrepareDeltasReport) {
    if !report.fatal_corruptions.is_empty() {
        log::error!("fatal histogram corruption detected: {:?}", report.fatal_corruptions);
        std::process::abort();
    }
}

/// Computes the classification(s) of integrity problems found in `delta`,
/// per `FindCorruption`.
pub fn find_corruption(histogram: &Histogram, delta: &Snapshot) -> Vec<CorruptionError> {
    let mut found = Vec::new();

    if let Some(ranges) = histogram.ranges() {
        if !ranges.is_monotonic() {
            found.push(CorruptionError::BucketOrder);
        }
        if !ranges.has_valid_checksum() {
            found.push(CorruptionError::RangeChecksum);
        }
    }

    let total = delta.total_count();
    let diff = delta.redundant_count - total;
    if diff.abs() > COMMON_RACE_BASED_COUNT_MISMATCH {
        found.push(if diff > 0 { CorruptionError::CountHigh } else { CorruptionError::CountLow });
    }

    found
}

/// Computes deltas for a batch of histograms, validates them, and feeds
/// survivors to a [`Flattener`]; also supports the two-phase
/// snapshot/mark-logged variant used when a caller needs to inspect a
/// delta before committing to it.
pub struct SnapshotEngine {
    is_active: AtomicBool,
    transaction_id: AtomicU64,
    inconsistencies_seen: Mutex<HashMap<u64, u8>>,
    pending_unlogged: Mutex<HashMap<u64, Snapshot>>,
}

impl Default for SnapshotEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEngine {
    pub fn new() -> Self {
        Self {
            is_active: AtomicBool::new(false),
            transaction_id: AtomicU64::new(0),
            inconsistencies_seen: Mutex::new(HashMap::new()),
            pending_unlogged: Mutex::new(HashMap::new()),
        }
    }

    fn enter(&self) -> Result<(), Error> {
        self.is_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::SnapshotAlreadyActive)
    }

    fn exit(&self) {
        self.is_active.store(false, Ordering::Release);
    }

    fn next_transaction_id(&self) -> u64 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Applies `flags_to_set`, skips histograms missing `required_flags`,
    /// and for the rest calls `SnapshotDelta`, validates it, and forwards
    /// it to `sink` unless it is empty or corrupt.
    pub fn prepare_deltas(
        &self,
        histograms: &[Arc<Histogram>],
        flags_to_set: u32,
        required_flags: u32,
        sink: &mut dyn Flattener,
    ) -> Result<PrepareDeltasReport, Error> {
        self.enter()?;

        let mut report = PrepareDeltasReport::default();
        for histogram in histograms {
            histogram.flags().set_all(flags_to_set);
            if !histogram.flags().has_all(required_flags) {
                continue;
            }

            let delta = histogram.snapshot_delta();
            let corruptions = find_corruption(histogram, &delta);
            if corruptions.iter().any(|c| c.is_fatal()) {
                for corruption in corruptions.iter().filter(|c| c.is_fatal()) {
                    report.fatal_corruptions.push((histogram.name_hash(), *corruption));
                }
                continue;
            }

            let mut discard = false;
            for corruption in &corruptions {
                if self.mark_inconsistency_seen(histogram.name_hash(), *corruption) {
                    log::error!(
                        "count mismatch in histogram {} ({:?}): redundant_count={} bucket_total={}",
                        histogram.name(),
                        corruption,
                        delta.redundant_count,
                        delta.total_count(),
                    );
                    report.reported_count_errors.push((histogram.name_hash(), *corruption));
                }
                discard = true;
            }
            if discard {
                continue;
            }

            if delta.total_count() > 0 {
                sink.record_delta(histogram, &delta);
            }
        }

        report.transaction_id = self.next_transaction_id();
        self.exit();
        Ok(report)
    }

    /// `true` the first time `error` is reported for `name_hash`; later
    /// calls for the same `(hash, error)` pair return `false` so repeat
    /// corruption is only logged once.
    fn mark_inconsistency_seen(&self, name_hash: u64, error: CorruptionError) -> bool {
        let mut seen = self.inconsistencies_seen.lock();
        let bits = seen.entry(name_hash).or_insert(0);
        let bit = error.bit();
        let first = *bits & bit == 0;
        *bits |= bit;
        first
    }

    /// Captures unlogged deltas without marking them logged. The caller
    /// must follow up with [`Self::mark_unlogged_as_logged`] for the same
    /// histograms before calling this again for any of them.
    pub fn snapshot_unlogged(&self, histograms: &[Arc<Histogram>]) -> Result<u64, Error> {
        self.enter()?;
        let result = (|| {
            let mut pending = self.pending_unlogged.lock();
            for histogram in histograms {
                if pending.contains_key(&histogram.name_hash()) {
                    return Err(Error::SnapshotAlreadyActive);
                }
            }
            for histogram in histograms {
                pending.insert(histogram.name_hash(), histogram.snapshot_unlogged());
            }
            Ok(())
        })();
        self.exit();
        result?;
        Ok(self.next_transaction_id())
    }

    /// Commits the snapshots captured by a prior [`Self::snapshot_unlogged`]
    /// call, subtracting each from its histogram's unlogged store and
    /// adding it to the logged store.
    pub fn mark_unlogged_as_logged(&self, histograms: &[Arc<Histogram>]) -> Result<(), Error> {
        let mut pending = self.pending_unlogged.lock();
        for histogram in histograms {
            let snapshot = pending
                .remove(&histogram.name_hash())
                .ok_or(Error::NoPendingUnloggedSnapshot)?;
            histogram.mark_samples_as_logged(&snapshot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::{exponential, HistogramType};
    use crate::registry::ScopedRegistry;

    struct RecordingSink {
        deltas: Vec<(String, i64)>,
    }

    impl Flattener for RecordingSink {
        fn record_delta(&mut self, histogram: &Histogram, samples: &Snapshot) {
            self.deltas.push((histogram.name().to_string(), samples.total_count()));
        }
    }

    #[test]
    fn prepare_deltas_forwards_non_empty_deltas_only() {
        let _scope = ScopedRegistry::new();
        let a = exponential::get("A", 1, 64, 8);
        let b = exponential::get("B", 1, 64, 8);
        a.add(3);

        let engine = SnapshotEngine::new();
        let mut sink = RecordingSink { deltas: Vec::new() };
        let report = engine.prepare_deltas(&[a, b], 0, 0, &mut sink).unwrap();

        assert_eq!(sink.deltas, vec![("A".to_string(), 1)]);
        assert!(report.fatal_corruptions.is_empty());
        assert_eq!(report.transaction_id, 1);
    }

    #[test]
    fn required_flags_skip_histograms_missing_them() {
        let _scope = ScopedRegistry::new();
        let histogram = exponential::get("A", 1, 64, 8);
        histogram.add(3);

        let engine = SnapshotEngine::new();
        let mut sink = RecordingSink { deltas: Vec::new() };
        engine
            .prepare_deltas(&[Arc::clone(&histogram)], 0, crate::flags::Flag::UmaTargeted as u32, &mut sink)
            .unwrap();
        assert!(sink.deltas.is_empty());

        histogram.flags().set(crate::flags::Flag::UmaTargeted);
        engine.prepare_deltas(&[histogram], 0, crate::flags::Flag::UmaTargeted as u32, &mut sink).unwrap();
        assert_eq!(sink.deltas.len(), 1);
    }

    #[test]
    fn snapshot_unlogged_then_mark_excludes_samples_from_later_deltas() {
        let _scope = ScopedRegistry::new();
        let histogram = exponential::get("A", 1, 64, 8);
        histogram.add(3);

        let engine = SnapshotEngine::new();
        engine.snapshot_unlogged(std::slice::from_ref(&histogram)).unwrap();
        engine.mark_unlogged_as_logged(std::slice::from_ref(&histogram)).unwrap();

        assert_eq!(histogram.snapshot_delta().total_count(), 0);
    }

    #[test]
    fn mark_unlogged_without_a_pending_snapshot_is_an_error() {
        let _scope = ScopedRegistry::new();
        let histogram = exponential::get("A", 1, 64, 8);
        let engine = SnapshotEngine::new();
        assert_eq!(
            engine.mark_unlogged_as_logged(std::slice::from_ref(&histogram)),
            Err(Error::NoPendingUnloggedSnapshot)
        );
    }

    #[test]
    fn count_mismatch_is_reported_once_then_suppressed() {
        let _scope = ScopedRegistry::new();
        let histogram = exponential::get("A", 1, 64, 8);
        histogram.add(3);
        let mut delta = histogram.snapshot_delta();
        delta.redundant_count += 100; // simulate a race-based mismatch well above tolerance

        assert_eq!(find_corruption(&histogram, &delta), vec![CorruptionError::CountHigh]);

        let engine = SnapshotEngine::new();
        assert!(engine.mark_inconsistency_seen(histogram.name_hash(), CorruptionError::CountHigh));
        assert!(!engine.mark_inconsistency_seen(histogram.name_hash(), CorruptionError::CountHigh));
    }

    #[test]
    fn tolerance_absorbs_small_mismatches() {
        let _scope = ScopedRegistry::new();
        let histogram = exponential::get("A", 1, 64, 8);
        histogram.add(3);
        let mut delta = histogram.snapshot_delta();
        delta.redundant_count += COMMON_RACE_BASED_COUNT_MISMATCH;
        assert!(find_corruption(&histogram, &delta).is_empty());
    }

    #[test]
    fn histogram_type_is_reachable_from_tests() {
        assert_eq!(HistogramType::Exponential, HistogramType::Exponential);
    }
}
