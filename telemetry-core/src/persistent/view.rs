// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Ties the record layouts and the shared sparse-record scan together
//! into one entry point: discover histograms written into an
//! [`Allocator`] segment by a peer process and fold their counts into a
//! local [`StatisticsRegistry`].
//!
//! Histograms materialized this way are ordinary in-memory
//! [`Histogram`]s from that point on; this view does not keep them
//! continuously backed by the segment. Each [`Self::import_to_registry`]
//! call re-scans for newly committed records and newly arrived sparse
//! samples and folds only the incremental delta in, so repeated polling
//! (the collector's normal "import before each snapshot pass" use, per
//! the module the registry dispatch is built around) never double-counts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bucket_ranges::BucketRanges;
use crate::error::Error;
use crate::histogram::{ConstructionArgs, Histogram};
use crate::registry::StatisticsRegistry;
use crate::sample_store::{Counts, Snapshot};

use super::record::{read_ranges_record, HistogramRecord, HISTOGRAM_RECORD_TYPE_ID, RANGES_RECORD_TYPE_ID};
use super::sample_map::PersistentSparseHistogramDataManager;
use super::{Allocator, Reference, NULL_REFERENCE};

struct DenseProgress {
    last_counts: Vec<i64>,
    last_sum: i64,
    last_redundant_count: i64,
}

/// Per-owner tracked sparse records: each record's count cell can be
/// incremented in place by its owning process after this view has
/// already seen the record, so harvesting must re-read every tracked
/// record's current count every pass, not just newly discovered ones.
type SparseProgress = HashMap<Reference, i64>;

/// A read side over one [`Allocator`] segment: discovers histogram and
/// ranges records as they are committed and folds their counts into a
/// [`StatisticsRegistry`].
pub struct PersistentAllocatorView<'a> {
    allocator: &'a dyn Allocator,
    last_scanned: Mutex<Reference>,
    ranges_cache: Mutex<HashMap<Reference, Arc<BucketRanges>>>,
    dense_progress: Mutex<HashMap<u64, DenseProgress>>,
    sparse_progress: Mutex<HashMap<u64, SparseProgress>>,
    sparse_manager: PersistentSparseHistogramDataManager<'a>,
    last_created: Mutex<Option<Reference>>,
}

impl<'a> PersistentAllocatorView<'a> {
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self {
            allocator,
            last_scanned: Mutex::new(NULL_REFERENCE),
            ranges_cache: Mutex::new(HashMap::new()),
            dense_progress: Mutex::new(HashMap::new()),
            sparse_progress: Mutex::new(HashMap::new()),
            sparse_manager: PersistentSparseHistogramDataManager::new(allocator),
            last_created: Mutex::new(None),
        }
    }

    /// The most recently discovered histogram record, if any have been
    /// imported yet. Mirrors the upstream allocator's "last created"
    /// fast path for a caller that just wants to know whether anything
    /// new showed up.
    pub fn last_created(&self) -> Option<Reference> {
        *self.last_created.lock()
    }

    fn ranges_for(&self, reference: Reference) -> Option<Arc<BucketRanges>> {
        if reference == NULL_REFERENCE {
            return None;
        }
        let mut cache = self.ranges_cache.lock();
        if let Some(existing) = cache.get(&reference) {
            return Some(existing.clone());
        }
        if self.allocator.type_id(reference) != Some(RANGES_RECORD_TYPE_ID) {
            return None;
        }
        let ranges = Arc::new(read_ranges_record(self.allocator, reference).ok()?);
        cache.insert(reference, ranges.clone());
        Some(ranges)
    }

    /// Scans for histogram records committed since the last call and
    /// folds their current counts into `registry`, returning how many
    /// distinct histograms received a non-empty delta. Safe to call
    /// repeatedly (e.g. once per collection pass); each call only
    /// imports what changed since the previous one.
    ///
    /// Returns [`Error::AllocatorCorrupt`] without importing anything if
    /// the segment has failed its own integrity check (§6's `is_corrupt`);
    /// every record found by iteration past that point is untrustworthy.
    pub fn import_to_registry(&self, registry: &StatisticsRegistry) -> Result<usize, Error> {
        if self.allocator.is_corrupt() {
            return Err(Error::AllocatorCorrupt);
        }

        let mut updated = 0;
        let new_references = {
            let mut last_scanned = self.last_scanned.lock();
            let references = self.allocator.iter_from(*last_scanned);
            if let Some(last) = references.last() {
                *last_scanned = *last;
            }
            references
        };

        for reference in new_references {
            if self.allocator.type_id(reference) != Some(HISTOGRAM_RECORD_TYPE_ID) {
                continue;
            }
            let Some(record) = HistogramRecord::at(self.allocator, reference) else { continue };
            if self.import_one(registry, &record) {
                updated += 1;
            }
            *self.last_created.lock() = Some(reference);
        }
        Ok(updated)
    }

    fn import_one(&self, registry: &StatisticsRegistry, record: &HistogramRecord<'_>) -> bool {
        let name_len = self
            .allocator
            .bytes(record.reference())
            .map(|b| b.iter().skip(super::record::HISTOGRAM_RECORD_HEADER_SIZE).position(|b| *b == 0).unwrap_or(0))
            .unwrap_or(0);
        let name = record.name(name_len);
        if name.is_empty() {
            return false;
        }

        let ranges = self.ranges_for(record.ranges_ref());
        let args = match &ranges {
            Some(ranges) => ConstructionArgs::custom(ranges.ranges().to_vec()),
            None => ConstructionArgs::sparse(),
        };
        let histogram = registry.factory_get(&name, args, record.flags());

        match &ranges {
            Some(_) => self.import_dense(&histogram, record),
            None => self.import_sparse(&histogram, record),
        }
    }

    fn import_dense(&self, histogram: &Arc<Histogram>, record: &HistogramRecord<'_>) -> bool {
        let counts_ref = record.counts_ref();
        if counts_ref == NULL_REFERENCE {
            return false;
        }
        let bucket_count = record.bucket_count() as usize;
        let mut counts = Vec::with_capacity(bucket_count);
        for index in 0..bucket_count {
            let value = self
                .allocator
                .atomic_i32(counts_ref, index * 4)
                .map(|c| c.load(core::sync::atomic::Ordering::Relaxed) as i64)
                .unwrap_or(0);
            counts.push(value);
        }
        let sum = record.meta().sum();
        let redundant_count = record.meta().redundant_count() as i64;

        let mut progress = self.dense_progress.lock();
        let entry = progress.entry(record.name_hash()).or_insert_with(|| DenseProgress {
            last_counts: vec![0; bucket_count],
            last_sum: 0,
            last_redundant_count: 0,
        });

        let delta_counts: Vec<i64> = counts.iter().zip(&entry.last_counts).map(|(c, p)| c - p).collect();
        let delta_sum = sum - entry.last_sum;
        let delta_redundant = redundant_count - entry.last_redundant_count;
        entry.last_counts = counts;
        entry.last_sum = sum;
        entry.last_redundant_count = redundant_count;

        if delta_counts.iter().all(|c| *c == 0) && delta_sum == 0 && delta_redundant == 0 {
            return false;
        }

        let delta = Snapshot { sum: delta_sum, redundant_count: delta_redundant, counts: Counts::Dense(delta_counts) };
        histogram.add_samples(&delta).is_ok()
    }

    fn import_sparse(&self, histogram: &Arc<Histogram>, record: &HistogramRecord<'_>) -> bool {
        let owner_id = record.name_hash();
        let owner_view = self.sparse_manager.records_for_owner(owner_id);
        let new_references = owner_view.get_next_records();

        let mut progress = self.sparse_progress.lock();
        let tracked = progress.entry(owner_id).or_default();
        for reference in new_references {
            tracked.entry(reference).or_insert(0);
        }

        let mut counts = Vec::new();
        for (reference, last_count) in tracked.iter_mut() {
            let Some(sample) = super::record::SparseSampleRecord::at(self.allocator, *reference) else { continue };
            let current = sample.count();
            let delta = current - *last_count;
            if delta != 0 {
                counts.push((sample.value(), delta));
            }
            *last_count = current;
        }
        if counts.is_empty() {
            return false;
        }

        let delta = Snapshot { sum: 0, redundant_count: 0, counts: Counts::Sparse(counts) };
        histogram.add_samples(&delta).is_ok()
    }
}
