// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A shared, forward-only scan of every sparse-sample record in an
//! [`Allocator`] segment, fanned out to per-histogram views.
//!
//! A naive implementation would have every sparse histogram rescan the
//! whole segment from the start looking for its own records, which is
//! quadratic in the number of sparse histograms times the number of
//! samples. Instead one [`PersistentSparseHistogramDataManager`] per
//! segment does a single forward scan, bucketing records by owning
//! histogram id as it goes, and each histogram's
//! [`PersistentSampleMapRecords`] view only asks the manager for records
//! past the last one it has already consumed.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Error;
use crate::sample::Sample;

use super::record::{SparseSampleRecord, SPARSE_SAMPLE_RECORD_TYPE_ID};
use super::{Allocator, Reference, NULL_REFERENCE};

struct Inner {
    last_scanned: Reference,
    by_owner: HashMap<u64, Vec<Reference>>,
}

/// Owns the single forward scan of a segment's sparse-sample records,
/// shared by every sparse histogram materialized from it.
pub struct PersistentSparseHistogramDataManager<'a> {
    allocator: &'a dyn Allocator,
    inner: Mutex<Inner>,
}

impl<'a> PersistentSparseHistogramDataManager<'a> {
    pub fn new(allocator: &'a dyn Allocator) -> Self {
        Self { allocator, inner: Mutex::new(Inner { last_scanned: NULL_REFERENCE, by_owner: HashMap::new() }) }
    }

    pub fn allocator(&self) -> &'a dyn Allocator {
        self.allocator
    }

    /// Advances the shared scan, if another view has not already done so
    /// since the caller last asked, then returns every record currently
    /// known for `owner_id`.
    fn records_for(&self, owner_id: u64) -> Vec<Reference> {
        let mut inner = self.inner.lock();
        let new_references = self.allocator.iter_from(inner.last_scanned);
        for reference in new_references {
            if self.allocator.type_id(reference) == Some(SPARSE_SAMPLE_RECORD_TYPE_ID) {
                if let Some(record) = SparseSampleRecord::at(self.allocator, reference) {
                    inner.by_owner.entry(record.owner_id()).or_default().push(reference);
                }
            }
            inner.last_scanned = reference;
        }
        inner.by_owner.get(&owner_id).cloned().unwrap_or_default()
    }

    /// Creates a view scoped to one histogram's records.
    pub fn records_for_owner<'b>(&'b self, owner_id: u64) -> PersistentSampleMapRecords<'b, 'a> {
        PersistentSampleMapRecords { manager: self, owner_id, seen: Mutex::new(0), by_value: Mutex::new(HashMap::new()) }
    }
}

/// One histogram's view over its manager's shared scan: every call to
/// [`Self::get_next_records`] returns only the records that have arrived
/// since the previous call.
pub struct PersistentSampleMapRecords<'b, 'a: 'b> {
    manager: &'b PersistentSparseHistogramDataManager<'a>,
    owner_id: u64,
    seen: Mutex<usize>,
    by_value: Mutex<HashMap<Sample, Reference>>,
}

impl<'b, 'a: 'b> PersistentSampleMapRecords<'b, 'a> {
    pub fn owner_id(&self) -> u64 {
        self.owner_id
    }

    /// Records for this owner that have not yet been handed to the
    /// caller. Safe to call repeatedly as more processes/threads append
    /// records; each call only returns the incremental tail.
    pub fn get_next_records(&self) -> Vec<Reference> {
        let all = self.manager.records_for(self.owner_id);
        let mut seen = self.seen.lock();
        let fresh = if *seen < all.len() { all[*seen..].to_vec() } else { Vec::new() };
        *seen = all.len();
        fresh
    }

    fn refresh_value_index(&self) {
        let fresh = self.get_next_records();
        if fresh.is_empty() {
            return;
        }
        let mut by_value = self.by_value.lock();
        for reference in fresh {
            if let Some(record) = SparseSampleRecord::at(self.manager.allocator(), reference) {
                by_value.entry(record.value()).or_insert(reference);
            }
        }
    }

    /// Folds `count` into this histogram's record for `value`, creating
    /// a fresh record the first time `value` is seen. Mirrors
    /// `PersistentSampleMap::GetOrCreate` on the write side: later
    /// accumulations into an existing value reuse the same record rather
    /// than appending a new one for every sample.
    pub fn add(&self, value: Sample, count: i64) -> Result<(), Error> {
        self.refresh_value_index();
        if let Some(reference) = self.by_value.lock().get(&value).copied() {
            if let Some(record) = SparseSampleRecord::at(self.manager.allocator(), reference) {
                record.fetch_add_count(count);
                return Ok(());
            }
        }
        let reference = self.create_new(value)?;
        if let Some(record) = SparseSampleRecord::at(self.manager.allocator(), reference) {
            record.fetch_add_count(count);
        }
        self.by_value.lock().entry(value).or_insert(reference);
        Ok(())
    }

    /// Allocates a brand-new, zero-count sample record for `value` owned
    /// by this histogram and commits it so every peer's next scan
    /// observes it. Prefer [`Self::add`] for normal recording; this is
    /// exposed directly for tests and for callers that manage their own
    /// value index.
    pub fn create_new(&self, value: Sample) -> Result<Reference, Error> {
        let record = SparseSampleRecord::create(self.manager.allocator(), self.owner_id, value)?;
        self.manager.allocator().make_iterable(record.reference());
        Ok(record.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistent::test_support::HeapAllocator;

    #[test]
    fn records_are_grouped_by_owner_and_returned_incrementally() {
        let allocator = HeapAllocator::new(4096);
        let manager = PersistentSparseHistogramDataManager::new(&allocator);

        let a = manager.records_for_owner(1);
        let b = manager.records_for_owner(2);

        a.create_new(10).unwrap();
        b.create_new(99).unwrap();
        a.create_new(20).unwrap();

        let a_records = a.get_next_records();
        assert_eq!(a_records.len(), 2);
        let values: Vec<Sample> = a_records
            .iter()
            .map(|r| SparseSampleRecord::at(&allocator, *r).unwrap().value())
            .collect();
        assert_eq!(values, vec![10, 20]);

        let b_records = b.get_next_records();
        assert_eq!(b_records.len(), 1);
        assert_eq!(SparseSampleRecord::at(&allocator, b_records[0]).unwrap().value(), 99);

        // A second call with no new records returns nothing further.
        assert!(a.get_next_records().is_empty());

        a.create_new(30).unwrap();
        assert_eq!(a.get_next_records().len(), 1);
    }

    #[test]
    fn add_reuses_the_record_for_a_repeated_value() {
        let allocator = HeapAllocator::new(4096);
        let manager = PersistentSparseHistogramDataManager::new(&allocator);
        let owner = manager.records_for_owner(7);

        owner.add(42, 3).unwrap();
        owner.add(42, 2).unwrap();
        owner.add(99, 1).unwrap();

        let records = owner.get_next_records();
        assert_eq!(records.len(), 2);
        let counts: HashMap<Sample, i64> = records
            .iter()
            .map(|r| {
                let record = SparseSampleRecord::at(&allocator, *r).unwrap();
                (record.value(), record.count())
            })
            .collect();
        assert_eq!(counts.get(&42), Some(&5));
        assert_eq!(counts.get(&99), Some(&1));
    }
}
