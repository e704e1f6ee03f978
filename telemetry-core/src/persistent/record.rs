// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Bit-exact layouts for the records this crate writes into a shared
//! [`super::Allocator`] segment, per §6. Each layout is a thin "view" over
//! an allocator reference rather than an owned struct, since the bytes
//! actually live in the (possibly cross-process) segment.
//!
//! Every layout carries a `*_RECORD_TYPE_ID` that must be bumped whenever
//! its binary shape changes; a record read back under an id this binary
//! does not recognize is ignored (`Error::RecordLayoutMismatch`) rather
//! than trusted.

use core::sync::atomic::Ordering;

use crate::error::Error;
use crate::sample::Sample;

use super::{Allocator, Reference, NULL_REFERENCE};

/// Type id for a [`HistogramRecord`]. Bump on any layout change.
pub const HISTOGRAM_RECORD_TYPE_ID: u32 = 1;
/// Type id for a [`SparseSampleRecord`].
pub const SPARSE_SAMPLE_RECORD_TYPE_ID: u32 = 2;
/// Type id for a bucket-ranges record (see [`super::view::PersistentAllocatorView`]).
pub const RANGES_RECORD_TYPE_ID: u32 = 3;
/// Type id for a raw dense-counts array (no header of its own; its length
/// is implied by the owning histogram's `bucket_count`).
pub const DENSE_COUNTS_TYPE_ID: u32 = 4;

/// `{reserved: u64, sum: i64, redundant_count: atomic<i32>, single_sample: atomic<u32>}`.
/// The leading 8 bytes are reserved (always zero) rather than reclaimed,
/// so this layout's size matches the standalone sparse record below and
/// has room to grow without another type-id bump.
pub const SAMPLE_STORE_META_SIZE: usize = 24;
const META_SUM_OFFSET: usize = 8;
const META_REDUNDANT_COUNT_OFFSET: usize = 16;
const META_SINGLE_SAMPLE_OFFSET: usize = 20;

/// `{id: u64, value: i32, count: atomic<i32>}`
pub const SPARSE_SAMPLE_RECORD_SIZE: usize = 16;
const SPARSE_ID_OFFSET: usize = 0;
const SPARSE_VALUE_OFFSET: usize = 8;
const SPARSE_COUNT_OFFSET: usize = 12;

const NAME_HASH_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 8;
const MIN_OFFSET: usize = 12;
const MAX_OFFSET: usize = 16;
const BUCKET_COUNT_OFFSET: usize = 20;
const RANGES_REF_OFFSET: usize = 24;
const COUNTS_REF_OFFSET: usize = 28;
const LOGGED_COUNTS_REF_OFFSET: usize = 32;
const META_OFFSET: usize = 36;
const LOGGED_META_OFFSET: usize = META_OFFSET + SAMPLE_STORE_META_SIZE;
/// Offset of the NUL-terminated name bytes that follow the fixed header.
pub const HISTOGRAM_RECORD_HEADER_SIZE: usize = LOGGED_META_OFFSET + SAMPLE_STORE_META_SIZE;

const RANGES_CHECKSUM_OFFSET: usize = 0;
const RANGES_COUNT_OFFSET: usize = 4;
const RANGES_VALUES_OFFSET: usize = 8;

/// A read/write view over a [`SampleStoreMeta`] blob embedded at `base`
/// within some other record (a [`HistogramRecord`]'s `meta`/`logged_meta`).
pub struct SampleStoreMeta<'a> {
    allocator: &'a dyn Allocator,
    reference: Reference,
    base: usize,
}

impl<'a> SampleStoreMeta<'a> {
    fn new(allocator: &'a dyn Allocator, reference: Reference, base: usize) -> Self {
        Self { allocator, reference, base }
    }

    pub fn sum(&self) -> i64 {
        self.allocator
            .atomic_i64(self.reference, self.base + META_SUM_OFFSET)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn fetch_add_sum(&self, delta: i64) {
        if let Some(cell) = self.allocator.atomic_i64(self.reference, self.base + META_SUM_OFFSET) {
            cell.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn redundant_count(&self) -> i32 {
        self.allocator
            .atomic_i32(self.reference, self.base + META_REDUNDANT_COUNT_OFFSET)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn fetch_add_redundant_count(&self, delta: i32) {
        if let Some(cell) = self.allocator.atomic_i32(self.reference, self.base + META_REDUNDANT_COUNT_OFFSET) {
            cell.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn single_sample_bits(&self) -> u32 {
        self.allocator
            .atomic_u32(self.reference, self.base + META_SINGLE_SAMPLE_OFFSET)
            .map(|cell| cell.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn single_sample_cell(&self) -> Option<&'a core::sync::atomic::AtomicU32> {
        self.allocator.atomic_u32(self.reference, self.base + META_SINGLE_SAMPLE_OFFSET)
    }
}

/// A view over a histogram record's fixed header. `ranges_ref`,
/// `counts_ref`, and `logged_counts_ref` are [`NULL_REFERENCE`] until the
/// corresponding blob has actually been written.
pub struct HistogramRecord<'a> {
    allocator: &'a dyn Allocator,
    reference: Reference,
}

impl<'a> HistogramRecord<'a> {
    /// Wraps an existing, already-written record for reading/updating.
    /// Returns `None` if `reference` does not name a live
    /// [`HISTOGRAM_RECORD_TYPE_ID`] allocation.
    pub fn at(allocator: &'a dyn Allocator, reference: Reference) -> Option<Self> {
        if allocator.type_id(reference)? != HISTOGRAM_RECORD_TYPE_ID {
            return None;
        }
        Some(Self { allocator, reference })
    }

    /// Allocates and writes a brand-new record. The caller must call
    /// [`super::Allocator::make_iterable`] once the record (and, for
    /// bucketed histograms, its shared ranges) is fully initialized, so
    /// peers never observe a partially-written record.
    pub fn create(
        allocator: &'a dyn Allocator,
        name: &str,
        name_hash: u64,
        min: Sample,
        max: Sample,
        bucket_count: u32,
        ranges_ref: Reference,
    ) -> Result<Self, Error> {
        let size = HISTOGRAM_RECORD_HEADER_SIZE + name.len() + 1;
        let reference = allocator.allocate(HISTOGRAM_RECORD_TYPE_ID, size).ok_or(Error::AllocatorFull)?;

        // The allocator hands back zeroed memory; we only need to write
        // the fields that must not be zero.
        let record = Self { allocator, reference };
        record.write_header_field(NAME_HASH_OFFSET, &name_hash.to_le_bytes());
        record.write_header_field(MIN_OFFSET, &min.to_le_bytes());
        record.write_header_field(MAX_OFFSET, &max.to_le_bytes());
        record.write_header_field(BUCKET_COUNT_OFFSET, &bucket_count.to_le_bytes());
        record.write_header_field(RANGES_REF_OFFSET, &ranges_ref.to_le_bytes());
        record.write_name(name);
        Ok(record)
    }

    fn write_header_field(&self, offset: usize, value: &[u8]) {
        // The test/reference allocator exposes only atomic accessors for
        // 4/8-byte fields plus a read-only byte view; header fields that
        // are written exactly once at creation (before `make_iterable`)
        // go through the 4-byte atomic accessor regardless of their
        // "real" mutability, since that is the only write path the
        // `Allocator` trait exposes.
        match value.len() {
            4 => {
                if let Some(cell) = self.allocator.atomic_u32(self.reference, offset) {
                    cell.store(u32::from_le_bytes(value.try_into().unwrap()), Ordering::Relaxed);
                }
            }
            8 => {
                if let Some(cell) = self.allocator.atomic_i64(self.reference, offset) {
                    cell.store(i64::from_le_bytes(value.try_into().unwrap()), Ordering::Relaxed);
                }
            }
            _ => unreachable!("header fields are 4 or 8 bytes"),
        }
    }

    fn write_name(&self, name: &str) {
        // Names are opaque bytes to the allocator; since the trait has no
        // raw mutable byte accessor (every write goes through an atomic
        // cell), encode the name across 4-byte atomic cells.
        let bytes = name.as_bytes();
        let mut offset = HISTOGRAM_RECORD_HEADER_SIZE;
        let mut chunk = [0u8; 4];
        for word in bytes.chunks(4) {
            chunk = [0u8; 4];
            chunk[..word.len()].copy_from_slice(word);
            if let Some(cell) = self.allocator.atomic_u32(self.reference, offset) {
                cell.store(u32::from_le_bytes(chunk), Ordering::Relaxed);
            }
            offset += 4;
        }
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn name_hash(&self) -> u64 {
        self.read_u64(NAME_HASH_OFFSET)
    }

    pub fn min(&self) -> Sample {
        self.read_u32(MIN_OFFSET) as Sample
    }

    pub fn max(&self) -> Sample {
        self.read_u32(MAX_OFFSET) as Sample
    }

    pub fn bucket_count(&self) -> u32 {
        self.read_u32(BUCKET_COUNT_OFFSET)
    }

    pub fn flags(&self) -> u32 {
        self.allocator
            .atomic_u32(self.reference, FLAGS_OFFSET)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn set_flags(&self, flags: u32) {
        if let Some(cell) = self.allocator.atomic_u32(self.reference, FLAGS_OFFSET) {
            cell.store(flags, Ordering::Release);
        }
    }

    pub fn ranges_ref(&self) -> Reference {
        self.read_u32(RANGES_REF_OFFSET)
    }

    pub fn counts_ref(&self) -> Reference {
        self.allocator
            .atomic_u32(self.reference, COUNTS_REF_OFFSET)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(NULL_REFERENCE)
    }

    pub fn logged_counts_ref(&self) -> Reference {
        self.allocator
            .atomic_u32(self.reference, LOGGED_COUNTS_REF_OFFSET)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(NULL_REFERENCE)
    }

    /// Installs `counts_ref`/`logged_counts_ref` the first time a dense
    /// histogram actually needs its counts array; a no-op if another
    /// thread (or process) already installed one.
    pub fn install_counts_ref(&self, logged: bool, reference: Reference) -> Reference {
        let offset = if logged { LOGGED_COUNTS_REF_OFFSET } else { COUNTS_REF_OFFSET };
        match self.allocator.atomic_u32(self.reference, offset) {
            Some(cell) => match cell.compare_exchange(
                NULL_REFERENCE,
                reference,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => reference,
                Err(existing) => existing,
            },
            None => NULL_REFERENCE,
        }
    }

    pub fn name(&self, name_len: usize) -> String {
        let Some(bytes) = self.allocator.bytes(self.reference) else {
            return String::new();
        };
        let start = HISTOGRAM_RECORD_HEADER_SIZE;
        let end = (start + name_len).min(bytes.len());
        String::from_utf8_lossy(&bytes[start..end]).into_owned()
    }

    pub fn meta(&self) -> SampleStoreMeta<'a> {
        SampleStoreMeta::new(self.allocator, self.reference, META_OFFSET)
    }

    pub fn logged_meta(&self) -> SampleStoreMeta<'a> {
        SampleStoreMeta::new(self.allocator, self.reference, LOGGED_META_OFFSET)
    }

    fn read_u32(&self, offset: usize) -> u32 {
        self.allocator
            .bytes(self.reference)
            .and_then(|b| b.get(offset..offset + 4))
            .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
            .unwrap_or(0)
    }

    fn read_u64(&self, offset: usize) -> u64 {
        self.allocator
            .bytes(self.reference)
            .and_then(|b| b.get(offset..offset + 8))
            .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
            .unwrap_or(0)
    }
}

/// A view over one sparse-histogram sample record: `(owning histogram id,
/// sample value, atomic count)`.
pub struct SparseSampleRecord<'a> {
    allocator: &'a dyn Allocator,
    reference: Reference,
}

impl<'a> SparseSampleRecord<'a> {
    pub fn at(allocator: &'a dyn Allocator, reference: Reference) -> Option<Self> {
        if allocator.type_id(reference)? != SPARSE_SAMPLE_RECORD_TYPE_ID {
            return None;
        }
        Some(Self { allocator, reference })
    }

    pub fn create(allocator: &'a dyn Allocator, owner_id: u64, value: Sample) -> Result<Self, Error> {
        let reference = allocator
            .allocate(SPARSE_SAMPLE_RECORD_TYPE_ID, SPARSE_SAMPLE_RECORD_SIZE)
            .ok_or(Error::AllocatorFull)?;
        let record = Self { allocator, reference };
        if let Some(cell) = allocator.atomic_i64(reference, SPARSE_ID_OFFSET) {
            cell.store(owner_id as i64, Ordering::Relaxed);
        }
        if let Some(cell) = allocator.atomic_i32(reference, SPARSE_VALUE_OFFSET) {
            cell.store(value, Ordering::Relaxed);
        }
        Ok(record)
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn owner_id(&self) -> u64 {
        self.allocator
            .atomic_i64(self.reference, SPARSE_ID_OFFSET)
            .map(|c| c.load(Ordering::Relaxed) as u64)
            .unwrap_or(0)
    }

    pub fn value(&self) -> Sample {
        self.allocator
            .atomic_i32(self.reference, SPARSE_VALUE_OFFSET)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn count(&self) -> i64 {
        self.allocator
            .atomic_i32(self.reference, SPARSE_COUNT_OFFSET)
            .map(|c| c.load(Ordering::Relaxed) as i64)
            .unwrap_or(0)
    }

    pub fn fetch_add_count(&self, delta: i64) {
        if let Some(cell) = self.allocator.atomic_i32(self.reference, SPARSE_COUNT_OFFSET) {
            cell.fetch_add(delta as i32, Ordering::Relaxed);
        }
    }
}

/// Writes a [`crate::bucket_ranges::BucketRanges`] into a fresh allocator
/// record: `{checksum: u32, count: u32, ranges: [i32; count + 1]}`.
pub fn write_ranges_record(allocator: &dyn Allocator, ranges: &crate::bucket_ranges::BucketRanges) -> Result<Reference, Error> {
    let values = ranges.ranges();
    let size = RANGES_VALUES_OFFSET + values.len() * 4;
    let reference = allocator.allocate(RANGES_RECORD_TYPE_ID, size).ok_or(Error::AllocatorFull)?;

    if let Some(cell) = allocator.atomic_u32(reference, RANGES_CHECKSUM_OFFSET) {
        cell.store(ranges.checksum(), Ordering::Relaxed);
    }
    if let Some(cell) = allocator.atomic_u32(reference, RANGES_COUNT_OFFSET) {
        cell.store(values.len() as u32, Ordering::Relaxed);
    }
    for (i, value) in values.iter().enumerate() {
        if let Some(cell) = allocator.atomic_i32(reference, RANGES_VALUES_OFFSET + i * 4) {
            cell.store(*value, Ordering::Relaxed);
        }
    }
    Ok(reference)
}

/// Reads a ranges record back, recomputing (not trusting) its checksum,
/// matching [`crate::bucket_ranges::BucketRanges::from_ranges`].
pub fn read_ranges_record(allocator: &dyn Allocator, reference: Reference) -> Result<crate::bucket_ranges::BucketRanges, Error> {
    if allocator.type_id(reference) != Some(RANGES_RECORD_TYPE_ID) {
        return Err(Error::RecordLayoutMismatch);
    }
    let count = allocator
        .atomic_u32(reference, RANGES_COUNT_OFFSET)
        .map(|c| c.load(Ordering::Relaxed))
        .ok_or(Error::RecordLayoutMismatch)? as usize;
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let value = allocator
            .atomic_i32(reference, RANGES_VALUES_OFFSET + i * 4)
            .map(|c| c.load(Ordering::Relaxed))
            .ok_or(Error::RecordLayoutMismatch)?;
        values.push(value);
    }
    crate::bucket_ranges::BucketRanges::from_ranges(values).map_err(|_| Error::RecordLayoutMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistent::test_support::HeapAllocator;

    #[test]
    fn histogram_record_round_trips_its_fixed_fields() {
        let allocator = HeapAllocator::new(4096);
        let record = HistogramRecord::create(&allocator, "Latency", 0xABCD, 1, 64, 8, NULL_REFERENCE).unwrap();
        assert_eq!(record.name_hash(), 0xABCD);
        assert_eq!(record.min(), 1);
        assert_eq!(record.max(), 64);
        assert_eq!(record.bucket_count(), 8);
        assert_eq!(record.name(7), "Latency");
    }

    #[test]
    fn sparse_sample_record_tracks_owner_value_and_count() {
        let allocator = HeapAllocator::new(4096);
        let record = SparseSampleRecord::create(&allocator, 0xF00D, 42).unwrap();
        record.fetch_add_count(5);
        record.fetch_add_count(3);
        assert_eq!(record.owner_id(), 0xF00D);
        assert_eq!(record.value(), 42);
        assert_eq!(record.count(), 8);
    }

    #[test]
    fn ranges_record_round_trips_through_write_and_read() {
        let allocator = HeapAllocator::new(4096);
        let ranges = crate::bucket_ranges::BucketRanges::linear(8, 1, 7);
        let reference = write_ranges_record(&allocator, &ranges).unwrap();
        let read_back = read_ranges_record(&allocator, reference).unwrap();
        assert_eq!(read_back.ranges(), ranges.ranges());
        assert_eq!(read_back.checksum(), ranges.checksum());
    }

    #[test]
    fn mismatched_type_id_is_rejected() {
        let allocator = HeapAllocator::new(4096);
        let reference = allocator.allocate(SPARSE_SAMPLE_RECORD_TYPE_ID, SPARSE_SAMPLE_RECORD_SIZE).unwrap();
        assert!(HistogramRecord::at(&allocator, reference).is_none());
        assert_eq!(read_ranges_record(&allocator, reference), Err(Error::RecordLayoutMismatch));
    }
}
