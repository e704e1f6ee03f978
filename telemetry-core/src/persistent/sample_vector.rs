// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The persistent counterpart of [`crate::sample_store::sample_vector::SampleVector`]:
//! a dense bucket-count array that may live in a shared allocator segment
//! instead of the process heap, materialized lazily on first write so a
//! histogram that never records anything costs nothing but its header.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::error::Error;

use super::{Allocator, Reference, NULL_REFERENCE};

/// A counts-array allocation that does not exist yet. Any number of
/// threads (in this process or a peer sharing the segment) may race to
/// materialize it; exactly one allocation wins and every racer converges
/// on the same [`Reference`].
pub struct DelayedPersistentAllocation<'a> {
    allocator: &'a dyn Allocator,
    bucket_count: u32,
    install: Box<dyn Fn(&dyn Allocator, Reference) -> Reference + 'a>,
    fetch: Box<dyn Fn(&dyn Allocator) -> Reference + 'a>,
}

impl<'a> DelayedPersistentAllocation<'a> {
    pub fn new(
        allocator: &'a dyn Allocator,
        bucket_count: u32,
        fetch: impl Fn(&dyn Allocator) -> Reference + 'a,
        install: impl Fn(&dyn Allocator, Reference) -> Reference + 'a,
    ) -> Self {
        Self { allocator, bucket_count, install: Box::new(install), fetch: Box::new(fetch) }
    }

    /// Returns the already-materialized block, or allocates a
    /// zero-filled `bucket_count * 4` byte block and tries to install it.
    /// If a racing caller installed one first, the freshly allocated
    /// block is simply abandoned (the allocator has no `free`; a real
    /// segment pays a small amount of permanent waste for this, same as
    /// the upstream design it mirrors).
    pub fn get(&self) -> Result<Reference, Error> {
        let existing = (self.fetch)(self.allocator);
        if existing != NULL_REFERENCE {
            return Ok(existing);
        }
        let size = self.bucket_count as usize * 4;
        let reference = self.allocator.allocate(super::record::DENSE_COUNTS_TYPE_ID, size).ok_or(Error::AllocatorFull)?;
        self.allocator.make_iterable(reference);
        Ok((self.install)(self.allocator, reference))
    }
}

/// A dense bucket-count array backed by an [`Allocator`] block, installed
/// lazily via [`DelayedPersistentAllocation`].
pub struct PersistentSampleVector<'a> {
    allocator: &'a dyn Allocator,
    bucket_count: u32,
    delayed: DelayedPersistentAllocation<'a>,
}

impl<'a> PersistentSampleVector<'a> {
    pub fn new(delayed: DelayedPersistentAllocation<'a>, allocator: &'a dyn Allocator, bucket_count: u32) -> Self {
        Self { allocator, bucket_count, delayed }
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    /// Adds `count` to `bucket_index`'s running total, materializing the
    /// backing array on first use.
    pub fn add(&self, bucket_index: usize, count: i64) -> Result<(), Error> {
        let reference = self.delayed.get()?;
        if let Some(cell) = self.allocator.atomic_i32(reference, bucket_index * 4) {
            cell.fetch_add(count as i32, Ordering::Relaxed);
        }
        Ok(())
    }

    /// A point-in-time snapshot of every bucket's count. Buckets never
    /// materialized (no sample has landed there yet) read as zero.
    pub fn counts(&self) -> Result<Vec<i64>, Error> {
        let reference = self.delayed.get()?;
        let mut out = Vec::with_capacity(self.bucket_count as usize);
        for index in 0..self.bucket_count as usize {
            let value = self
                .allocator
                .atomic_i32(reference, index * 4)
                .map(|c| c.load(Ordering::Relaxed) as i64)
                .unwrap_or(0);
            out.push(value);
        }
        Ok(out)
    }

    fn cell(&self, reference: Reference, bucket_index: usize) -> Option<&'a AtomicI32> {
        self.allocator.atomic_i32(reference, bucket_index * 4)
    }

    /// Subtracts `delta`'s per-bucket counts from this array in place,
    /// mirroring [`crate::sample_store::sample_vector::SampleVector::subtract_from`].
    pub fn subtract(&self, delta: &[i64]) -> Result<(), Error> {
        let reference = self.delayed.get()?;
        for (index, value) in delta.iter().enumerate() {
            if *value == 0 {
                continue;
            }
            if let Some(cell) = self.cell(reference, index) {
                cell.fetch_add(-(*value as i32), Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
