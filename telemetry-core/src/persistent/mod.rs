// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The cross-process persistent allocator view: histograms and their
//! counters living in a shared memory segment so a privileged supervisor
//! process can harvest metrics from subordinates it cannot otherwise
//! inspect.
//!
//! The concrete mmap-backed allocator is explicitly out of scope (§1); this
//! module defines the [`Allocator`] trait it must satisfy and everything
//! this crate layers on top of it: record-layout versioning, histogram and
//! sample-map materialization, ranges deduplication across the segment, and
//! `import_to_registry`. A minimal in-memory [`HeapAllocator`] test double
//! is provided under `#[cfg(test)]` so this code has something concrete to
//! exercise without pulling in a real mmap crate.

pub mod record;
pub mod sample_map;
pub mod sample_vector;
pub mod view;

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32};

pub use record::{
    HistogramRecord, SampleStoreMeta, SparseSampleRecord, HISTOGRAM_RECORD_TYPE_ID,
    RANGES_RECORD_TYPE_ID, SAMPLE_STORE_META_SIZE, SPARSE_SAMPLE_RECORD_SIZE,
};
pub use sample_map::{PersistentSampleMapRecords, PersistentSparseHistogramDataManager};
pub use sample_vector::{DelayedPersistentAllocation, PersistentSampleVector};
pub use view::PersistentAllocatorView;

/// An opaque handle to a block within an [`Allocator`] segment. `0` is
/// reserved to mean "no reference" (mirroring a null offset).
pub type Reference = u32;

/// The reserved "no reference" value.
pub const NULL_REFERENCE: Reference = 0;

/// The primitive a persistent allocator segment must provide. This crate
/// consumes the trait; it does not implement a real mmap-backed allocator
/// (see the module docs).
///
/// Implementations must provide a monotonic total ordering of
/// `make_iterable`-committed records: once `iter_from` has yielded a
/// reference, every later call (from this process or a peer sharing the
/// segment) must yield it again at the same relative position, and new
/// commits must only ever be appended.
pub trait Allocator: Send + Sync {
    /// Allocates `size` bytes tagged with `type_id`. Returns `None` if the
    /// segment cannot satisfy the request (see [`Self::is_full`]).
    fn allocate(&self, type_id: u32, size: usize) -> Option<Reference>;

    /// The type id a live allocation at `reference` was tagged with.
    fn type_id(&self, reference: Reference) -> Option<u32>;

    /// A read-only byte view of the block at `reference`.
    fn bytes(&self, reference: Reference) -> Option<&[u8]>;

    /// Atomic access to a 4-byte `i32` field at `offset` within the block
    /// at `reference`. Used for fields every persisted record exposes for
    /// concurrent, lock-free mutation (`redundant_count`, dense bucket
    /// counts, sparse sample counts).
    fn atomic_i32(&self, reference: Reference, offset: usize) -> Option<&AtomicI32>;

    /// Atomic access to an 8-byte `i64` field, used for `sum`. On 32-bit
    /// hosts a 64-bit atomic may not be lock-free; this crate accepts that
    /// tearing risk rather than widen the wire format, per §5/§9.
    fn atomic_i64(&self, reference: Reference, offset: usize) -> Option<&AtomicI64>;

    /// Atomic access to a 4-byte `u32` field, used for the packed
    /// single-sample slot.
    fn atomic_u32(&self, reference: Reference, offset: usize) -> Option<&AtomicU32>;

    /// Commits `reference` so it becomes visible to every process's
    /// `iter_from`, in strict creation order.
    fn make_iterable(&self, reference: Reference);

    /// References committed since `after` (`NULL_REFERENCE` to iterate from
    /// the beginning), oldest first.
    fn iter_from(&self, after: Reference) -> Vec<Reference>;

    /// `true` once the segment has no room left for further allocations.
    /// New histograms fall back to the heap rather than fail (§7).
    fn is_full(&self) -> bool;

    /// `true` if the segment has failed its own integrity check. Every
    /// record found by iteration after this point is untrustworthy.
    fn is_corrupt(&self) -> bool;
}
