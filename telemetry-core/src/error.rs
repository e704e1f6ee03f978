// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use thiserror::Error;

/// Errors returned by fallible operations on histograms, bucket ranges, and
/// the sample stores that back them.
///
/// Corruption detected while snapshotting (bad checksum, non-monotonic
/// ranges) is *not* represented here — see [`CorruptionError`], which is a
/// reporting classification rather than a `Result`-propagated error, since
/// the original design surfaces it through a diagnostics sink instead of to
/// the call site that happened to trigger the snapshot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("bucket ranges must have at least 2 interior boundaries")]
    /// A `BucketRanges` (or a histogram built from one) was asked to use
    /// fewer than the minimum of 3 boundary entries (2 buckets).
    TooFewBuckets,
    #[error("bucket ranges are not strictly increasing")]
    /// Construction produced a boundary vector that failed the strictly
    /// increasing invariant even after rectification.
    NotMonotonic,
    #[error("custom ranges must contain at least one boundary in (0, SAMPLE_MAX)")]
    /// A custom ranges vector had no usable interior boundary.
    EmptyCustomRanges,
    #[error("sample store shapes are incompatible for this operation")]
    /// `Add`/`Subtract` between two sample stores whose bucket shapes
    /// (ranges checksum, for dense stores; distinct sample identity, for
    /// sparse stores with non-unit widths) disagree.
    IncompatibleShape,
    #[error("count must be greater than zero")]
    /// `AddCount`/`AddScaled` was called with a non-positive count.
    NonPositiveCount,
    #[error("a snapshot engine pass is already active")]
    /// `SnapshotEngine::prepare_deltas` (or `snapshot_unlogged`) was
    /// re-entered while a prior pass on the same engine had not completed.
    SnapshotAlreadyActive,
    #[error("snapshot_unlogged called without a matching mark_unlogged_as_logged")]
    /// `mark_unlogged_as_logged` was called without (or with mismatched)
    /// outstanding snapshots from a prior `snapshot_unlogged` call.
    NoPendingUnloggedSnapshot,
    #[error("SnapshotFinalDelta may only be called once per histogram")]
    /// The debug-only, at-most-once contract on `SnapshotFinalDelta` was
    /// violated.
    FinalDeltaAlreadyTaken,
    #[error("the allocator segment is full")]
    /// A persistent allocation could not be satisfied because the backing
    /// segment has no remaining capacity. Callers fall back to the heap.
    AllocatorFull,
    #[error("the allocator segment is corrupt")]
    /// The backing segment failed its own integrity check.
    AllocatorCorrupt,
    #[error("persisted record has an unexpected type id or size")]
    /// A record read back from the allocator does not match the type id or
    /// instance size this binary expects, so it is ignored rather than
    /// trusted.
    RecordLayoutMismatch,
    #[error("wire record is malformed")]
    /// `Pickle` decoding ran out of bytes or found an invalid tag.
    MalformedWireRecord,
}

/// Classification of an integrity problem found while snapshotting a
/// histogram's samples, mirroring `base::HistogramBase::Inconsistency` from
/// the original implementation.
///
/// Checksum and ordering errors are always fatal to the *snapshot* (the
/// delta is discarded); count mismatches are tolerated up to
/// [`crate::snapshot::COMMON_RACE_BASED_COUNT_MISMATCH`] and reported at
/// most once per histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CorruptionError {
    /// `redundant_count` exceeds the bucket-count total by more than the
    /// race tolerance.
    CountHigh,
    /// `redundant_count` is below the bucket-count total by more than the
    /// race tolerance.
    CountLow,
    /// The bucket ranges' checksum does not match a recomputation.
    RangeChecksum,
    /// The bucket ranges are not strictly increasing.
    BucketOrder,
}

impl CorruptionError {
    /// A checksum or ordering problem can never be explained by benign
    /// concurrent writers; `find_corruption` treats it as fatal rather than
    /// something to suppress after the first report.
    pub fn is_fatal(self) -> bool {
        matches!(self, CorruptionError::RangeChecksum | CorruptionError::BucketOrder)
    }

    /// Bit position used within the per-histogram "inconsistencies seen"
    /// mask kept by the snapshot engine.
    pub(crate) fn bit(self) -> u8 {
        1 << (self as u8)
    }
}
