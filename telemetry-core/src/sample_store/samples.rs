// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A shared view over the two concrete sample stores, used by the snapshot
//! engine so it does not need to know which shape a given histogram uses.
//!
//! There are exactly two shapes ([`SampleVector`] and [`SparseSampleMap`]),
//! and `Histogram` itself already closes over its variant the same way
//! (see `histogram/mod.rs`'s `HistogramType`), so this is a plain `enum`
//! match rather than a trait object.

use std::collections::HashMap;

use crate::error::Error;
use crate::sample::Sample;
use crate::sample_store::sample_vector::SampleVector;
use crate::sample_store::sparse_sample_map::SparseSampleMap;

/// The per-bucket (or per-value) counts captured by a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Counts {
    Dense(Vec<i64>),
    Sparse(Vec<(Sample, i64)>),
}

/// A point-in-time copy of a sample store's totals, used both as the
/// result of `SnapshotAll` and as an intermediate when computing a delta
/// between two points in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub sum: i64,
    pub redundant_count: i64,
    pub counts: Counts,
}

impl Snapshot {
    /// Total recorded count across all buckets/values in this snapshot.
    pub fn total_count(&self) -> i64 {
        match &self.counts {
            Counts::Dense(counts) => counts.iter().sum(),
            Counts::Sparse(counts) => counts.iter().map(|(_, count)| count).sum(),
        }
    }

    /// Computes `self - previous`, used by `SnapshotDelta` to report only
    /// what changed since the last snapshot. Fails if the two snapshots
    /// come from stores of different shapes.
    pub fn delta_since(&self, previous: &Snapshot) -> Result<Snapshot, Error> {
        let counts = match (&self.counts, &previous.counts) {
            (Counts::Dense(current), Counts::Dense(previous)) => {
                if current.len() != previous.len() {
                    return Err(Error::IncompatibleShape);
                }
                Counts::Dense(current.iter().zip(previous).map(|(a, b)| a - b).collect())
            }
            (Counts::Sparse(current), Counts::Sparse(previous)) => {
                let previous_map: HashMap<Sample, i64> = previous.iter().copied().collect();
                let mut diff = Vec::new();
                for (value, count) in current {
                    let previous_count = previous_map.get(value).copied().unwrap_or(0);
                    let delta = count - previous_count;
                    if delta != 0 {
                        diff.push((*value, delta));
                    }
                }
                Counts::Sparse(diff)
            }
            _ => return Err(Error::IncompatibleShape),
        };
        Ok(Snapshot {
            sum: self.sum - previous.sum,
            redundant_count: self.redundant_count - previous.redundant_count,
            counts,
        })
    }
}

/// Dispatch over the two concrete sample store shapes.
#[derive(Debug)]
pub enum Samples {
    Dense(SampleVector),
    Sparse(SparseSampleMap),
}

impl Samples {
    pub fn sum(&self) -> i64 {
        match self {
            Samples::Dense(v) => v.sum(),
            Samples::Sparse(m) => m.sum(),
        }
    }

    pub fn redundant_count(&self) -> i64 {
        match self {
            Samples::Dense(v) => v.redundant_count(),
            Samples::Sparse(m) => m.redundant_count(),
        }
    }

    pub fn total_count(&self) -> i64 {
        match self {
            Samples::Dense(v) => v.total_count(),
            Samples::Sparse(m) => m.total_count(),
        }
    }

    /// Copies the current totals out, for `SnapshotAll`/`SnapshotUnlogged`.
    pub fn snapshot(&self) -> Snapshot {
        match self {
            Samples::Dense(v) => Snapshot {
                sum: v.sum(),
                redundant_count: v.redundant_count(),
                counts: Counts::Dense(v.counts()),
            },
            Samples::Sparse(m) => Snapshot {
                sum: m.sum(),
                redundant_count: m.redundant_count(),
                counts: Counts::Sparse(m.counts()),
            },
        }
    }

    /// Removes `delta` from the live store, used by
    /// `mark_unlogged_as_logged` so the next `snapshot_unlogged` only sees
    /// samples recorded since.
    pub fn subtract(&self, delta: &Snapshot) -> Result<(), Error> {
        match (self, &delta.counts) {
            (Samples::Dense(v), Counts::Dense(counts)) => {
                v.subtract_from(counts, delta.sum, delta.redundant_count);
                Ok(())
            }
            (Samples::Sparse(m), Counts::Sparse(counts)) => {
                m.subtract_from(counts, delta.sum, delta.redundant_count);
                Ok(())
            }
            _ => Err(Error::IncompatibleShape),
        }
    }

    /// Folds a foreign delta into the live store, used when a persistent
    /// allocator view harvests a peer process's counts (`Histogram::AddSamples`
    /// in the original this crate follows). Implemented as subtracting the
    /// delta's negation, reusing the same shape check as `subtract`.
    pub fn merge(&self, delta: &Snapshot) -> Result<(), Error> {
        let negated = Snapshot {
            sum: -delta.sum,
            redundant_count: -delta.redundant_count,
            counts: match &delta.counts {
                Counts::Dense(counts) => Counts::Dense(counts.iter().map(|c| -c).collect()),
                Counts::Sparse(counts) => Counts::Sparse(counts.iter().map(|(v, c)| (*v, -c)).collect()),
            },
        };
        self.subtract(&negated)
    }
}
