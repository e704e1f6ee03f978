// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The storage layer underneath a [`crate::histogram`]: a dense,
//! fixed-shape vector for bucketed histograms, and a sparse map for
//! histograms whose value set is not known ahead of time.

pub mod sample_vector;
pub mod samples;
pub mod single_sample;
pub mod sparse_sample_map;

pub use sample_vector::SampleVector;
pub use samples::{Counts, Samples, Snapshot};
pub use sparse_sample_map::SparseSampleMap;
