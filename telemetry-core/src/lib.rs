// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! An in-process telemetry aggregation engine.
//!
//! Application code identifies or creates a named histogram through a
//! [`registry::StatisticsRegistry`], records samples into it with
//! [`histogram::Histogram::add`]/[`histogram::Histogram::add_count`], and a
//! collector periodically drives a [`snapshot::SnapshotEngine`] over the
//! registered histograms to extract deltas for upload. Histograms and their
//! counters may optionally live in a [`persistent`] allocator segment shared
//! with another process.
//!
//! This crate covers the aggregation core only: rendering collected
//! snapshots as JSON or text, wiring a CLI or HTTP surface, and the concrete
//! mmap-backed allocator are left to embedding applications (see
//! [`persistent::Allocator`] for the trait boundary).

pub mod bucket_ranges;
pub mod error;
pub mod flags;
pub mod hash;
pub mod histogram;
pub mod persistent;
pub mod pickle;
pub mod registry;
pub mod sample;
pub mod sample_store;
pub mod single_sample_metric;
pub mod snapshot;

pub use bucket_ranges::BucketRanges;
pub use error::{CorruptionError, Error};
pub use histogram::{ConstructionArgs, Histogram, HistogramType};
pub use registry::{RecordChecker, ScopedRegistry, StatisticsRegistry};
pub use sample::{Sample, SAMPLE_MAX};
pub use snapshot::{Flattener, SnapshotEngine};
