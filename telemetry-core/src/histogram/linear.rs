// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Linear (equal-width) histograms: good for percentages, small bounded
//! counts, and anything else without a long tail.

use std::sync::Arc;

use super::{ConstructionArgs, Histogram, HistogramType};
use crate::registry::StatisticsRegistry;
use crate::sample::Sample;

/// Looks up or creates a linear histogram named `name` on the current
/// registry.
pub fn get(name: &str, min: Sample, max: Sample, bucket_count: usize) -> Arc<Histogram> {
    StatisticsRegistry::current().factory_get(
        name,
        ConstructionArgs::bucketed(HistogramType::Linear, min, max, bucket_count),
        0,
    )
}
