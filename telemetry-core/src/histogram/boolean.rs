// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Boolean histograms: linear with `min=1`, `max=2`, `bucket_count=3`, so
//! `false` lands in bucket `[0, 1)` and `true` in bucket `[1, 2)`.

use std::sync::Arc;

use super::{ConstructionArgs, Histogram, HistogramType};
use crate::registry::StatisticsRegistry;

/// Looks up or creates a boolean histogram named `name` on the current
/// registry.
pub fn get(name: &str) -> Arc<Histogram> {
    StatisticsRegistry::current().factory_get(name, ConstructionArgs::bucketed(HistogramType::Boolean, 1, 2, 3), 0)
}

/// Records `value` as `1` (true) or `0` (false).
pub fn add_boolean(histogram: &Histogram, value: bool) {
    histogram.add(value as i32);
}
