// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Exponential (log-spaced) histograms: good for latencies, sizes, and
//! other quantities with a long tail.

use std::sync::Arc;

use super::{ConstructionArgs, Histogram, HistogramType};
use crate::registry::StatisticsRegistry;
use crate::sample::Sample;

/// Looks up or creates an exponential histogram named `name` on the
/// current registry (see [`StatisticsRegistry::current`]).
pub fn get(name: &str, min: Sample, max: Sample, bucket_count: usize) -> Arc<Histogram> {
    StatisticsRegistry::current().factory_get(
        name,
        ConstructionArgs::bucketed(HistogramType::Exponential, min, max, bucket_count),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedRegistry;

    #[test]
    fn get_deduplicates_by_name() {
        let scope = ScopedRegistry::new();
        let _guard = scope;
        let a = get("Latency", 1, 64, 8);
        let b = get("Latency", 1, 64, 8);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.histogram_type(), HistogramType::Exponential);
    }
}
