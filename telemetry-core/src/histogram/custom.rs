// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Custom-ranges histograms: the caller supplies interior boundaries
//! directly instead of an exponential or linear layout, e.g. to mirror a
//! pre-existing bucketing scheme.

use std::sync::Arc;

use super::{ConstructionArgs, Histogram};
use crate::registry::StatisticsRegistry;
use crate::sample::Sample;

/// Looks up or creates a custom-ranges histogram named `name` on the
/// current registry. `boundaries` need not include `0` or `SAMPLE_MAX`;
/// [`crate::bucket_ranges::BucketRanges::custom`] adds them.
pub fn get(name: &str, boundaries: Vec<Sample>) -> Arc<Histogram> {
    StatisticsRegistry::current().factory_get(name, ConstructionArgs::custom(boundaries), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedRegistry;

    #[test]
    fn custom_boundaries_are_sorted_and_bracketed() {
        let _scope = ScopedRegistry::new();
        let histogram = get("Custom", vec![10, 5, 1]);
        assert_eq!(
            histogram.ranges().unwrap().ranges(),
            &[0, 1, 5, 10, crate::sample::SAMPLE_MAX]
        );
    }
}
