// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A temporary proxy for call sites that only ever need to report one
//! bucket's worth of a value over their lifetime, mirroring
//! `base::SingleSampleMetric`/`single_sample_metrics.h`.
//!
//! Unlike recording straight into a [`crate::histogram::Histogram`],
//! only the *last* [`SingleSampleMetric::set_sample`] call before the
//! metric is dropped is ever counted; earlier calls are simply
//! overwritten, and a metric that is never set records nothing at all.
//! This is a convenience over [`crate::sample_store::single_sample::AtomicSingleSample`]
//! for call sites that want "last value wins" semantics scoped to one
//! object's lifetime rather than a histogram's packed first-sample slot.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::histogram::Histogram;
use crate::sample::Sample;

/// Holds at most one pending sample, recording it into the backing
/// histogram when dropped (or when [`Self::set_sample`] is called
/// again, which simply replaces the pending value).
pub struct SingleSampleMetric {
    histogram: Arc<Histogram>,
    pending: Mutex<Option<Sample>>,
}

impl SingleSampleMetric {
    /// Wraps `histogram`; every [`Self::set_sample`] call replaces the
    /// value that will be recorded when this metric is dropped.
    pub fn new(histogram: Arc<Histogram>) -> Self {
        Self { histogram, pending: Mutex::new(None) }
    }

    /// Records `value` as the current candidate sample, discarding
    /// whatever was previously pending. Nothing is written to the
    /// backing histogram until this metric is dropped.
    pub fn set_sample(&self, value: Sample) {
        *self.pending.lock() = Some(value);
    }
}

impl Drop for SingleSampleMetric {
    fn drop(&mut self) {
        if let Some(value) = self.pending.get_mut().take() {
            self.histogram.add(value);
        }
    }
}

/// Creates a [`SingleSampleMetric`] backed by an exponential histogram
/// named `name`, mirroring
/// `DefaultSingleSampleMetricsFactory::CreateCustomCountsMetric`.
pub fn create_custom_counts_metric(
    name: &str,
    min: Sample,
    max: Sample,
    bucket_count: usize,
) -> SingleSampleMetric {
    SingleSampleMetric::new(crate::histogram::exponential::get(name, min, max, bucket_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedRegistry;

    #[test]
    fn no_value_set_records_nothing() {
        let _scope = ScopedRegistry::new();
        let metric = create_custom_counts_metric("Single.Sample.Metric", 1, 10, 10);
        drop(metric);

        let histogram = crate::histogram::exponential::get("Single.Sample.Metric", 1, 10, 10);
        assert_eq!(histogram.snapshot_unlogged().total_count(), 0);
    }

    #[test]
    fn only_the_last_sample_before_drop_is_recorded() {
        let _scope = ScopedRegistry::new();
        let metric = create_custom_counts_metric("Single.Sample.Metric", 1, 10, 10);
        metric.set_sample(1);
        metric.set_sample(3);
        metric.set_sample(5);
        metric.set_sample(9);
        drop(metric);

        let histogram = crate::histogram::exponential::get("Single.Sample.Metric", 1, 10, 10);
        let snapshot = histogram.snapshot_unlogged();
        assert_eq!(snapshot.total_count(), 1);
    }
}
