// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Sparse histograms: no shared `BucketRanges`; each distinct sample value
//! is its own bucket with implicit width one. Good when the live value
//! set is small relative to its possible range (e.g. HTTP status codes,
//! error enums).

use std::sync::Arc;

use super::{ConstructionArgs, Histogram};
use crate::registry::StatisticsRegistry;

/// Looks up or creates a sparse histogram named `name` on the current
/// registry.
pub fn get(name: &str) -> Arc<Histogram> {
    StatisticsRegistry::current().factory_get(name, ConstructionArgs::sparse(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ScopedRegistry;
    use std::sync::{Arc as StdArc, Barrier};
    use std::thread;

    #[test]
    fn concurrent_adds_to_one_value_are_not_lost() {
        let _scope = ScopedRegistry::new();
        let histogram = get("Errors");

        let barrier = StdArc::new(Barrier::new(10));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let histogram = StdArc::clone(&histogram);
                let barrier = StdArc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..100 {
                        histogram.add(42);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let first_round = histogram.snapshot_delta();
        assert_eq!(first_round.total_count(), 1000);

        let barrier = StdArc::new(Barrier::new(10));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let histogram = StdArc::clone(&histogram);
                let barrier = StdArc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..100 {
                        histogram.add(42);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let second_round = histogram.snapshot_delta();
        assert_eq!(second_round.total_count(), 1000);
    }
}
