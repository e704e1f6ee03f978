// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! End-to-end scenarios driven entirely through the public registry and
//! histogram-family surface, as opposed to the unit tests living
//! alongside each module that poke at one component in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rustcommon_telemetry_core::histogram::{boolean, exponential, linear, sparse};
use rustcommon_telemetry_core::registry::ScopedRegistry;
use rustcommon_telemetry_core::sample_store::Counts;

fn sparse_count(counts: &Counts, value: i32) -> i64 {
    match counts {
        Counts::Sparse(entries) => entries.iter().find(|(v, _)| *v == value).map(|(_, c)| *c).unwrap_or(0),
        Counts::Dense(_) => panic!("expected a sparse snapshot"),
    }
}

#[test]
fn exponential_latency_worked_example() {
    let _scope = ScopedRegistry::new();
    let histogram = exponential::get("Latency", 1, 64, 8);

    histogram.add(3);
    histogram.add(10);
    histogram.add(50);

    let delta = histogram.snapshot_delta();
    assert_eq!(delta.total_count(), 3);
    assert_eq!(delta.counts, Counts::Dense(vec![0, 0, 1, 0, 1, 0, 1, 0]));

    assert_eq!(histogram.snapshot_delta().total_count(), 0);
}

#[test]
fn linear_test_linear_ranges_match_the_worked_example() {
    let _scope = ScopedRegistry::new();
    let histogram = linear::get("TestLinear", 1, 7, 8);

    assert_eq!(
        histogram.ranges().unwrap().ranges(),
        &[0, 1, 2, 3, 4, 5, 6, 7, rustcommon_telemetry_core::SAMPLE_MAX]
    );
}

#[test]
fn boolean_add_boolean_lands_in_the_true_bucket() {
    let _scope = ScopedRegistry::new();
    let histogram = boolean::get("Enabled");
    boolean::add_boolean(&histogram, true);

    let delta = histogram.snapshot_delta();
    assert_eq!(delta.counts, Counts::Dense(vec![0, 1, 0]));
}

#[test]
fn single_sample_promotes_to_a_counts_array_on_a_second_bucket() {
    let _scope = ScopedRegistry::new();
    let histogram = exponential::get("Promotion", 1, 64, 8);
    let bucket_for = |sample| histogram.ranges().unwrap().bucket_index(sample);

    for _ in 0..200 {
        histogram.add(30);
    }
    let unlogged = histogram.snapshot_unlogged();
    assert_eq!(unlogged.total_count(), 200);
    assert_eq!(unlogged.counts, Counts::Dense({
        let mut counts = vec![0i64; 8];
        counts[bucket_for(30)] = 200;
        counts
    }));

    histogram.add(8);
    let unlogged = histogram.snapshot_unlogged();
    assert_eq!(unlogged.total_count(), 201);
    let mut expected = vec![0i64; 8];
    expected[bucket_for(30)] = 200;
    expected[bucket_for(8)] += 1;
    assert_eq!(unlogged.counts, Counts::Dense(expected));
}

#[test]
fn sparse_histogram_survives_concurrent_adds_from_many_threads() {
    let _scope = ScopedRegistry::new();
    let histogram = sparse::get("Concurrent.Sparse");

    let run_round = || {
        let barrier = Arc::new(Barrier::new(10));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let histogram = histogram.clone();
                let barrier = barrier.clone();
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
    };

    run_round();
    let first = histogram.snapshot_delta();
    assert_eq!(sparse_count(&first.counts, 42), 1000);

    run_round();
    let second = histogram.snapshot_delta();
    assert_eq!(sparse_count(&second.counts, 42), 1000);
}

#[test]
fn factory_get_dispatch_does_not_lose_samples_under_mixed_concurrent_access() {
    // Not a named scenario in isolation, but exercises the combination
    // the worked examples rely on individually: many threads resolving
    // the same histogram by name concurrently with recording, none of
    // which should see a torn or dummy handle.
    let _scope = ScopedRegistry::new();
    let dummy_handles = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dummy_handles = dummy_handles.clone();
            thread::spawn(move || {
                let histogram = exponential::get("Shared", 1, 64, 8);
                if histogram.histogram_type() == rustcommon_telemetry_core::HistogramType::Dummy {
                    dummy_handles.fetch_add(1, Ordering::Relaxed);
                }
                for _ in 0..50 {
                    histogram.add(5);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(dummy_handles.load(Ordering::Relaxed), 0);
    let histogram = exponential::get("Shared", 1, 64, 8);
    assert_eq!(histogram.snapshot_unlogged().total_count(), 400);
}
