use criterion::BenchmarkId;
use criterion::Throughput;
use criterion::{criterion_group, criterion_main, Criterion};

use rustcommon_telemetry_core::histogram::{boolean, exponential, linear, sparse};
use rustcommon_telemetry_core::registry::ScopedRegistry;

fn add_exponential(c: &mut Criterion) {
    let _scope = ScopedRegistry::new();
    let histogram = exponential::get("Bench.Exponential", 1, 1_000_000, 50);

    let mut group = c.benchmark_group("Histogram/exponential/add");
    group.throughput(Throughput::Elements(1));
    group.bench_function("min", |b| b.iter(|| histogram.add(1)));
    group.bench_function("max", |b| b.iter(|| histogram.add(999_999)));
}

fn add_linear(c: &mut Criterion) {
    let _scope = ScopedRegistry::new();
    let histogram = linear::get("Bench.Linear", 1, 100, 100);

    let mut group = c.benchmark_group("Histogram/linear/add");
    group.throughput(Throughput::Elements(1));
    group.bench_function("add", |b| b.iter(|| histogram.add(50)));
}

fn add_boolean(c: &mut Criterion) {
    let _scope = ScopedRegistry::new();
    let histogram = boolean::get("Bench.Boolean");

    let mut group = c.benchmark_group("Histogram/boolean/add");
    group.throughput(Throughput::Elements(1));
    group.bench_function("add", |b| b.iter(|| histogram.add(1)));
}

fn add_sparse(c: &mut Criterion) {
    let _scope = ScopedRegistry::new();
    let histogram = sparse::get("Bench.Sparse");

    let mut group = c.benchmark_group("Histogram/sparse/add");
    group.throughput(Throughput::Elements(1));
    for distinct_values in [1usize, 100, 10_000] {
        group.bench_function(BenchmarkId::new("distinct_values", distinct_values), |b| {
            let mut next = 0i32;
            b.iter(|| {
                histogram.add(next);
                next = (next + 1) % distinct_values as i32;
            })
        });
    }
}

fn snapshot_unlogged(c: &mut Criterion) {
    let _scope = ScopedRegistry::new();
    let histogram = exponential::get("Bench.Snapshot", 1, 1_000_000, 50);
    for value in 0..10_000 {
        histogram.add(value % 1_000_000);
    }

    let mut group = c.benchmark_group("Histogram/exponential/snapshot_unlogged");
    group.bench_function("snapshot_unlogged", |b| b.iter(|| histogram.snapshot_unlogged()));
}

criterion_group!(benches, add_exponential, add_linear, add_boolean, add_sparse, snapshot_unlogged);
criterion_main!(benches);
