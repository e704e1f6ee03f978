// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The process-wide (or test-scoped) registry that deduplicates
//! histograms and bucket ranges by name hash, and dispatches sample
//! observers.
//!
//! `StatisticsRegistry` is an `Arc`-clonable handle: cloning it shares the
//! same underlying map, dispatch table, and record checker. Tests that
//! need a clean slate push a fresh registry with [`ScopedRegistry`] rather
//! than mutating process-global `static` state directly.

pub mod observer;
pub mod provider;
pub mod record_checker;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::bucket_ranges::BucketRanges;
use crate::hash::hash_name;
use crate::histogram::{ConstructionArgs, Histogram, HistogramType};
use crate::sample::clamp_sample;

pub use observer::{DispatchHandle, SampleObserverFn};
pub use provider::HistogramProvider;
pub use record_checker::{AlwaysRecord, RecordChecker};

const MISMATCHED_CONSTRUCTION_ARGUMENTS_HISTOGRAM: &str = "Histogram.MismatchedConstructionArguments";

struct State {
    histograms: HashMap<u64, Arc<Histogram>>,
    ranges_by_checksum: HashMap<u32, Vec<Arc<BucketRanges>>>,
    providers: Vec<Weak<dyn HistogramProvider>>,
    record_checker: Arc<dyn RecordChecker>,
}

struct Inner {
    state: Mutex<State>,
    dispatch: DispatchHandle,
}

/// A handle to a histogram registry. Deduplicates by name hash, owns the
/// canonical bucket-ranges table, and dispatches sample observers.
#[derive(Clone)]
pub struct StatisticsRegistry(Arc<Inner>);

impl Default for StatisticsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsRegistry {
    pub fn new() -> Self {
        Self(Arc::new(Inner {
            state: Mutex::new(State {
                histograms: HashMap::new(),
                ranges_by_checksum: HashMap::new(),
                providers: Vec::new(),
                record_checker: Arc::new(AlwaysRecord),
            }),
            dispatch: DispatchHandle::new(),
        }))
    }

    /// The lazily-materialized, process-wide default registry.
    pub fn default_registry() -> StatisticsRegistry {
        static DEFAULT: OnceLock<StatisticsRegistry> = OnceLock::new();
        DEFAULT.get_or_init(StatisticsRegistry::new).clone()
    }

    /// The registry call sites should use right now: the top of the
    /// nested test-registry stack, or [`Self::default_registry`] if the
    /// stack is empty.
    pub fn current() -> StatisticsRegistry {
        test_stack()
            .lock()
            .last()
            .cloned()
            .unwrap_or_else(StatisticsRegistry::default_registry)
    }

    pub fn sample_callbacks_active(&self) -> bool {
        self.0.dispatch.sample_callbacks_active()
    }

    pub fn set_record_checker(&self, checker: Arc<dyn RecordChecker>) {
        self.0.state.lock().record_checker = checker;
    }

    /// Registers a `Weak` reference to a foreign aggregation source.
    pub fn add_provider(&self, provider: Weak<dyn HistogramProvider>) {
        self.0.state.lock().providers.push(provider);
    }

    /// Gives every live provider a chance to merge its own deltas in
    /// before a collection pass. Dangling providers are dropped silently.
    pub fn merge_provider_deltas(&self) {
        let providers: Vec<_> = {
            let mut state = self.0.state.lock();
            state.providers.retain(|p| p.strong_count() > 0);
            state.providers.clone()
        };
        for provider in providers {
            if let Some(provider) = provider.upgrade() {
                provider.merge_histogram_deltas(false, &mut || {});
            }
        }
    }

    /// Looks up a histogram by name hash and compares construction
    /// parameters; if absent, consults the record checker and constructs
    /// a real histogram (or the dummy, if the checker rejects it).
    pub fn factory_get(&self, name: &str, args: ConstructionArgs, flags_to_set: u32) -> Arc<Histogram> {
        let hash = hash_name(name);

        if let Some(existing) = self.0.state.lock().histograms.get(&hash).cloned() {
            return if *existing.construction_args() == args {
                existing
            } else {
                self.record_mismatch(hash);
                Arc::new(Histogram::new_dummy(name))
            };
        }

        let should_record = self.0.state.lock().record_checker.should_record(hash);
        if !should_record {
            return Arc::new(Histogram::new_dummy(name));
        }

        let candidate = self.build_histogram(name, &args);
        candidate.flags().set_all(flags_to_set);
        self.register_or_deduplicate(candidate)
    }

    fn build_histogram(&self, name: &str, args: &ConstructionArgs) -> Arc<Histogram> {
        match args.kind {
            HistogramType::Exponential | HistogramType::Linear | HistogramType::Boolean => {
                let ranges = match args.kind {
                    HistogramType::Exponential => BucketRanges::exponential(args.bucket_count, args.min, args.max),
                    HistogramType::Linear => BucketRanges::linear(args.bucket_count, args.min, args.max),
                    HistogramType::Boolean => BucketRanges::boolean(),
                    _ => unreachable!(),
                };
                let ranges = self.register_or_deduplicate_ranges(Arc::new(ranges));
                Arc::new(Histogram::new_bucketed(name, args.clone(), ranges, self.0.dispatch.clone()))
            }
            HistogramType::Custom => {
                let boundaries = args.custom_boundaries.clone().unwrap_or_default();
                let ranges = BucketRanges::custom(boundaries).unwrap_or_else(|_| BucketRanges::boolean());
                let ranges = self.register_or_deduplicate_ranges(Arc::new(ranges));
                Arc::new(Histogram::new_bucketed(name, args.clone(), ranges, self.0.dispatch.clone()))
            }
            HistogramType::Sparse => Arc::new(Histogram::new_sparse(name, self.0.dispatch.clone())),
            HistogramType::Dummy => Arc::new(Histogram::new_dummy(name)),
        }
    }

    /// Records one sample in the `Histogram.MismatchedConstructionArguments`
    /// meta-histogram, keyed by the offending name hash.
    fn record_mismatch(&self, name_hash: u64) {
        let meta_hash = hash_name(MISMATCHED_CONSTRUCTION_ARGUMENTS_HISTOGRAM);
        let meta = {
            let mut state = self.0.state.lock();
            Arc::clone(state.histograms.entry(meta_hash).or_insert_with(|| {
                Arc::new(Histogram::new_sparse(MISMATCHED_CONSTRUCTION_ARGUMENTS_HISTOGRAM, self.0.dispatch.clone()))
            }))
        };
        meta.add(clamp_sample((name_hash & 0x7fff_ffff) as i64));
    }

    /// Inserts `histogram` under its name hash if absent; if an entry
    /// already exists, the incumbent is kept and `histogram` is dropped.
    pub fn register_or_deduplicate(&self, histogram: Arc<Histogram>) -> Arc<Histogram> {
        let mut state = self.0.state.lock();
        match state.histograms.entry(histogram.name_hash()) {
            Entry::Vacant(entry) => {
                if self.0.dispatch.has_observers_for(histogram.name_hash()) {
                    histogram.flags().set(crate::flags::Flag::CallbackExists);
                }
                entry.insert(Arc::clone(&histogram));
                histogram
            }
            Entry::Occupied(entry) => Arc::clone(entry.get()),
        }
    }

    /// Canonicalizes `ranges` against any previously registered ranges
    /// with the same checksum and identical boundaries.
    pub fn register_or_deduplicate_ranges(&self, ranges: Arc<BucketRanges>) -> Arc<BucketRanges> {
        let mut state = self.0.state.lock();
        let bucket = state.ranges_by_checksum.entry(ranges.checksum()).or_default();
        for existing in bucket.iter() {
            if existing.ranges() == ranges.ranges() {
                return Arc::clone(existing);
            }
        }
        bucket.push(Arc::clone(&ranges));
        ranges
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Histogram>> {
        self.0.state.lock().histograms.get(&hash_name(name)).cloned()
    }

    pub fn find_by_hash(&self, name_hash: u64) -> Option<Arc<Histogram>> {
        self.0.state.lock().histograms.get(&name_hash).cloned()
    }

    /// All currently registered histograms, in hash-bucket iteration
    /// order (stable for a given registry instance, per §1.2's
    /// `StatisticsRecorder` iteration-order note, but not sorted by name).
    pub fn histograms(&self) -> Vec<Arc<Histogram>> {
        self.0.state.lock().histograms.values().cloned().collect()
    }

    pub fn set_global_observer(&self, observer: Option<SampleObserverFn>) {
        self.0.dispatch.set_global_observer(observer);
    }

    /// Registers `observer` for `name`. If this is the first observer for
    /// that name hash and a histogram is already registered under it, its
    /// `CallbackExists` flag is set immediately.
    pub fn add_observer(&self, name: &str, observer: SampleObserverFn) {
        let hash = hash_name(name);
        let first = self.0.dispatch.add_observer(hash, observer);
        if first {
            if let Some(histogram) = self.0.state.lock().histograms.get(&hash) {
                histogram.flags().set(crate::flags::Flag::CallbackExists);
            }
        }
    }

    /// Removes every observer registered for `name`. If the histogram
    /// transitions to having none left, its `CallbackExists` flag is
    /// cleared.
    pub fn remove_observers(&self, name: &str) {
        let hash = hash_name(name);
        let transitioned = self.0.dispatch.clear_observers(hash);
        if transitioned {
            if let Some(histogram) = self.0.state.lock().histograms.get(&hash) {
                histogram.flags().clear(crate::flags::Flag::CallbackExists);
            }
        }
    }

    pub(crate) fn dispatch_handle(&self) -> DispatchHandle {
        self.0.dispatch.clone()
    }
}

fn test_stack() -> &'static Mutex<Vec<StatisticsRegistry>> {
    static STACK: OnceLock<Mutex<Vec<StatisticsRegistry>>> = OnceLock::new();
    STACK.get_or_init(|| Mutex::new(Vec::new()))
}

/// An RAII guard that pushes a fresh [`StatisticsRegistry`] onto the
/// nested test-registry stack on construction and pops it on `Drop`, so
/// [`StatisticsRegistry::current`] resolves to it for the guard's
/// lifetime.
pub struct ScopedRegistry {
    registry: StatisticsRegistry,
}

impl ScopedRegistry {
    pub fn new() -> Self {
        let registry = StatisticsRegistry::new();
        test_stack().lock().push(registry.clone());
        Self { registry }
    }

    pub fn registry(&self) -> &StatisticsRegistry {
        &self.registry
    }
}

impl Default for ScopedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedRegistry {
    fn drop(&mut self) {
        let mut stack = test_stack().lock();
        if let Some(position) = stack.iter().rposition(|r| Arc::ptr_eq(&r.0, &self.registry.0)) {
            stack.remove(position);
        }
    }
}
