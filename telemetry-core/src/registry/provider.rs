// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Foreign aggregations that merge their own counters into the registry
//! immediately before a collection pass.

/// Implemented by an out-of-registry source of histogram deltas (e.g. a
/// subsystem that keeps its own counters and only wants to surface them
/// through this registry at collection time).
///
/// The registry holds providers as `std::sync::Weak`, so a provider that
/// has been dropped is silently skipped rather than causing an error.
pub trait HistogramProvider: Send + Sync {
    /// Merges this provider's own histogram deltas into the registry.
    /// `done` is called once the merge completes; providers that merge
    /// synchronously may call it before returning.
    fn merge_histogram_deltas(&self, async_merge: bool, done: &mut dyn FnMut());
}
