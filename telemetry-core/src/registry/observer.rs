// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Sample-observer dispatch: a fast-path boolean checked on every
//! recording call, backing a per-name-hash list of callbacks plus one
//! process-wide global observer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sample::Sample;

/// Signature required of a sample-observer callback: `(name, name_hash,
/// sample)`. Called synchronously on the recording thread while the
/// dispatch table's lock is held, so implementations must be fast and must
/// not re-enter the registry.
pub type SampleObserverFn = Arc<dyn Fn(&str, u64, Sample) + Send + Sync>;

#[derive(Default)]
struct ObserverTable {
    global: Option<SampleObserverFn>,
    per_hash: HashMap<u64, Vec<SampleObserverFn>>,
}

/// A clonable handle shared between a [`super::StatisticsRegistry`] and
/// every [`crate::histogram::Histogram`] it creates.
///
/// `active` is the fast-path boolean from §3/§4.5: the hot recording path
/// checks it with a relaxed load before touching the table at all.
#[derive(Clone, Debug)]
pub struct DispatchHandle {
    active: Arc<AtomicBool>,
    table: Arc<Mutex<ObserverTableDebug>>,
}

// `parking_lot::Mutex` doesn't require its contents to be `Debug`, but
// deriving `Debug` on `Histogram` (which holds a `DispatchHandle`) needs
// this to have some impl.
struct ObserverTableDebug(ObserverTable);
impl std::fmt::Debug for ObserverTableDebug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverTable")
            .field("has_global", &self.0.global.is_some())
            .field("distinct_hashes", &self.0.per_hash.len())
            .finish()
    }
}

impl Default for DispatchHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchHandle {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            table: Arc::new(Mutex::new(ObserverTableDebug(ObserverTable::default()))),
        }
    }

    /// A handle that will never dispatch to anything; used by the dummy
    /// histogram and by tests that exercise histogram math without a
    /// registry.
    pub fn noop() -> Self {
        Self::new()
    }

    /// The cached "any observer exists" boolean, read without a lock.
    pub fn sample_callbacks_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Notifies the global observer (if any) and every observer registered
    /// for `name_hash`. A no-op if [`Self::sample_callbacks_active`] is
    /// false, which is the common case on the hot path.
    pub fn notify(&self, name: &str, name_hash: u64, sample: Sample) {
        if !self.sample_callbacks_active() {
            return;
        }
        let table = self.table.lock();
        if let Some(observer) = &table.0.global {
            observer(name, name_hash, sample);
        }
        if let Some(observers) = table.0.per_hash.get(&name_hash) {
            for observer in observers {
                observer(name, name_hash, sample);
            }
        }
    }

    pub fn set_global_observer(&self, observer: Option<SampleObserverFn>) {
        let mut table = self.table.lock();
        table.0.global = observer;
        self.refresh_active(&table.0);
    }

    /// Adds an observer for `name_hash`. Returns `true` if this is the
    /// first observer for that hash, so the caller can flip the
    /// histogram's `CallbackExists` flag.
    pub fn add_observer(&self, name_hash: u64, observer: SampleObserverFn) -> bool {
        let mut table = self.table.lock();
        let list = table.0.per_hash.entry(name_hash).or_default();
        let was_empty = list.is_empty();
        list.push(observer);
        self.refresh_active(&table.0);
        was_empty
    }

    /// Removes every observer registered for `name_hash`. Returns `true`
    /// if the hash transitioned from having observers to having none.
    pub fn clear_observers(&self, name_hash: u64) -> bool {
        let mut table = self.table.lock();
        let had_any = table.0.per_hash.remove(&name_hash).map(|list| !list.is_empty()).unwrap_or(false);
        self.refresh_active(&table.0);
        had_any
    }

    pub fn has_observers_for(&self, name_hash: u64) -> bool {
        self.table.lock().0.per_hash.get(&name_hash).map(|list| !list.is_empty()).unwrap_or(false)
    }

    fn refresh_active(&self, table: &ObserverTable) {
        let active = table.global.is_some() || table.per_hash.values().any(|list| !list.is_empty());
        self.active.store(active, Ordering::Relaxed);
    }
}
