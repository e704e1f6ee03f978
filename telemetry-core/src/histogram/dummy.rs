// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The dummy histogram: returned in place of a real one when a
//! [`crate::registry::RecordChecker`] rejects recording, or when
//! `factory_get` detects a mismatched re-registration. Every record
//! operation is a no-op and every snapshot is empty.

use std::sync::Arc;
use std::sync::OnceLock;

use super::Histogram;

/// A shared, process-wide dummy instance, mirroring the original's
/// singleton: callers that just need *a* handle to stand in for an
/// expired histogram don't need their own allocation.
pub fn shared() -> Arc<Histogram> {
    static DUMMY: OnceLock<Arc<Histogram>> = OnceLock::new();
    Arc::clone(DUMMY.get_or_init(|| Arc::new(Histogram::new_dummy("DummyHistogram"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramType;

    #[test]
    fn dummy_ignores_every_add_and_snapshots_empty() {
        let dummy = shared();
        dummy.add(5);
        assert_eq!(dummy.histogram_type(), HistogramType::Dummy);
        assert_eq!(dummy.snapshot_all().total_count(), 0);
    }

    #[test]
    fn shared_dummy_is_a_single_instance() {
        assert!(Arc::ptr_eq(&shared(), &shared()));
    }
}
