// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The pluggable expiration check consulted once per histogram creation.

/// Decides whether a histogram should actually be recorded, or replaced
/// with the no-op dummy family.
///
/// Installed once, early, on a [`super::StatisticsRegistry`]. Decisions
/// are assumed stable: the registry does not re-consult the checker for a
/// name hash it has already resolved, because histograms are looked up by
/// hash and the dummy/real choice is baked into the registered handle.
pub trait RecordChecker: Send + Sync {
    fn should_record(&self, name_hash: u64) -> bool;
}

/// The default checker installed on every fresh registry: records
/// everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRecord;

impl RecordChecker for AlwaysRecord {
    fn should_record(&self, _name_hash: u64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_record_accepts_every_hash() {
        let checker = AlwaysRecord;
        assert!(checker.should_record(0));
        assert!(checker.should_record(u64::MAX));
    }
}
