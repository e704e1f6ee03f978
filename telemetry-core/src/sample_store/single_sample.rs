// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A single `(bucket, count)` pair packed into one `AtomicU32`, giving a
//! histogram's first sample a lock-free home before it is worth allocating
//! a full [`super::sample_vector::SampleVector`].

use core::sync::atomic::{AtomicU32, Ordering};

const DISABLED: u32 = u32::MAX;

fn pack(bucket: u16, count: u16) -> u32 {
    ((bucket as u32) << 16) | count as u32
}

fn unpack(value: u32) -> (u16, u16) {
    ((value >> 16) as u16, value as u16)
}

/// Outcome of [`AtomicSingleSample::accumulate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulate {
    /// The sample was folded into this slot.
    Accepted,
    /// This slot already holds a different bucket, or would overflow; the
    /// caller must promote to a full sample store and retry there. The
    /// slot has been disabled as a side effect and will refuse all further
    /// writes. Carries the slot's prior `(bucket, count)` the first time a
    /// caller observes the transition, so it can be folded into the full
    /// store instead of lost; later callers that also race the same
    /// transition see `None`.
    Disabled(Option<(u16, u16)>),
}

/// A lock-free single-sample slot.
///
/// Three states live in one `u32`: empty (`count == 0`), holding one
/// bucket's running count, or permanently disabled (`DISABLED`) once a
/// second distinct bucket or a count overflow forces promotion to a full
/// sample store.
#[derive(Debug, Default)]
pub struct AtomicSingleSample(AtomicU32);

impl AtomicSingleSample {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Rebuilds a slot from a packed value, e.g. read back from a
    /// persistent record.
    pub fn from_bits(bits: u32) -> Self {
        Self(AtomicU32::new(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// `true` once this slot has been disabled and will never accept
    /// another write.
    pub fn is_disabled(&self) -> bool {
        self.bits() == DISABLED
    }

    /// Folds `increment` into `bucket`'s running count.
    ///
    /// Accepts the sample if the slot is empty or already tracking the
    /// same bucket and the count does not overflow `u16`; otherwise
    /// disables the slot so the caller promotes to a full sample store.
    pub fn accumulate(&self, bucket: u16, increment: u16) -> Accumulate {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current == DISABLED {
                return Accumulate::Disabled(None);
            }
            let (current_bucket, current_count) = unpack(current);
            let next = if current_count == 0 {
                pack(bucket, increment)
            } else if current_bucket == bucket {
                match current_count.checked_add(increment) {
                    Some(sum) => pack(bucket, sum),
                    None => DISABLED,
                }
            } else {
                DISABLED
            };

            if self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return if next == DISABLED {
                    Accumulate::Disabled(if current_count == 0 { None } else { Some((current_bucket, current_count)) })
                } else {
                    Accumulate::Accepted
                };
            }
        }
    }

    /// Reads the current `(bucket, count)` without consuming it. Returns
    /// `None` if the slot is empty or disabled.
    pub fn load(&self) -> Option<(u16, u16)> {
        let value = self.bits();
        if value == DISABLED || value == 0 {
            return None;
        }
        Some(unpack(value))
    }

    /// Atomically reads and resets the slot to empty. Used when a snapshot
    /// needs the single sample folded into a delta without disabling
    /// future recording.
    pub fn extract(&self) -> Option<(u16, u16)> {
        let previous = self.0.swap(0, Ordering::AcqRel);
        if previous == DISABLED || previous == 0 {
            if previous == DISABLED {
                // Put the disabled marker back; swapping to 0 would have
                // silently re-enabled the slot.
                self.0.store(DISABLED, Ordering::Release);
            }
            return None;
        }
        Some(unpack(previous))
    }

    /// Atomically reads the slot and disables it, e.g. when promoting to a
    /// full sample store because a second bucket has appeared.
    pub fn extract_and_disable(&self) -> Option<(u16, u16)> {
        let previous = self.0.swap(DISABLED, Ordering::AcqRel);
        if previous == DISABLED || previous == 0 {
            return None;
        }
        Some(unpack(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_accepted() {
        let slot = AtomicSingleSample::new();
        assert_eq!(slot.accumulate(3, 1), Accumulate::Accepted);
        assert_eq!(slot.load(), Some((3, 1)));
    }

    #[test]
    fn repeated_same_bucket_accumulates() {
        let slot = AtomicSingleSample::new();
        slot.accumulate(3, 1);
        slot.accumulate(3, 4);
        assert_eq!(slot.load(), Some((3, 5)));
    }

    #[test]
    fn distinct_bucket_disables_the_slot() {
        let slot = AtomicSingleSample::new();
        slot.accumulate(3, 1);
        assert_eq!(slot.accumulate(9, 1), Accumulate::Disabled(Some((3, 1))));
        assert!(slot.is_disabled());
        assert_eq!(slot.load(), None);
        assert_eq!(slot.accumulate(3, 1), Accumulate::Disabled(None));
    }

    #[test]
    fn count_overflow_disables_the_slot() {
        let slot = AtomicSingleSample::new();
        slot.accumulate(3, u16::MAX);
        assert_eq!(slot.accumulate(3, 1), Accumulate::Disabled(Some((3, u16::MAX))));
    }

    #[test]
    fn extract_resets_to_empty_and_is_idempotent() {
        let slot = AtomicSingleSample::new();
        slot.accumulate(3, 7);
        assert_eq!(slot.extract(), Some((3, 7)));
        assert_eq!(slot.extract(), None);
        assert_eq!(slot.load(), None);
    }

    #[test]
    fn extract_and_disable_prevents_further_writes() {
        let slot = AtomicSingleSample::new();
        slot.accumulate(3, 7);
        assert_eq!(slot.extract_and_disable(), Some((3, 7)));
        assert!(slot.is_disabled());
        assert_eq!(slot.accumulate(3, 1), Accumulate::Disabled(None));
    }
}
