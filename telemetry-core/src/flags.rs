// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The flag bitset carried by every histogram, mirroring
//! `base::HistogramBase::Flags`.

use core::sync::atomic::{AtomicU32, Ordering};

/// A bit within [`Flags`].
///
/// `IS_PERSISTENT` is special: it lives only in this in-memory mirror. The
/// original keeps the authoritative copy of most flags in the persistent
/// record itself so a peer process can see them; this crate treats the
/// in-memory `Flags` as the single source of truth and leaves persisting it
/// to the `persistent` module's record writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Flag {
    /// Reported to the platform's stability/UMA-style pipeline.
    UmaTargeted = 1 << 0,
    /// Reported even when the process exits abnormally.
    UmaStability = 1 << 1,
    /// Set on a histogram description that arrived over an IPC boundary via
    /// [`crate::pickle`]; cleared unconditionally on the receiving side.
    IpcSerializationSource = 1 << 2,
    /// At least one observer is registered for this histogram's name hash.
    CallbackExists = 1 << 3,
    /// The histogram's sample stores are backed by a persistent allocator
    /// segment rather than the heap.
    IsPersistent = 1 << 4,
}

/// An atomically-updated set of [`Flag`] bits.
#[derive(Debug, Default)]
pub struct Flags(AtomicU32);

impl Flags {
    pub const NONE: u32 = 0;

    /// Builds a `Flags` from a raw bit pattern, e.g. as read back from a
    /// persisted record or a pickle.
    pub fn from_bits(bits: u32) -> Self {
        Self(AtomicU32::new(bits))
    }

    /// Current bit pattern.
    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    /// True if every bit in `mask` is set.
    pub fn has_all(&self, mask: u32) -> bool {
        self.bits() & mask == mask
    }

    /// True if `flag` is set.
    pub fn has(&self, flag: Flag) -> bool {
        self.has_all(flag as u32)
    }

    /// Bitwise-or `mask` into the current flags. Used by
    /// `SnapshotEngine::prepare_deltas`'s `flags_to_set` parameter.
    pub fn set_all(&self, mask: u32) {
        self.0.fetch_or(mask, Ordering::Relaxed);
    }

    /// Set a single flag.
    pub fn set(&self, flag: Flag) {
        self.set_all(flag as u32);
    }

    /// Clear a single flag. Used when clearing
    /// `IpcSerializationSource` on the receiving side of a pickle.
    pub fn clear(&self, flag: Flag) {
        self.0.fetch_and(!(flag as u32), Ordering::Relaxed);
    }
}

impl Clone for Flags {
    fn clone(&self) -> Self {
        Flags::from_bits(self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_has() {
        let flags = Flags::from_bits(0);
        assert!(!flags.has(Flag::CallbackExists));
        flags.set(Flag::CallbackExists);
        assert!(flags.has(Flag::CallbackExists));
        assert!(flags.has_all(Flag::CallbackExists as u32));
    }

    #[test]
    fn clear_removes_only_that_flag() {
        let flags = Flags::from_bits(0);
        flags.set(Flag::UmaTargeted);
        flags.set(Flag::IpcSerializationSource);
        flags.clear(Flag::IpcSerializationSource);
        assert!(flags.has(Flag::UmaTargeted));
        assert!(!flags.has(Flag::IpcSerializationSource));
    }
}
