// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Name hashing used to index histograms, ranges, and observers.
//!
//! The original implementation hashes names with MD5 and keeps the low 64
//! bits. We don't need cryptographic properties here — only a stable,
//! well-distributed 64-bit digest computed once per name and reused for
//! every lookup — so this crate uses FNV-1a, which is what
//! `rustcommon-atomichash` reaches for internally for the same reason.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Computes the stable 64-bit hash used to index a histogram (or a bucket
/// range set, or an observer list) by name.
///
/// This is called exactly once per histogram, at construction time, and the
/// result is cached on the handle — see `Histogram::name_hash`.
pub fn hash_name(name: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        assert_eq!(hash_name("Latency"), hash_name("Latency"));
    }

    #[test]
    fn distinguishes_distinct_names() {
        assert_ne!(hash_name("Latency"), hash_name("latency"));
        assert_ne!(hash_name(""), hash_name("a"));
    }

    #[test]
    fn empty_name_is_well_defined() {
        assert_eq!(hash_name(""), FNV_OFFSET_BASIS);
    }
}
