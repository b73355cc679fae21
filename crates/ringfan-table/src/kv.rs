//! Packed-key wire format and record types.
//!
//! A payload word carries a precomputed xxh64 hash in its upper 32 bits and
//! the key value in its lower 32 bits. The producer packs once; the table
//! probes straight off the packed hash and never rehashes on the insert path.
//! This convention is part of the contract between the fan-out fabric and the
//! table partitions.

use xxhash_rust::xxh64::xxh64;

/// Low 32 bits of a payload word hold the key value.
pub const KEY_MASK: u64 = 0xffff_ffff;

/// Key value reserved for empty table slots. No key stream may emit it.
pub const EMPTY_KEY: u32 = 0;

/// A staged key as handed to [`CountTable::insert_batch`](crate::CountTable::insert_batch).
///
/// `key` holds the packed payload word; `id` is caller-chosen correlation
/// data echoed back by the find path (the fan-out pipeline stores the packed
/// word in both fields).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: u64,
    pub id: u64,
}

impl KeyRecord {
    /// Wraps an already packed payload word.
    #[inline]
    pub fn packed(word: u64) -> Self {
        Self { key: word, id: word }
    }

    /// Packs a raw key and wraps it, carrying `id` through.
    #[inline]
    pub fn from_raw(key: u64, id: u64) -> Self {
        Self {
            key: pack_key(key),
            id,
        }
    }
}

/// A find result: the aggregated value for a key, plus the request `id`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueRecord {
    pub value: u64,
    pub id: u64,
}

/// Which internal pipeline a [`prefetch_queue`](crate::CountTable::prefetch_queue)
/// hint refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Insert,
    Find,
}

/// Packs a raw key into a payload word: `(xxh64(key) << 32) | (key & KEY_MASK)`.
#[inline]
pub fn pack_key(key: u64) -> u64 {
    let hash = xxh64(&key.to_le_bytes(), 0);
    (hash << 32) | (key & KEY_MASK)
}

/// The precomputed hash half of a packed word.
#[inline]
pub fn packed_hash(word: u64) -> u32 {
    (word >> 32) as u32
}

/// The key half of a packed word.
#[inline]
pub fn packed_key(word: u64) -> u32 {
    (word & KEY_MASK) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_preserves_key_half() {
        for key in [1u64, 2, 0xffff_ffff, 0x1_0000_0001] {
            let word = pack_key(key);
            assert_eq!(packed_key(word) as u64, key & KEY_MASK);
        }
    }

    #[test]
    fn pack_is_deterministic() {
        assert_eq!(pack_key(42), pack_key(42));
        assert_eq!(packed_hash(pack_key(42)), packed_hash(pack_key(42)));
    }

    #[test]
    fn distinct_keys_usually_get_distinct_hashes() {
        // Not a cryptographic claim; just catches a broken hash wiring that
        // would return a constant.
        let hashes: std::collections::HashSet<u32> =
            (1u64..100).map(|k| packed_hash(pack_key(k))).collect();
        assert!(hashes.len() > 90);
    }

    #[test]
    fn from_raw_matches_manual_packing() {
        let rec = KeyRecord::from_raw(7, 99);
        assert_eq!(rec.key, pack_key(7));
        assert_eq!(rec.id, 99);
    }
}
