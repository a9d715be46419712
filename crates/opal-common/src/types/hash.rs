//! Key hashing for tablet routing and bucket selection.
//!
//! Every key is reduced to a 64-bit [`KeyHash`] exactly once, at the edge
//! of the system; all routing below that point (tablet selection, hash
//! bucket selection) operates on the hash alone. SipHash-1-3 with fixed
//! keys keeps the mapping stable across processes and architectures, which
//! matters because the hash is baked into persistent records.

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::fmt;
use std::hash::Hasher;

/// Fixed SipHash keys. Changing these invalidates every persisted record.
const SIP_KEY_0: u64 = 0x6f70_616c_2d6b_6579;
const SIP_KEY_1: u64 = 0x0000_0000_0000_0067;

/// A 64-bit hash of a record key.
///
/// # Example
///
/// ```rust
/// use opal_common::types::KeyHash;
///
/// let h1 = KeyHash::of(b"user:1");
/// let h2 = KeyHash::of(b"user:1");
/// assert_eq!(h1, h2);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct KeyHash(u64);

impl KeyHash {
    /// Smallest possible hash value.
    pub const MIN: Self = Self(0);

    /// Largest possible hash value.
    pub const MAX: Self = Self(u64::MAX);

    /// Hashes a key.
    #[must_use]
    pub fn of(key: &[u8]) -> Self {
        let mut hasher = SipHasher13::new_with_keys(SIP_KEY_0, SIP_KEY_1);
        hasher.write(key);
        Self(hasher.finish())
    }

    /// Creates a `KeyHash` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the hash bucket index for a table with `bucket_count`
    /// buckets.
    ///
    /// `bucket_count` must be non-zero.
    #[inline]
    #[must_use]
    pub const fn bucket(self, bucket_count: usize) -> usize {
        (self.0 % bucket_count as u64) as usize
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({:#018x})", self.0)
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// An inclusive range of the key-hash space.
///
/// The cluster coordinator splits `[KeyHash::MIN, KeyHash::MAX]` into
/// contiguous ranges, one per tablet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHashRange {
    /// First hash in the range.
    pub begin: KeyHash,
    /// Last hash in the range (inclusive).
    pub end: KeyHash,
}

impl KeyHashRange {
    /// The full key-hash space.
    pub const FULL: Self = Self {
        begin: KeyHash::MIN,
        end: KeyHash::MAX,
    };

    /// Creates a new range.
    ///
    /// # Panics
    ///
    /// Panics if `begin > end`.
    #[must_use]
    pub fn new(begin: KeyHash, end: KeyHash) -> Self {
        assert!(begin <= end, "inverted key-hash range");
        Self { begin, end }
    }

    /// Returns true if `hash` falls inside this range.
    #[inline]
    #[must_use]
    pub fn contains(&self, hash: KeyHash) -> bool {
        self.begin <= hash && hash <= self.end
    }

    /// Splits the full hash space into `count` equal contiguous ranges.
    ///
    /// `count` must be a non-zero power of two so the 2^64 hash space
    /// divides exactly.
    #[must_use]
    pub fn split_full(count: usize) -> Vec<Self> {
        assert!(count > 0 && count.is_power_of_two(), "tablet count must be a power of two");
        let width = (u64::MAX / count as u64).wrapping_add(1);
        (0..count as u64)
            .map(|i| {
                let begin = i.wrapping_mul(width);
                let end = if i == count as u64 - 1 {
                    u64::MAX
                } else {
                    begin.wrapping_add(width).wrapping_sub(1)
                };
                Self::new(KeyHash::from_u64(begin), KeyHash::from_u64(end))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(KeyHash::of(b"alpha"), KeyHash::of(b"alpha"));
        assert_ne!(KeyHash::of(b"alpha"), KeyHash::of(b"beta"));
    }

    #[test]
    fn test_bucket_in_range() {
        for key in [&b"a"[..], b"bb", b"ccc", b"dddd"] {
            let bucket = KeyHash::of(key).bucket(1024);
            assert!(bucket < 1024);
        }
    }

    #[test]
    fn test_range_contains() {
        let range = KeyHashRange::new(KeyHash::from_u64(100), KeyHash::from_u64(200));
        assert!(range.contains(KeyHash::from_u64(100)));
        assert!(range.contains(KeyHash::from_u64(200)));
        assert!(!range.contains(KeyHash::from_u64(99)));
        assert!(!range.contains(KeyHash::from_u64(201)));
    }

    #[test]
    fn test_split_full_tiles_space() {
        let ranges = KeyHashRange::split_full(8);
        assert_eq!(ranges.len(), 8);
        assert_eq!(ranges[0].begin, KeyHash::MIN);
        assert_eq!(ranges[7].end, KeyHash::MAX);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end.as_u64() + 1, pair[1].begin.as_u64());
        }
    }

    #[test]
    fn test_split_single() {
        let ranges = KeyHashRange::split_full(1);
        assert_eq!(ranges, vec![KeyHashRange::FULL]);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_split_rejects_non_power_of_two() {
        let _ = KeyHashRange::split_full(3);
    }
}
