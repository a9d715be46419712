//! The tablet record store.

use tracing::warn;

use opal_common::constants::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use opal_common::error::{OpalError, OpalResult};
use opal_common::types::{Key, KeyHash, Value};
use opal_nvm::{Allocator, Handle};

use crate::record::{RecordHeader, NEXT_FIELD_OFFSET, RECORD_HEADER_SIZE};

/// A hash-bucket record store over one arena.
///
/// Buckets hold the raw handle of the newest record in the chain (0 when
/// empty); each record links to the next older one. `put` replaces any
/// existing record with the same key, `get` walks the chain comparing the
/// stored hash before the key bytes, and `del` unlinks and frees.
///
/// # Example
///
/// ```rust
/// use opal_common::constants::{FREE_TABLE_SIZE, MAX_BLOCK_SIZE};
/// use opal_common::types::{Key, Value};
/// use opal_nvm::Allocator;
/// use opal_tablet::Tablet;
///
/// let mut bytes = vec![0u8; (FREE_TABLE_SIZE + MAX_BLOCK_SIZE) as usize];
/// let mut tablet = Tablet::bootstrap(Allocator::new(&mut bytes), 64);
///
/// tablet.put(&Key::from_bytes(b"k"), &Value::from_bytes(b"v")).unwrap();
/// assert_eq!(tablet.get(&Key::from_bytes(b"k")).unwrap().as_bytes(), b"v");
/// ```
pub struct Tablet<'a> {
    allocator: Allocator<'a>,
    buckets: Vec<u32>,
    record_count: usize,
}

impl<'a> Tablet<'a> {
    /// Formats the allocator's arena and creates an empty tablet with
    /// `bucket_count` hash buckets.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is zero.
    #[must_use]
    pub fn bootstrap(mut allocator: Allocator<'a>, bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "tablet needs at least one bucket");
        allocator.format();
        Self {
            allocator,
            buckets: vec![0; bucket_count],
            record_count: 0,
        }
    }

    /// Returns the number of stored records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.record_count
    }

    /// Returns true if the tablet holds no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Returns the underlying allocator, for diagnostics.
    #[inline]
    #[must_use]
    pub fn allocator(&self) -> &Allocator<'a> {
        &self.allocator
    }

    /// Stores `value` under `key`, replacing any existing record.
    ///
    /// # Errors
    ///
    /// - [`OpalError::KeyTooLarge`] / [`OpalError::ValueTooLarge`] for
    ///   records the on-arena format cannot hold, checked before the
    ///   arena is touched;
    /// - [`OpalError::StoreFull`] when the arena has no block for the
    ///   record, retryable once space is freed.
    pub fn put(&mut self, key: &Key, value: &Value) -> OpalResult<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(OpalError::KeyTooLarge {
                size: key.len(),
                max_size: MAX_KEY_SIZE,
            });
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(OpalError::ValueTooLarge {
                size: value.len(),
                max_size: MAX_VALUE_SIZE,
            });
        }

        let hash = KeyHash::of(key);
        let bucket = hash.bucket(self.buckets.len());
        let header = RecordHeader {
            next: self.buckets[bucket],
            key_hash: hash,
            key_len: key.len() as u16,
            val_len: value.len() as u16,
        };

        let needed = header.payload_size();
        let Some(handle) = self.allocator.alloc(needed) else {
            warn!(needed, "arena exhausted, rejecting put");
            return Err(OpalError::StoreFull {
                needed: needed as usize,
            });
        };

        self.allocator.write_payload(handle, 0, &header.encode());
        self.allocator
            .write_payload(handle, header.key_offset(), key.as_bytes());
        self.allocator
            .write_payload(handle, header.value_offset(), value.as_bytes());

        self.buckets[bucket] = handle.as_u32();
        self.record_count += 1;

        // Replace semantics: the new record is linked in before any older
        // version is dropped, so a failed allocation above leaves the old
        // record untouched.
        self.unlink_after(handle, hash, key);
        Ok(())
    }

    /// Frees the first record matching `key` strictly after `start` on its
    /// chain, if any.
    fn unlink_after(&mut self, start: Handle, hash: KeyHash, key: &Key) {
        let mut prev = start;
        let mut cursor = self.read_header(start).next;
        while cursor != 0 {
            let handle = Handle::from_u32(cursor);
            let header = self.read_header(handle);
            if self.matches(handle, &header, hash, key) {
                self.allocator
                    .write_payload(prev, NEXT_FIELD_OFFSET, &header.next.to_le_bytes());
                self.allocator.free(handle);
                self.record_count -= 1;
                return;
            }
            prev = handle;
            cursor = header.next;
        }
    }

    /// Looks up the value stored under `key`.
    ///
    /// # Errors
    ///
    /// [`OpalError::KeyNotFound`] if no record matches.
    pub fn get(&self, key: &Key) -> OpalResult<Value> {
        let hash = KeyHash::of(key);
        let mut cursor = self.buckets[hash.bucket(self.buckets.len())];

        while cursor != 0 {
            let handle = Handle::from_u32(cursor);
            let header = self.read_header(handle);
            if self.matches(handle, &header, hash, key) {
                let value = self.allocator.read_payload(
                    handle,
                    header.value_offset(),
                    u32::from(header.val_len),
                );
                return Ok(Value::from_bytes(value));
            }
            cursor = header.next;
        }
        Err(OpalError::KeyNotFound)
    }

    /// Removes the record stored under `key` and returns its block to the
    /// arena.
    ///
    /// # Errors
    ///
    /// [`OpalError::KeyNotFound`] if no record matches.
    pub fn del(&mut self, key: &Key) -> OpalResult<()> {
        let hash = KeyHash::of(key);
        let bucket = hash.bucket(self.buckets.len());

        let mut prev: Option<Handle> = None;
        let mut cursor = self.buckets[bucket];
        while cursor != 0 {
            let handle = Handle::from_u32(cursor);
            let header = self.read_header(handle);
            if self.matches(handle, &header, hash, key) {
                match prev {
                    None => self.buckets[bucket] = header.next,
                    Some(prev_handle) => self.allocator.write_payload(
                        prev_handle,
                        NEXT_FIELD_OFFSET,
                        &header.next.to_le_bytes(),
                    ),
                }
                self.allocator.free(handle);
                self.record_count -= 1;
                return Ok(());
            }
            prev = Some(handle);
            cursor = header.next;
        }
        Err(OpalError::KeyNotFound)
    }

    /// Decodes the record header behind `handle`.
    fn read_header(&self, handle: Handle) -> RecordHeader {
        RecordHeader::decode(
            self.allocator
                .read_payload(handle, 0, RECORD_HEADER_SIZE as u32),
        )
    }

    /// Returns true if the record behind `handle` stores `key`.
    fn matches(&self, handle: Handle, header: &RecordHeader, hash: KeyHash, key: &Key) -> bool {
        header.key_hash == hash
            && usize::from(header.key_len) == key.len()
            && self
                .allocator
                .read_payload(handle, header.key_offset(), u32::from(header.key_len))
                == key.as_bytes()
    }
}

impl std::fmt::Debug for Tablet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablet")
            .field("buckets", &self.buckets.len())
            .field("records", &self.record_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::constants::{FREE_TABLE_SIZE, MAX_BLOCK_SIZE};

    fn arena_buf(blocks: u32) -> Vec<u8> {
        vec![0u8; (FREE_TABLE_SIZE + blocks * MAX_BLOCK_SIZE) as usize]
    }

    fn key(s: &str) -> Key {
        Key::from_bytes(s.as_bytes())
    }

    fn value(s: &str) -> Value {
        Value::from_bytes(s.as_bytes())
    }

    #[test]
    fn test_put_get_roundtrip() {
        let mut buf = arena_buf(1);
        let mut tablet = Tablet::bootstrap(Allocator::new(&mut buf), 64);

        tablet.put(&key("alpha"), &value("one")).unwrap();
        tablet.put(&key("beta"), &value("two")).unwrap();

        assert_eq!(tablet.get(&key("alpha")).unwrap().as_bytes(), b"one");
        assert_eq!(tablet.get(&key("beta")).unwrap().as_bytes(), b"two");
        assert_eq!(tablet.len(), 2);
    }

    #[test]
    fn test_get_missing_key() {
        let mut buf = arena_buf(1);
        let tablet = Tablet::bootstrap(Allocator::new(&mut buf), 64);
        assert!(matches!(
            tablet.get(&key("ghost")),
            Err(OpalError::KeyNotFound)
        ));
    }

    #[test]
    fn test_put_replaces() {
        let mut buf = arena_buf(1);
        let mut tablet = Tablet::bootstrap(Allocator::new(&mut buf), 64);

        tablet.put(&key("k"), &value("old")).unwrap();
        tablet.put(&key("k"), &value("new")).unwrap();

        assert_eq!(tablet.get(&key("k")).unwrap().as_bytes(), b"new");
        assert_eq!(tablet.len(), 1);
    }

    #[test]
    fn test_del_frees_and_unlinks() {
        let mut buf = arena_buf(1);
        let mut tablet = Tablet::bootstrap(Allocator::new(&mut buf), 64);

        tablet.put(&key("a"), &value("1")).unwrap();
        tablet.put(&key("b"), &value("2")).unwrap();
        tablet.del(&key("a")).unwrap();

        assert!(matches!(tablet.get(&key("a")), Err(OpalError::KeyNotFound)));
        assert_eq!(tablet.get(&key("b")).unwrap().as_bytes(), b"2");
        assert_eq!(tablet.len(), 1);
        assert!(matches!(tablet.del(&key("a")), Err(OpalError::KeyNotFound)));
    }

    #[test]
    fn test_chain_collisions() {
        let mut buf = arena_buf(1);
        // A single bucket forces every record onto one chain.
        let mut tablet = Tablet::bootstrap(Allocator::new(&mut buf), 1);

        for i in 0..32 {
            tablet
                .put(&key(&format!("key-{i}")), &value(&format!("val-{i}")))
                .unwrap();
        }
        for i in 0..32 {
            assert_eq!(
                tablet.get(&key(&format!("key-{i}"))).unwrap().as_bytes(),
                format!("val-{i}").as_bytes()
            );
        }

        // Delete from the middle of the chain, then both ends.
        tablet.del(&key("key-15")).unwrap();
        tablet.del(&key("key-0")).unwrap();
        tablet.del(&key("key-31")).unwrap();
        assert_eq!(tablet.len(), 29);
        assert!(tablet.get(&key("key-16")).is_ok());
    }

    #[test]
    fn test_rejects_oversized_records() {
        let mut buf = arena_buf(1);
        let mut tablet = Tablet::bootstrap(Allocator::new(&mut buf), 64);

        let big_key = Key::from_vec(vec![b'k'; MAX_KEY_SIZE + 1]);
        assert!(matches!(
            tablet.put(&big_key, &value("v")),
            Err(OpalError::KeyTooLarge { .. })
        ));

        let big_value = Value::from_vec(vec![b'v'; MAX_VALUE_SIZE + 1]);
        assert!(matches!(
            tablet.put(&key("k"), &big_value),
            Err(OpalError::ValueTooLarge { .. })
        ));
        assert!(tablet.is_empty());
    }

    #[test]
    fn test_store_full_is_reported_and_recoverable() {
        let mut buf = arena_buf(1);
        let mut tablet = Tablet::bootstrap(Allocator::new(&mut buf), 16);

        // Fill the single maximal block with large values.
        let filler = Value::from_vec(vec![0u8; MAX_VALUE_SIZE]);
        let mut stored = 0;
        loop {
            match tablet.put(&key(&format!("fill-{stored}")), &filler) {
                Ok(()) => stored += 1,
                Err(OpalError::StoreFull { .. }) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(stored > 0);

        // Freeing one record makes room again.
        tablet.del(&key("fill-0")).unwrap();
        tablet.put(&key("retry"), &filler).unwrap();
    }

    #[test]
    fn test_empty_value_roundtrip() {
        let mut buf = arena_buf(1);
        let mut tablet = Tablet::bootstrap(Allocator::new(&mut buf), 64);

        tablet.put(&key("empty"), &Value::empty()).unwrap();
        assert!(tablet.get(&key("empty")).unwrap().is_empty());
    }
}
