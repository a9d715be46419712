//! Block header/footer encoding and block references.
//!
//! Every block starts with a 4-byte header word packing two fields:
//!
//! ```text
//! bit  31     "previous block (in address order) is currently free"
//! bits 0-30   this block's size in bytes, header included
//! ```
//!
//! Allocated blocks carry nothing else: the remaining `size - 4` bytes are
//! caller payload. Free blocks embed their free-list links right after the
//! header and end with a footer word holding the size alone:
//!
//! ```text
//! Offset  Size  Field (free block)
//! ------  ----  -----
//!   0       4   header word (prev-free bit | size)
//!   4       4   prev link (arena offset, 0 = list head)
//!   8       4   next link (arena offset, 0 = list end)
//!  ...          unused
//! size-4    4   footer (size, no flag)
//! ```
//!
//! The footer is only ever read while coalescing, and only when the next
//! block's header says the previous block is free, so allocated blocks can
//! safely let payload bytes occupy the footer position.
//!
//! The packed representation never leaves this module: the rest of the
//! allocator works with the decoded [`BlockHeader`] struct and with typed
//! offsets.

use opal_common::constants::BLOCK_HEADER_SIZE;

/// Byte offset of the `prev` free-list link inside a free block.
pub(crate) const PREV_LINK_OFFSET: u32 = 4;

/// Byte offset of the `next` free-list link inside a free block.
pub(crate) const NEXT_LINK_OFFSET: u32 = 8;

/// An arena-relative block offset.
///
/// Offset 0 lies inside the free-list head table and can never address a
/// block, which makes it a safe null sentinel for list links.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockOffset(u32);

impl BlockOffset {
    /// The null sentinel.
    pub(crate) const NULL: Self = Self(0);

    #[inline]
    pub(crate) const fn new(offset: u32) -> Self {
        Self(offset)
    }

    #[inline]
    pub(crate) const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Debug for BlockOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "BlockOffset(NULL)")
        } else {
            write!(f, "BlockOffset({:#x})", self.0)
        }
    }
}

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    /// True if the block immediately preceding this one (by address) is
    /// currently free.
    pub prev_free: bool,
    /// This block's size in bytes, header word included.
    pub size: u32,
}

impl BlockHeader {
    /// Mask of the prev-free flag bit.
    pub(crate) const FREE_MASK: u32 = 1 << 31;

    /// Mask of the size field.
    pub(crate) const SIZE_MASK: u32 = !Self::FREE_MASK;

    /// Packs the header into its word representation.
    #[inline]
    pub(crate) fn encode(self) -> u32 {
        debug_assert_eq!(self.size & Self::FREE_MASK, 0, "block size overflows 31 bits");
        let flag = if self.prev_free { Self::FREE_MASK } else { 0 };
        flag | (self.size & Self::SIZE_MASK)
    }

    /// Unpacks a header word.
    #[inline]
    pub(crate) fn decode(word: u32) -> Self {
        Self {
            prev_free: word & Self::FREE_MASK != 0,
            size: word & Self::SIZE_MASK,
        }
    }
}

/// An opaque reference to an allocated block's payload.
///
/// Handles are produced by [`Allocator::alloc`](crate::Allocator::alloc)
/// and consumed by [`Allocator::free`](crate::Allocator::free) and the
/// payload accessors. A handle is only meaningful on the arena that issued
/// it; passing a handle to a different arena, freeing it twice, or
/// fabricating one is a caller error the allocator detects where it can and
/// treats as fatal.
///
/// The raw form ([`as_u32`](Self::as_u32)/[`from_u32`](Self::from_u32))
/// exists so consumers can embed handles inside stored records (for
/// example, chaining records into a hash bucket); it is an arena-relative
/// offset and stays valid across process restarts for a persistent arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    /// Returns the raw arena-relative payload offset.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Reconstructs a handle from its raw form.
    ///
    /// The value must have been obtained from [`as_u32`](Self::as_u32) on a
    /// handle of the same arena.
    #[inline]
    #[must_use]
    pub const fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    /// The block this handle's payload belongs to.
    #[inline]
    pub(crate) const fn block(self) -> BlockOffset {
        BlockOffset::new(self.0 - BLOCK_HEADER_SIZE)
    }

    /// The handle for a block's payload.
    #[inline]
    pub(crate) const fn for_block(block: BlockOffset) -> Self {
        Self(block.get() + BLOCK_HEADER_SIZE)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::constants::{ALLOC_GRANULARITY, MAX_BLOCK_SIZE};

    #[test]
    fn test_encode_decode_roundtrip_across_size_range() {
        // Every representable size at and around the class boundaries,
        // with both flag states.
        let mut sizes = vec![
            ALLOC_GRANULARITY,
            ALLOC_GRANULARITY * 2,
            MAX_BLOCK_SIZE - ALLOC_GRANULARITY,
            MAX_BLOCK_SIZE,
        ];
        let mut size = ALLOC_GRANULARITY;
        while size <= MAX_BLOCK_SIZE {
            sizes.push(size);
            size *= 2;
        }

        for &size in &sizes {
            for prev_free in [false, true] {
                let header = BlockHeader { prev_free, size };
                let decoded = BlockHeader::decode(header.encode());
                assert_eq!(decoded, header, "size={size} prev_free={prev_free}");
            }
        }
    }

    #[test]
    fn test_flag_bit_does_not_leak_into_size() {
        let word = BlockHeader {
            prev_free: true,
            size: 48,
        }
        .encode();
        assert_eq!(word & BlockHeader::SIZE_MASK, 48);
        assert_ne!(word & BlockHeader::FREE_MASK, 0);

        let word = BlockHeader {
            prev_free: false,
            size: 48,
        }
        .encode();
        assert_eq!(word, 48);
    }

    #[test]
    fn test_decode_is_total() {
        // Any word decodes without loss of the low 31 bits.
        let header = BlockHeader::decode(u32::MAX);
        assert!(header.prev_free);
        assert_eq!(header.size, BlockHeader::SIZE_MASK);
    }

    #[test]
    fn test_handle_block_mapping() {
        let block = BlockOffset::new(0x100);
        let handle = Handle::for_block(block);
        assert_eq!(handle.as_u32(), 0x104);
        assert_eq!(handle.block(), block);
        assert_eq!(Handle::from_u32(handle.as_u32()), handle);
    }

    #[test]
    fn test_null_block_offset() {
        assert!(BlockOffset::NULL.is_null());
        assert!(!BlockOffset::new(16).is_null());
    }
}
