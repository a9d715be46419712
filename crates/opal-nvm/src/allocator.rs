//! The arena allocator.
//!
//! One [`Allocator`] instance manages one arena: the free-list head table
//! at offset 0, then a data region tiled by blocks. Allocation pops a
//! block from the smallest suitable size class, splitting a larger block
//! when the exact class is empty; freeing coalesces with free neighbors
//! discovered through the boundary tags and pushes the result back.
//!
//! # Concurrency
//!
//! The allocator has no internal synchronization. A given instance must be
//! driven by a single writer at any instant; distinct instances are fully
//! independent. Callers needing shared access wrap the whole instance in
//! one lock; the multi-word boundary-tag updates are not decomposable
//! into smaller atomic steps.
//!
//! # Failure model
//!
//! Capacity exhaustion is the one expected failure and is reported as
//! `None` from [`alloc`](Allocator::alloc). Everything else (oversized
//! requests, double frees, foreign handles, a malformed arena length) is
//! a caller contract violation and panics immediately rather than risking
//! silent corruption of the boundary tags.

use opal_common::constants::{
    ALLOC_GRANULARITY, BLOCK_HEADER_SIZE, FREE_TABLE_SIZE, MAX_BLOCK_SIZE, MAX_PAYLOAD_SIZE,
};

use crate::arena::{Arena, WriteObserver};
use crate::block::{BlockHeader, BlockOffset, Handle};
use crate::free_list::FreeLists;

/// Segregated free-list allocator over one arena.
///
/// # Example
///
/// ```rust
/// use opal_common::constants::{FREE_TABLE_SIZE, MAX_BLOCK_SIZE};
/// use opal_nvm::Allocator;
///
/// let mut bytes = vec![0u8; (FREE_TABLE_SIZE + 2 * MAX_BLOCK_SIZE) as usize];
/// let mut allocator = Allocator::new(&mut bytes);
/// allocator.format();
///
/// let handle = allocator.alloc(40).expect("fresh arena");
/// allocator.write_payload(handle, 0, b"hello");
/// assert_eq!(allocator.read_payload(handle, 0, 5), b"hello");
/// allocator.free(handle);
/// ```
pub struct Allocator<'a> {
    arena: Arena<'a>,
    /// Free status of the last block in the data region.
    ///
    /// Every other block's status lives in its successor's header bit; the
    /// last block has no successor, so the bit lives here instead of one
    /// word past the arena end.
    tail_free: bool,
}

impl<'a> Allocator<'a> {
    /// Creates an allocator over a caller-owned arena mapping.
    ///
    /// The mapping is not interpreted until [`format`](Self::format) is
    /// called; a freshly mapped arena must be formatted exactly once
    /// before its first allocation.
    ///
    /// # Panics
    ///
    /// Panics unless the mapping is long enough for the head table plus at
    /// least one maximal block, with a data region that is an exact
    /// multiple of `MAX_BLOCK_SIZE` (a fractional tail block would be
    /// unreachable).
    pub fn new(bytes: &'a mut [u8]) -> Self {
        let len = bytes.len();
        assert!(len <= u32::MAX as usize, "arena exceeds 32-bit offsets");
        assert!(
            len as u32 > FREE_TABLE_SIZE,
            "arena too small for the free-list table"
        );
        let data_len = len as u32 - FREE_TABLE_SIZE;
        assert!(
            data_len % MAX_BLOCK_SIZE == 0,
            "data region ({data_len} bytes) must be a multiple of MAX_BLOCK_SIZE"
        );

        Self {
            arena: Arena::new(bytes),
            tail_free: false,
        }
    }

    /// Installs a write observer on the underlying arena.
    pub fn set_observer(&mut self, observer: Box<dyn WriteObserver>) {
        self.arena.set_observer(observer);
    }

    /// Removes and returns the current write observer.
    pub fn take_observer(&mut self) -> Option<Box<dyn WriteObserver>> {
        self.arena.take_observer()
    }

    /// First byte of the data region.
    #[inline]
    pub(crate) fn data_start(&self) -> u32 {
        FREE_TABLE_SIZE
    }

    /// One past the last byte of the data region.
    #[inline]
    pub(crate) fn data_end(&self) -> u32 {
        self.arena.len()
    }

    #[inline]
    pub(crate) fn arena(&self) -> &Arena<'a> {
        &self.arena
    }

    #[inline]
    pub(crate) fn tail_free(&self) -> bool {
        self.tail_free
    }

    /// Raw arena access for corruption-injection tests.
    #[cfg(test)]
    pub(crate) fn arena_mut_for_tests(&mut self) -> &mut Arena<'a> {
        &mut self.arena
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// (Re)initializes the arena to the all-free bootstrap state.
    ///
    /// Clears the free-list table and partitions the data region into
    /// maximal free blocks, discarding any existing allocations. The lists
    /// are filled LIFO, so the highest-addressed block ends up at the head
    /// of the maximal class.
    pub fn format(&mut self) {
        self.arena.fill(0, FREE_TABLE_SIZE, 0);

        let top_class = FreeLists::class_of(MAX_BLOCK_SIZE);
        let mut prev_free = false; // the table precedes the first block
        let mut block = self.data_start();
        while block < self.data_end() {
            self.write_header(
                BlockOffset::new(block),
                BlockHeader {
                    prev_free,
                    size: MAX_BLOCK_SIZE,
                },
            );
            self.write_footer(BlockOffset::new(block), MAX_BLOCK_SIZE);
            FreeLists::push_front(&mut self.arena, top_class, BlockOffset::new(block));
            prev_free = true;
            block += MAX_BLOCK_SIZE;
        }
        self.tail_free = true;
    }

    /// Allocates a block with at least `payload_size` usable bytes.
    ///
    /// Returns `None` when no free block can satisfy the request (capacity
    /// exhaustion), an expected and recoverable outcome that callers handle
    /// as normal control flow.
    ///
    /// # Panics
    ///
    /// Panics if `payload_size` is zero or the block would exceed
    /// `MAX_BLOCK_SIZE`; oversized records must be rejected by the caller
    /// before reaching the arena.
    pub fn alloc(&mut self, payload_size: u32) -> Option<Handle> {
        assert!(payload_size > 0, "zero-size allocation");
        assert!(
            payload_size <= MAX_PAYLOAD_SIZE,
            "payload of {payload_size} bytes exceeds the maximum block size"
        );
        let needed = round_up(payload_size + BLOCK_HEADER_SIZE, ALLOC_GRANULARITY);

        self.alloc_block(needed).map(Handle::for_block)
    }

    /// Releases a block previously returned by [`alloc`](Self::alloc).
    ///
    /// # Panics
    ///
    /// Panics on a handle that does not reference a live allocated block
    /// of this arena (double free, foreign or fabricated handle), where
    /// that is detectable from the boundary tags.
    pub fn free(&mut self, handle: Handle) {
        let block = self.checked_block(handle);
        let size = self.read_header(block).size;
        assert!(
            !self.read_free_tag(block, size),
            "double free of {handle:?}"
        );
        self.free_block(block);
    }

    /// Returns the usable payload length behind `handle`.
    ///
    /// At least the `payload_size` passed to [`alloc`](Self::alloc); up to
    /// `ALLOC_GRANULARITY - 1` bytes more due to size-class rounding.
    #[must_use]
    pub fn payload_len(&self, handle: Handle) -> u32 {
        let block = self.checked_block(handle);
        let size = self.read_header(block).size;
        assert!(
            !self.read_free_tag(block, size),
            "use of freed handle {handle:?}"
        );
        size - BLOCK_HEADER_SIZE
    }

    /// Reads `len` payload bytes starting at payload offset `at`.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the block's payload.
    #[must_use]
    pub fn read_payload(&self, handle: Handle, at: u32, len: u32) -> &[u8] {
        let payload_len = self.payload_len(handle);
        assert!(
            u64::from(at) + u64::from(len) <= u64::from(payload_len),
            "payload read of {len} bytes at {at} exceeds {payload_len}"
        );
        self.arena.read_bytes(handle.as_u32() + at, len)
    }

    /// Writes `data` into the payload starting at payload offset `at`.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the block's payload.
    pub fn write_payload(&mut self, handle: Handle, at: u32, data: &[u8]) {
        let payload_len = self.payload_len(handle);
        assert!(
            u64::from(at) + data.len() as u64 <= u64::from(payload_len),
            "payload write of {} bytes at {at} exceeds {payload_len}",
            data.len()
        );
        self.arena.write_bytes(handle.as_u32() + at, data);
    }

    // =========================================================================
    // Block-level operations
    // =========================================================================

    /// Finds a block of exactly `needed` bytes, splitting a larger free
    /// block if the exact class is empty.
    fn alloc_block(&mut self, needed: u32) -> Option<BlockOffset> {
        let idx = FreeLists::class_of(needed);
        let top = FreeLists::class_of(MAX_BLOCK_SIZE);

        // Linear scan upward. The worst case is proportional to the number
        // of classes, but in practice the first non-empty class sits close
        // to idx, and large requests have few classes left to scan.
        for class in idx..=top {
            let Some(block) = FreeLists::pop_front(&mut self.arena, class) else {
                continue;
            };
            let block_size = FreeLists::size_of_class(class);
            if class == idx {
                // Exact fit: the block leaves the free state, so its
                // successor's tag must drop.
                self.clear_free_tag(block, block_size);
                return Some(block);
            }
            return Some(self.split_block(block, block_size, needed));
        }
        None
    }

    /// Splits a free block of `block_size` bytes into an allocated head of
    /// `needed` bytes and a free tail remainder.
    ///
    /// The caller has already popped `block` from its class. The returned
    /// allocation is the low-address head of the original extent; the
    /// remainder keeps the high end and joins its own size class. A split
    /// never reaches here with `needed == block_size` (the exact-class
    /// path handles that), so the remainder is always at least one
    /// granule.
    fn split_block(&mut self, block: BlockOffset, block_size: u32, needed: u32) -> BlockOffset {
        debug_assert!(needed < block_size);
        let remainder_size = block_size - needed;
        let remainder = BlockOffset::new(block.get() + needed);

        // The remainder's address predecessor is the allocated head being
        // handed out, so its prev-free bit is clear.
        self.write_header(
            remainder,
            BlockHeader {
                prev_free: false,
                size: remainder_size,
            },
        );
        self.write_footer(remainder, remainder_size);
        FreeLists::push_front(
            &mut self.arena,
            FreeLists::class_of(remainder_size),
            remainder,
        );
        // The block after the original extent still borders free space.
        self.set_free_tag(remainder, remainder_size);

        let prev_free = self.read_header(block).prev_free;
        self.write_header(
            block,
            BlockHeader {
                prev_free,
                size: needed,
            },
        );
        block
    }

    /// Returns a freed block to the free lists, coalescing with whichever
    /// immediate neighbors are free.
    ///
    /// Single pass: at most the left and right neighbor are merged. Any
    /// farther free block was already merged into the immediate neighbor
    /// by the free that produced it. A neighbor is skipped when merging it
    /// would push the block past `MAX_BLOCK_SIZE`, which keeps every block
    /// representable in the class table.
    fn free_block(&mut self, block: BlockOffset) {
        let header = self.read_header(block);
        let mut start = block;
        let mut size = header.size;
        let mut prev_free = header.prev_free;

        // Left neighbor: its size sits in its footer, directly below our
        // header, readable only because the tag bit says it is free.
        if header.prev_free {
            let left_size = self.arena.read_u32(block.get() - 4);
            let left = BlockOffset::new(block.get() - left_size);
            if size + left_size <= MAX_BLOCK_SIZE {
                FreeLists::remove(&mut self.arena, FreeLists::class_of(left_size), left);
                prev_free = self.read_header(left).prev_free;
                start = left;
                size += left_size;
            }
        }

        // Right neighbor: free iff its own successor's tag bit is set.
        let right = BlockOffset::new(block.get() + header.size);
        if right.get() < self.data_end() {
            let right_size = self.read_header(right).size;
            if self.read_free_tag(right, right_size) && size + right_size <= MAX_BLOCK_SIZE {
                FreeLists::remove(&mut self.arena, FreeLists::class_of(right_size), right);
                size += right_size;
            }
        }

        self.write_header(
            start,
            BlockHeader { prev_free, size },
        );
        self.write_footer(start, size);
        FreeLists::push_front(&mut self.arena, FreeLists::class_of(size), start);
        self.set_free_tag(start, size);
    }

    // =========================================================================
    // Boundary tags
    // =========================================================================

    /// Reads the header of `block`.
    #[inline]
    fn read_header(&self, block: BlockOffset) -> BlockHeader {
        BlockHeader::decode(self.arena.read_u32(block.get()))
    }

    /// Writes the header of `block`.
    #[inline]
    fn write_header(&mut self, block: BlockOffset, header: BlockHeader) {
        self.arena.write_u32(block.get(), header.encode());
    }

    /// Writes the footer of a free block of `size` bytes.
    #[inline]
    fn write_footer(&mut self, block: BlockOffset, size: u32) {
        self.arena.write_u32(block.get() + size - 4, size);
    }

    /// Marks `block` (of `size` bytes) free in its successor's header.
    fn set_free_tag(&mut self, block: BlockOffset, size: u32) {
        let next = block.get() + size;
        if next == self.data_end() {
            self.tail_free = true;
        } else {
            let word = self.arena.read_u32(next);
            self.arena.write_u32(next, word | BlockHeader::FREE_MASK);
        }
    }

    /// Marks `block` (of `size` bytes) allocated in its successor's header.
    fn clear_free_tag(&mut self, block: BlockOffset, size: u32) {
        let next = block.get() + size;
        if next == self.data_end() {
            self.tail_free = false;
        } else {
            let word = self.arena.read_u32(next);
            self.arena.write_u32(next, word & !BlockHeader::FREE_MASK);
        }
    }

    /// Returns whether `block` (of `size` bytes) is currently free.
    pub(crate) fn read_free_tag(&self, block: BlockOffset, size: u32) -> bool {
        let next = block.get() + size;
        if next == self.data_end() {
            self.tail_free
        } else {
            self.arena.read_u32(next) & BlockHeader::FREE_MASK != 0
        }
    }

    /// Validates that `handle` plausibly references a block of this arena
    /// and returns the block offset.
    fn checked_block(&self, handle: Handle) -> BlockOffset {
        let block = handle.block();
        assert!(
            block.get() >= self.data_start()
                && block.get() < self.data_end()
                && block.get() % ALLOC_GRANULARITY == 0,
            "foreign handle {handle:?}"
        );
        let size = self.read_header(block).size;
        assert!(
            size >= ALLOC_GRANULARITY
                && size <= MAX_BLOCK_SIZE
                && size % ALLOC_GRANULARITY == 0
                && u64::from(block.get()) + u64::from(size) <= u64::from(self.data_end()),
            "corrupt or foreign handle {handle:?}"
        );
        block
    }
}

impl std::fmt::Debug for Allocator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("arena_len", &self.arena.len())
            .field("data_start", &self.data_start())
            .field("tail_free", &self.tail_free)
            .finish()
    }
}

/// Rounds `value` up to the next multiple of `to` (a power of two).
#[inline]
fn round_up(value: u32, to: u32) -> u32 {
    debug_assert!(to.is_power_of_two());
    (value + to - 1) & !(to - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::constants::MAX_PAYLOAD_SIZE;

    // A small arena keeps these unit tests fast; the integration tests
    // cover the reference 64 MiB geometry.
    fn small_arena_buf() -> Vec<u8> {
        vec![0u8; (FREE_TABLE_SIZE + 2 * MAX_BLOCK_SIZE) as usize]
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(1, 16), 16);
        assert_eq!(round_up(16, 16), 16);
        assert_eq!(round_up(17, 16), 32);
        assert_eq!(round_up(44, 16), 48);
    }

    #[test]
    fn test_format_populates_top_class() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        let top = FreeLists::class_of(MAX_BLOCK_SIZE);
        // LIFO: the head is the last-formatted (highest) block.
        let head = FreeLists::head(allocator.arena(), top);
        assert_eq!(head.get(), allocator.data_end() - MAX_BLOCK_SIZE);
        assert!(allocator.tail_free());
    }

    #[test]
    fn test_alloc_rounds_to_granularity() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        // 12-byte payload + 4-byte header lands exactly on one granule.
        let a = allocator.alloc(12).unwrap();
        assert_eq!(allocator.payload_len(a), 12);

        // One byte more spills into the next class.
        let b = allocator.alloc(13).unwrap();
        assert_eq!(allocator.payload_len(b), 28);
    }

    #[test]
    fn test_payload_roundtrip() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        let handle = allocator.alloc(64).unwrap();
        allocator.write_payload(handle, 0, &[0xAB; 64]);
        allocator.write_payload(handle, 10, b"xyz");
        assert_eq!(allocator.read_payload(handle, 10, 3), b"xyz");
        assert_eq!(allocator.read_payload(handle, 0, 1), &[0xAB]);
    }

    #[test]
    fn test_max_payload_alloc() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        let handle = allocator.alloc(MAX_PAYLOAD_SIZE).unwrap();
        assert_eq!(allocator.payload_len(handle), MAX_PAYLOAD_SIZE);
    }

    #[test]
    #[should_panic(expected = "exceeds the maximum block size")]
    fn test_oversized_alloc_panics() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();
        let _ = allocator.alloc(MAX_PAYLOAD_SIZE + 1);
    }

    #[test]
    #[should_panic(expected = "zero-size allocation")]
    fn test_zero_alloc_panics() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();
        let _ = allocator.alloc(0);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        let handle = allocator.alloc(40).unwrap();
        allocator.free(handle);
        allocator.free(handle);
    }

    #[test]
    #[should_panic(expected = "foreign handle")]
    fn test_foreign_handle_panics() {
        let mut buf = small_arena_buf();
        let allocator = Allocator::new(&mut buf);
        let _ = allocator.payload_len(Handle::from_u32(8));
    }

    #[test]
    #[should_panic(expected = "multiple of MAX_BLOCK_SIZE")]
    fn test_fractional_data_region_rejected() {
        let mut buf = vec![0u8; (FREE_TABLE_SIZE + MAX_BLOCK_SIZE / 2) as usize];
        let _ = Allocator::new(&mut buf);
    }

    #[test]
    #[should_panic(expected = "payload write")]
    fn test_payload_overrun_panics() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        let handle = allocator.alloc(12).unwrap();
        allocator.write_payload(handle, 8, &[0u8; 8]);
    }
}
