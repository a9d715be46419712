//! System-wide constants for Opal.
//!
//! The arena geometry constants are compile-time contracts shared by the
//! allocator and every consumer of it; they are never negotiated at runtime.

// =============================================================================
// Arena Geometry
// =============================================================================

/// Total size of one storage arena in bytes (64 MiB).
///
/// Each storage node owns one arena per tablet it serves. The arena is a
/// single contiguous mapping of persistent memory, carved into the free-list
/// table followed by the block data region.
pub const ARENA_SIZE: u32 = 64 * 1024 * 1024;

/// Maximum size of a single block in bytes (1 MiB), header included.
///
/// The bootstrap partitions the data region into blocks of exactly this
/// size, and coalescing never produces a block larger than it, so every
/// block size is representable in the populated range of the free-list
/// table.
pub const MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// Allocation granularity in bytes.
///
/// Every block size is a multiple of this. The minimum free block must hold
/// a header word, two link words, and a footer word, which is what fixes
/// the granularity at 16.
pub const ALLOC_GRANULARITY: u32 = 16;

/// Size of the block header word in bytes.
///
/// Allocated blocks pay exactly this much metadata overhead.
pub const BLOCK_HEADER_SIZE: u32 = 4;

/// Number of entries in the free-list head table.
///
/// One entry per size class in `[ALLOC_GRANULARITY, MAX_BLOCK_SIZE]`, plus
/// reserved headroom classes above `MAX_BLOCK_SIZE` that are never
/// populated. The headroom is sized so the table occupies exactly
/// `MAX_BLOCK_SIZE` bytes, which keeps the data region an exact multiple
/// of `MAX_BLOCK_SIZE`.
pub const NUM_SIZE_CLASSES: u32 = 4 * MAX_BLOCK_SIZE / ALLOC_GRANULARITY;

/// Byte size of the free-list head table at the front of the arena.
pub const FREE_TABLE_SIZE: u32 = NUM_SIZE_CLASSES * 4;

/// Byte size of the block data region.
pub const DATA_REGION_SIZE: u32 = ARENA_SIZE - FREE_TABLE_SIZE;

/// Largest payload a single allocation can return.
pub const MAX_PAYLOAD_SIZE: u32 = MAX_BLOCK_SIZE - BLOCK_HEADER_SIZE;

// =============================================================================
// Key and Value Limits
// =============================================================================

/// Maximum key size in bytes (16 KiB).
///
/// Record headers store the key length in 16 bits; the limit is kept well
/// under that so a maximal key plus a maximal value still fits one block.
pub const MAX_KEY_SIZE: usize = 16 * 1024;

/// Maximum value size in bytes (64 KiB - 1).
///
/// Record headers store the value length in 16 bits.
pub const MAX_VALUE_SIZE: usize = 64 * 1024 - 1;

// =============================================================================
// Tablet Constants
// =============================================================================

/// Number of hash buckets per tablet.
pub const TABLET_BUCKET_COUNT: usize = 64 * 1024;

// =============================================================================
// Cluster Constants
// =============================================================================

/// Maximum number of storage nodes in a cluster.
pub const MAX_CLUSTER_SIZE: usize = 64;

/// Default TCP port of the cluster coordinator.
pub const DEFAULT_COORD_PORT: u16 = 9680;

/// Default number of tablets the key-hash space is split into.
///
/// Kept a power of two so equal-width ranges divide the 64-bit hash space
/// exactly.
pub const DEFAULT_TABLET_COUNT: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_partition_is_exact() {
        // The free-list table must end on a block boundary and the data
        // region must tile exactly into maximal blocks.
        assert_eq!(FREE_TABLE_SIZE, MAX_BLOCK_SIZE);
        assert_eq!(DATA_REGION_SIZE % MAX_BLOCK_SIZE, 0);
        assert!(DATA_REGION_SIZE > 0);
    }

    #[test]
    fn granularity_holds_free_block_metadata() {
        // header + prev + next + footer
        assert_eq!(ALLOC_GRANULARITY, 4 * BLOCK_HEADER_SIZE);
        assert_eq!(MAX_BLOCK_SIZE % ALLOC_GRANULARITY, 0);
    }

    #[test]
    fn class_table_covers_max_block() {
        // The populated range [granularity, MAX_BLOCK_SIZE] must fit the
        // table with headroom to spare.
        let top_class = MAX_BLOCK_SIZE / ALLOC_GRANULARITY - 1;
        assert!(top_class < NUM_SIZE_CLASSES);
    }

    #[test]
    fn record_limits_fit_one_block() {
        assert!(MAX_KEY_SIZE <= u16::MAX as usize);
        assert!(MAX_VALUE_SIZE <= u16::MAX as usize);
        assert!((MAX_KEY_SIZE + MAX_VALUE_SIZE) < MAX_PAYLOAD_SIZE as usize);
    }

    #[test]
    fn tablet_count_divides_hash_space() {
        assert!(DEFAULT_TABLET_COUNT.is_power_of_two());
        assert!(TABLET_BUCKET_COUNT.is_power_of_two());
    }
}
