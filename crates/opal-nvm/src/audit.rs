//! Arena invariant auditing.
//!
//! [`verify`] walks the data region address-ordered and recomputes every
//! relationship the allocator relies on: block tiling, header sizes,
//! boundary-tag agreement, footer/header agreement on free blocks,
//! free-list membership, link symmetry, and the coalescing guarantee that
//! no two adjacent free blocks mergeable within `MAX_BLOCK_SIZE` coexist.
//!
//! The walk is read-only and linear in the number of blocks plus the size
//! of the class table. Tests call it after every operation; it is also a
//! usable diagnostic for a suspect arena.

use std::collections::BTreeMap;
use thiserror::Error;

use opal_common::constants::{ALLOC_GRANULARITY, MAX_BLOCK_SIZE, NUM_SIZE_CLASSES};

use crate::allocator::Allocator;
use crate::block::{BlockHeader, BlockOffset, NEXT_LINK_OFFSET, PREV_LINK_OFFSET};
use crate::free_list::FreeLists;

/// An invariant violation found by [`verify`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuditError {
    /// A block header carries an impossible size.
    #[error("block at {offset:#x}: invalid size {size}")]
    BadBlockSize {
        /// Block offset.
        offset: u32,
        /// The invalid size.
        size: u32,
    },

    /// A block extends past the data region end.
    #[error("block at {offset:#x}: size {size} overruns the data region")]
    Overrun {
        /// Block offset.
        offset: u32,
        /// The block's claimed size.
        size: u32,
    },

    /// A block's previous-is-free bit disagrees with its predecessor's
    /// actual state.
    #[error("block at {offset:#x}: prev-free bit is {actual}, predecessor free is {expected}")]
    TagMismatch {
        /// Block offset.
        offset: u32,
        /// The predecessor's actual state.
        expected: bool,
        /// The bit found in the header.
        actual: bool,
    },

    /// A free block's footer disagrees with its header.
    #[error("free block at {offset:#x}: footer {footer} != header size {size}")]
    FooterMismatch {
        /// Block offset.
        offset: u32,
        /// Header size field.
        size: u32,
        /// Footer word.
        footer: u32,
    },

    /// Two adjacent free blocks should have been coalesced.
    #[error("adjacent free blocks at {left:#x} and {right:#x} fit one block and are unmerged")]
    UnmergedNeighbors {
        /// Left block offset.
        left: u32,
        /// Right block offset.
        right: u32,
    },

    /// A free block is missing from its class's list.
    #[error("free block at {offset:#x} is not on its class list")]
    NotListed {
        /// Block offset.
        offset: u32,
    },

    /// A class list references a block that is not free or not of that
    /// class.
    #[error("class {class} list references {offset:#x}, which is not a free block of that class")]
    BadListEntry {
        /// Class index.
        class: u32,
        /// The bad entry.
        offset: u32,
    },

    /// `a.next == b` without `b.prev == a`.
    #[error("asymmetric links at {offset:#x} on class {class} list")]
    AsymmetricLinks {
        /// Class index.
        class: u32,
        /// Offending node.
        offset: u32,
    },

    /// A class list does not terminate (cycle).
    #[error("class {class} list does not terminate")]
    UnterminatedList {
        /// Class index.
        class: u32,
    },

    /// A reserved headroom class above `MAX_BLOCK_SIZE` is populated.
    #[error("headroom class {class} is populated")]
    HeadroomPopulated {
        /// Class index.
        class: u32,
    },
}

/// Summary of a verified arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Number of allocated blocks.
    pub allocated_blocks: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Bytes in allocated blocks, headers included.
    pub allocated_bytes: u64,
    /// Bytes in free blocks.
    pub free_bytes: u64,
    /// Free block count per populated size class.
    pub free_by_class: BTreeMap<u32, usize>,
}

/// Checks every arena invariant, returning a population summary.
///
/// # Errors
///
/// Returns the first violation found. A violation means the arena's
/// boundary tags are corrupt; the allocator's own fail-fast asserts
/// should normally have fired first.
pub fn verify(allocator: &Allocator<'_>) -> Result<AuditReport, AuditError> {
    let arena = allocator.arena();
    let data_end = allocator.data_end();

    let mut report = AuditReport::default();
    // offset -> size of every free block discovered by the address walk
    let mut free_blocks: BTreeMap<u32, u32> = BTreeMap::new();

    let mut offset = allocator.data_start();
    let mut prev_was_free = false; // the table precedes the first block
    let mut last_free: Option<(u32, u32)> = None;

    while offset < data_end {
        let header = BlockHeader::decode(arena.read_u32(offset));
        let size = header.size;

        if size < ALLOC_GRANULARITY || size > MAX_BLOCK_SIZE || size % ALLOC_GRANULARITY != 0 {
            return Err(AuditError::BadBlockSize { offset, size });
        }
        if u64::from(offset) + u64::from(size) > u64::from(data_end) {
            return Err(AuditError::Overrun { offset, size });
        }
        if header.prev_free != prev_was_free {
            return Err(AuditError::TagMismatch {
                offset,
                expected: prev_was_free,
                actual: header.prev_free,
            });
        }

        let is_free = allocator.read_free_tag(BlockOffset::new(offset), size);
        if is_free {
            let footer = arena.read_u32(offset + size - 4);
            if footer != size {
                return Err(AuditError::FooterMismatch {
                    offset,
                    size,
                    footer,
                });
            }
            if let Some((left, left_size)) = last_free {
                if left_size + size <= MAX_BLOCK_SIZE {
                    return Err(AuditError::UnmergedNeighbors {
                        left,
                        right: offset,
                    });
                }
            }
            free_blocks.insert(offset, size);
            last_free = Some((offset, size));
            report.free_blocks += 1;
            report.free_bytes += u64::from(size);
            *report
                .free_by_class
                .entry(FreeLists::class_of(size))
                .or_default() += 1;
        } else {
            last_free = None;
            report.allocated_blocks += 1;
            report.allocated_bytes += u64::from(size);
        }

        prev_was_free = is_free;
        offset += size;
    }
    // The walk is self-describing, so reaching data_end exactly proves the
    // blocks tile the region with no gaps or overlaps.
    debug_assert_eq!(offset, data_end);

    verify_lists(allocator, &free_blocks)?;

    Ok(report)
}

/// Cross-checks the class lists against the address walk's findings.
fn verify_lists(
    allocator: &Allocator<'_>,
    free_blocks: &BTreeMap<u32, u32>,
) -> Result<(), AuditError> {
    let arena = allocator.arena();
    let top_class = FreeLists::class_of(MAX_BLOCK_SIZE);
    let mut listed = 0usize;

    for class in 0..NUM_SIZE_CLASSES {
        let mut node = FreeLists::head(arena, class);

        if class > top_class && !node.is_null() {
            return Err(AuditError::HeadroomPopulated { class });
        }

        let mut prev = BlockOffset::NULL;
        let mut steps = 0usize;
        while !node.is_null() {
            steps += 1;
            if steps > free_blocks.len() {
                return Err(AuditError::UnterminatedList { class });
            }

            match free_blocks.get(&node.get()) {
                Some(&size) if FreeLists::class_of(size) == class => {}
                _ => {
                    return Err(AuditError::BadListEntry {
                        class,
                        offset: node.get(),
                    });
                }
            }

            let back = arena.read_u32(node.get() + PREV_LINK_OFFSET);
            if back != prev.get() {
                return Err(AuditError::AsymmetricLinks {
                    class,
                    offset: node.get(),
                });
            }

            listed += 1;
            prev = node;
            node = BlockOffset::new(arena.read_u32(node.get() + NEXT_LINK_OFFSET));
        }
    }

    if listed != free_blocks.len() {
        // Some free block never appeared on any list; report the lowest.
        // (Duplicates are impossible: a second listing would either break
        // class membership or link symmetry above.)
        for (&offset, &size) in free_blocks {
            if !on_list(allocator, offset, size) {
                return Err(AuditError::NotListed { offset });
            }
        }
    }
    Ok(())
}

/// Returns true if the block appears on its class's list.
fn on_list(allocator: &Allocator<'_>, offset: u32, size: u32) -> bool {
    let arena = allocator.arena();
    let class = FreeLists::class_of(size);
    let mut node = FreeLists::head(arena, class);
    let mut steps = 0u32;
    while !node.is_null() && steps <= NUM_SIZE_CLASSES {
        if node.get() == offset {
            return true;
        }
        steps += 1;
        node = BlockOffset::new(arena.read_u32(node.get() + NEXT_LINK_OFFSET));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::constants::FREE_TABLE_SIZE;

    fn small_arena_buf() -> Vec<u8> {
        vec![0u8; (FREE_TABLE_SIZE + 2 * MAX_BLOCK_SIZE) as usize]
    }

    #[test]
    fn test_fresh_format_verifies() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        let report = verify(&allocator).unwrap();
        assert_eq!(report.allocated_blocks, 0);
        assert_eq!(report.free_blocks, 2);
        assert_eq!(report.free_bytes, u64::from(2 * MAX_BLOCK_SIZE));
        assert_eq!(
            report.free_by_class,
            BTreeMap::from([(FreeLists::class_of(MAX_BLOCK_SIZE), 2)])
        );
    }

    #[test]
    fn test_detects_header_corruption() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();
        let handle = allocator.alloc(40).unwrap();

        // Smash the allocated block's header size field (12 is not a
        // legal block size).
        let block = handle.as_u32() - 4;
        let word = allocator.arena().read_u32(block);
        let smashed = (word & BlockHeader::FREE_MASK) | 12;
        allocator.arena_mut_for_tests().write_u32(block, smashed);

        assert!(matches!(
            verify(&allocator),
            Err(AuditError::BadBlockSize { .. })
        ));
    }

    #[test]
    fn test_detects_footer_corruption() {
        let mut buf = small_arena_buf();
        let mut allocator = Allocator::new(&mut buf);
        allocator.format();

        // Corrupt the footer of the first (free) maximal block.
        let block = allocator.data_start();
        allocator
            .arena_mut_for_tests()
            .write_u32(block + MAX_BLOCK_SIZE - 4, MAX_BLOCK_SIZE - 16);

        assert!(matches!(
            verify(&allocator),
            Err(AuditError::FooterMismatch { .. })
        ));
    }
}
