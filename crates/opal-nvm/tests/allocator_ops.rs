//! End-to-end allocator behavior: every public operation is followed by a
//! full invariant audit, so any boundary-tag damage surfaces at the
//! operation that caused it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use opal_common::constants::{
    ARENA_SIZE, FREE_TABLE_SIZE, MAX_BLOCK_SIZE, MAX_PAYLOAD_SIZE,
};
use opal_nvm::audit::{self, AuditReport};
use opal_nvm::{Allocator, Handle, ModificationLog};

/// Buffer for an arena whose data region holds `blocks` maximal blocks.
fn arena_buf(blocks: u32) -> Vec<u8> {
    vec![0u8; (FREE_TABLE_SIZE + blocks * MAX_BLOCK_SIZE) as usize]
}

fn checked(allocator: &Allocator<'_>) -> AuditReport {
    audit::verify(allocator).expect("arena invariants violated")
}

#[test]
fn format_leaves_only_maximal_free_blocks() {
    let mut buf = arena_buf(3);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();

    let report = checked(&allocator);
    assert_eq!(report.allocated_blocks, 0);
    assert_eq!(report.free_blocks, 3);
    assert_eq!(report.free_bytes, u64::from(3 * MAX_BLOCK_SIZE));
}

#[test]
fn reformat_discards_allocations() {
    let mut buf = arena_buf(2);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();
    let fresh = checked(&allocator);

    let _a = allocator.alloc(100).unwrap();
    let _b = allocator.alloc(5000).unwrap();
    allocator.format();

    assert_eq!(checked(&allocator), fresh);
}

#[test]
fn exhaustion_and_recovery_on_reference_arena() {
    let mut buf = vec![0u8; ARENA_SIZE as usize];
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();

    let expected = ((ARENA_SIZE - FREE_TABLE_SIZE) / MAX_BLOCK_SIZE) as usize;
    assert_eq!(expected, 63);

    // Maximal allocations succeed exactly once per formatted block.
    let mut handles = Vec::new();
    while let Some(handle) = allocator.alloc(MAX_PAYLOAD_SIZE) {
        handles.push(handle);
    }
    assert_eq!(handles.len(), expected);
    let report = checked(&allocator);
    assert_eq!(report.allocated_blocks, expected);
    assert_eq!(report.free_blocks, 0);

    // Freeing everything restores full capacity.
    for handle in handles.drain(..) {
        allocator.free(handle);
    }
    checked(&allocator);

    while let Some(handle) = allocator.alloc(MAX_PAYLOAD_SIZE) {
        handles.push(handle);
    }
    assert_eq!(handles.len(), expected);
    checked(&allocator);
}

#[test]
fn round_trip_restores_observable_state() {
    let mut buf = arena_buf(2);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();
    let baseline = checked(&allocator);

    for payload in [1u32, 4, 12, 16, 100, 4096, 65536, MAX_PAYLOAD_SIZE] {
        let handle = allocator.alloc(payload).unwrap();
        checked(&allocator);
        allocator.free(handle);
        assert_eq!(
            checked(&allocator),
            baseline,
            "alloc({payload})/free did not restore the arena"
        );
    }
}

#[test]
fn fragmentation_scenario_coalesces_stepwise() {
    let mut buf = arena_buf(1);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();
    let fresh = checked(&allocator);

    // Three same-size blocks carved out of the single maximal block by
    // repeated splits; they end up address-adjacent, low to high.
    let payload = 1020; // block size 1024
    let a = allocator.alloc(payload).unwrap();
    let b = allocator.alloc(payload).unwrap();
    let c = allocator.alloc(payload).unwrap();
    assert_eq!(b.as_u32(), a.as_u32() + 1024);
    assert_eq!(c.as_u32(), b.as_u32() + 1024);

    let report = checked(&allocator);
    assert_eq!(report.allocated_blocks, 3);
    assert_eq!(report.free_blocks, 1); // the tail remainder

    // Free the middle block: both neighbors allocated, nothing merges.
    allocator.free(b);
    let report = checked(&allocator);
    assert_eq!(report.free_blocks, 2);

    // Free A: A and B's space must fuse into one free block.
    allocator.free(a);
    let report = checked(&allocator);
    assert_eq!(report.free_blocks, 2);
    assert!(report.free_by_class.contains_key(&(2048u32 / 16 - 1)));

    // Free C: everything fuses back into one maximal block.
    allocator.free(c);
    assert_eq!(checked(&allocator), fresh);
}

#[test]
fn split_remainder_is_exact_and_usable() {
    let mut buf = arena_buf(1);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();

    let payload = 1020; // block size 1024
    let first = allocator.alloc(payload).unwrap();
    let report = checked(&allocator);
    let remainder = MAX_BLOCK_SIZE - 1024;
    assert_eq!(report.free_by_class, [(remainder / 16 - 1, 1)].into());

    // A request for exactly the remainder pops it whole, no further split.
    let second = allocator.alloc(remainder - 4).unwrap();
    assert_eq!(second.as_u32(), first.as_u32() + 1024);
    let report = checked(&allocator);
    assert_eq!(report.free_blocks, 0);
    assert_eq!(report.allocated_blocks, 2);
}

#[test]
fn class_boundary_requests_share_a_class() {
    let mut buf = arena_buf(1);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();

    // granularity - header = 12: exactly one granule once the header is
    // added; one byte less must land in the same class.
    let a = allocator.alloc(12).unwrap();
    let b = allocator.alloc(11).unwrap();
    assert_eq!(allocator.payload_len(a), allocator.payload_len(b));

    // One byte more crosses into the next class.
    let c = allocator.alloc(13).unwrap();
    assert_eq!(allocator.payload_len(c), allocator.payload_len(a) + 16);
}

#[test]
#[should_panic(expected = "exceeds the maximum block size")]
fn oversized_request_never_touches_the_arena() {
    let mut buf = arena_buf(1);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();
    let _ = allocator.alloc(MAX_BLOCK_SIZE);
}

#[test]
fn payload_contents_survive_neighbor_churn() {
    let mut buf = arena_buf(2);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();

    let keeper = allocator.alloc(256).unwrap();
    let pattern: Vec<u8> = (0..=255).collect();
    allocator.write_payload(keeper, 0, &pattern);

    // Churn allocations around the keeper.
    for _ in 0..50 {
        let x = allocator.alloc(512).unwrap();
        let y = allocator.alloc(64).unwrap();
        allocator.free(x);
        allocator.free(y);
        checked(&allocator);
    }

    assert_eq!(allocator.read_payload(keeper, 0, 256), &pattern[..]);
}

#[test]
fn randomized_alloc_free_preserves_invariants() {
    let mut buf = arena_buf(8);
    let mut allocator = Allocator::new(&mut buf);
    allocator.format();

    let mut rng = StdRng::seed_from_u64(0xA110_C8);
    let mut live: Vec<(Handle, u8)> = Vec::new();

    for step in 0..300 {
        let do_alloc = live.is_empty() || rng.gen_bool(0.6);
        if do_alloc {
            // Mostly record-sized payloads, occasionally huge ones.
            let payload = if rng.gen_bool(0.95) {
                rng.gen_range(1..=2048)
            } else {
                rng.gen_range(2048..=MAX_PAYLOAD_SIZE)
            };
            if let Some(handle) = allocator.alloc(payload) {
                let fill = rng.gen::<u8>();
                allocator.write_payload(handle, 0, &vec![fill; payload as usize]);
                live.push((handle, fill));
            }
        } else {
            let idx = rng.gen_range(0..live.len());
            let (handle, fill) = live.swap_remove(idx);
            let len = allocator.payload_len(handle).min(64);
            assert!(
                allocator
                    .read_payload(handle, 0, len)
                    .iter()
                    .all(|&b| b == fill),
                "payload corrupted before free at step {step}"
            );
            allocator.free(handle);
        }
        checked(&allocator);
    }

    // Drain and confirm we return to a coherent all-free state.
    for (handle, _) in live.drain(..) {
        allocator.free(handle);
    }
    let report = checked(&allocator);
    assert_eq!(report.allocated_blocks, 0);
}

#[test]
fn observer_sees_every_operation_region() {
    let mut buf = arena_buf(1);
    let mut allocator = Allocator::new(&mut buf);

    let log = ModificationLog::new();
    allocator.set_observer(Box::new(log.clone()));

    allocator.format();
    let format_writes = log.write_count();
    assert!(format_writes > 0);
    for (offset, len) in log.regions() {
        assert!(u64::from(offset) + u64::from(len) <= u64::from(FREE_TABLE_SIZE + MAX_BLOCK_SIZE));
    }

    // A split allocation touches a bounded handful of words: remainder
    // header/footer/links, head table, successor tag, our header.
    log.clear();
    let handle = allocator.alloc(40).unwrap();
    let alloc_writes = log.write_count() - format_writes;
    assert!((1..=8).contains(&alloc_writes), "alloc made {alloc_writes} writes");

    // Freeing coalesces with the remainder: header, footer, links, head.
    log.clear();
    allocator.free(handle);
    let free_writes = log.write_count() - format_writes - alloc_writes;
    assert!((1..=8).contains(&free_writes), "free made {free_writes} writes");
}
