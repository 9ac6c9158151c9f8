//! Integration tests for `segment_pool` that exercise the public API only.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::collections::HashSet;
use std::ptr::NonNull;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use segment_pool::{Error, SegmentPool};

const PAYLOAD_SIZE: usize = 48;

fn write_tag(buffer: NonNull<u8>, tag: u64) {
    unsafe { buffer.cast::<u64>().write_unaligned(tag) };
}

fn read_tag(buffer: NonNull<u8>) -> u64 {
    unsafe { buffer.cast::<u64>().read_unaligned() }
}

#[test]
fn growth_is_bounded_by_high_mark() {
    let pool = SegmentPool::builder()
        .payload_size(PAYLOAD_SIZE)
        .buffers_per_segment(4)
        .start_segments(1)
        .low_mark(1)
        .high_mark(3)
        .build()
        .unwrap();

    let mut buffers = Vec::new();

    loop {
        match pool.allocate() {
            Ok(buffer) => buffers.push(buffer),
            Err(Error::CapacityExceeded {
                active_segments,
                high_mark,
            }) => {
                assert_eq!(active_segments, 3);
                assert_eq!(high_mark, 3);
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(buffers.len(), 12);
    assert_eq!(pool.stats().active_segments(), 3);
    assert_eq!(pool.stats().free_buffers(), 0);

    // Freeing one buffer makes exactly one allocation possible again.
    unsafe { pool.free(buffers.pop().unwrap()) };
    buffers.push(pool.allocate().unwrap());
    assert!(matches!(pool.allocate(), Err(Error::CapacityExceeded { .. })));

    for buffer in buffers {
        unsafe { pool.free(buffer) };
    }
}

#[test]
fn idle_memory_is_returned_down_to_low_mark() {
    let pool = SegmentPool::builder()
        .payload_size(PAYLOAD_SIZE)
        .buffers_per_segment(8)
        .start_segments(1)
        .low_mark(1)
        .deletion_ratio(0.0)
        .build()
        .unwrap();

    let buffers = (0..80)
        .map(|_| pool.allocate().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(pool.stats().active_segments(), 10);

    for buffer in buffers {
        unsafe { pool.free(buffer) };
    }

    let stats = pool.stats();
    assert_eq!(stats.active_segments(), 1);
    assert_eq!(stats.outstanding_buffers(), 0);
    assert_eq!(stats.free_buffers(), 8);
}

#[test]
fn oscillation_at_segment_boundary_reuses_candidate() {
    let pool = SegmentPool::builder()
        .payload_size(PAYLOAD_SIZE)
        .buffers_per_segment(4)
        .start_segments(1)
        .low_mark(1)
        .build()
        .unwrap();

    let base = (0..4)
        .map(|_| pool.allocate().unwrap())
        .collect::<Vec<_>>();

    let mut previous = None;

    for _ in 0..10 {
        // One buffer past the boundary maps (or reactivates) a second segment...
        let extra = pool.allocate().unwrap();
        assert_eq!(pool.stats().active_segments(), 2);

        // ...and freeing it parks that segment instead of unmapping it.
        unsafe { pool.free(extra) };
        assert_eq!(pool.stats().active_segments(), 1);
        assert!(pool.stats().has_deletion_candidate());

        // The same parked segment keeps coming back.
        if let Some(previous) = previous {
            assert_eq!(extra, previous);
        }
        previous = Some(extra);
    }

    for buffer in base {
        unsafe { pool.free(buffer) };
    }
}

#[test]
#[cfg_attr(miri, ignore)] // Tens of thousands of operations take too long under Miri.
fn random_churn_preserves_accounting_and_contents() {
    const BUFFERS_PER_SEGMENT: usize = 16;
    const LOW_MARK: usize = 2;
    const HIGH_MARK: usize = 12;

    let pool = SegmentPool::builder()
        .payload_size(PAYLOAD_SIZE)
        .buffers_per_segment(BUFFERS_PER_SEGMENT)
        .start_segments(LOW_MARK)
        .low_mark(LOW_MARK)
        .high_mark(HIGH_MARK)
        .deletion_ratio(0.25)
        .build()
        .unwrap();

    let mut rng = SmallRng::seed_from_u64(0x5EED);
    let mut outstanding: Vec<(NonNull<u8>, u64)> = Vec::new();
    let mut next_tag = 0_u64;

    for step in 0..20_000 {
        // Bias towards allocation in the first half and towards freeing in the second,
        // so the pool both grows to its high mark and shrinks back.
        let allocate_probability = if step < 10_000 { 0.6 } else { 0.4 };
        let allocate = outstanding.is_empty() || rng.random_bool(allocate_probability);

        if allocate {
            match pool.allocate() {
                Ok(buffer) => {
                    write_tag(buffer, next_tag);
                    outstanding.push((buffer, next_tag));
                    next_tag += 1;
                }
                Err(Error::CapacityExceeded { .. }) => {
                    assert_eq!(outstanding.len(), BUFFERS_PER_SEGMENT * HIGH_MARK);
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        } else {
            let (buffer, tag) = outstanding.swap_remove(rng.random_range(0..outstanding.len()));
            assert_eq!(read_tag(buffer), tag, "buffer contents were overwritten");
            unsafe { pool.free(buffer) };
        }

        let stats = pool.stats();
        assert_eq!(stats.outstanding_buffers(), outstanding.len());
        assert_eq!(
            stats.free_buffers() + stats.outstanding_buffers(),
            stats.active_segments() * BUFFERS_PER_SEGMENT
        );
        assert!(stats.active_segments() >= LOW_MARK);
        assert!(stats.active_segments() <= HIGH_MARK);
    }

    let unique = outstanding
        .iter()
        .map(|(buffer, _)| *buffer)
        .collect::<HashSet<_>>();
    assert_eq!(unique.len(), outstanding.len());

    for (buffer, tag) in outstanding {
        assert_eq!(read_tag(buffer), tag);
        unsafe { pool.free(buffer) };
    }

    assert_eq!(pool.stats().outstanding_buffers(), 0);
}

#[test]
fn payload_of_one_byte_is_usable() {
    let pool = SegmentPool::builder()
        .payload_size(1)
        .buffers_per_segment(3)
        .build()
        .unwrap();

    let buffers = (0..7)
        .map(|_| pool.allocate().unwrap())
        .collect::<Vec<_>>();

    for (i, buffer) in buffers.iter().enumerate() {
        unsafe { buffer.as_ptr().write(u8::try_from(i).unwrap()) };
    }

    for (i, buffer) in buffers.iter().enumerate() {
        assert_eq!(unsafe { buffer.as_ptr().read() }, u8::try_from(i).unwrap());
    }

    for buffer in buffers {
        unsafe { pool.free(buffer) };
    }
}

#[test]
fn configuration_errors_are_reported() {
    let result = SegmentPool::builder()
        .payload_size(16)
        .low_mark(4)
        .high_mark(2)
        .build();

    let error = result.unwrap_err();
    assert!(matches!(error, Error::InvalidConfiguration { .. }));
    assert!(error.to_string().contains("low mark"));
}
