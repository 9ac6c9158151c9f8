//! Thread safety integration tests for `segment_pool`.
//!
//! These tests share one pool between threads and verify that the bookkeeping stays
//! consistent when allocations and frees from many threads interleave.

#![allow(
    clippy::undocumented_unsafe_blocks,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::ptr::NonNull;
use std::sync::{Arc, Barrier, mpsc};
use std::thread;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use segment_pool::SegmentPool;

const THREAD_COUNT: usize = 4;

#[cfg(not(miri))]
const OPERATIONS_PER_THREAD: usize = 5_000;

#[cfg(miri)]
const OPERATIONS_PER_THREAD: usize = 50;

/// Raw pointers are not `Send`, so buffers cross threads as exposed addresses.
fn to_address(buffer: NonNull<u8>) -> usize {
    buffer.as_ptr().expose_provenance()
}

fn from_address(address: usize) -> NonNull<u8> {
    NonNull::new(std::ptr::with_exposed_provenance_mut(address)).unwrap()
}

#[test]
fn pool_can_be_shared_across_threads() {
    let pool = Arc::new(
        SegmentPool::builder()
            .payload_size(64)
            .buffers_per_segment(8)
            .low_mark(1)
            .build()
            .unwrap(),
    );

    let barrier = Arc::new(Barrier::new(THREAD_COUNT));

    let handles = (0..THREAD_COUNT)
        .map(|thread_index| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(u64::try_from(thread_index).unwrap());
                let tag = u8::try_from(thread_index).unwrap();
                let mut owned = Vec::new();

                barrier.wait();

                for _ in 0..OPERATIONS_PER_THREAD {
                    if owned.is_empty() || rng.random_bool(0.55) {
                        let buffer = pool.allocate().unwrap();
                        unsafe { buffer.as_ptr().write_bytes(tag, 64) };
                        owned.push(buffer);
                    } else {
                        let buffer = owned.swap_remove(rng.random_range(0..owned.len()));

                        // Another thread writing into our buffer would show up here.
                        let bytes = unsafe { std::slice::from_raw_parts(buffer.as_ptr(), 64) };
                        assert!(bytes.iter().all(|b| *b == tag));

                        unsafe { pool.free(buffer) };
                    }
                }

                for buffer in owned {
                    unsafe { pool.free(buffer) };
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.outstanding_buffers(), 0);
    assert!(stats.active_segments() >= 1);
    assert_eq!(stats.free_buffers(), stats.active_segments() * 8);
}

#[test]
fn buffers_can_be_freed_by_another_thread() {
    let pool = Arc::new(
        SegmentPool::builder()
            .payload_size(32)
            .buffers_per_segment(4)
            .build()
            .unwrap(),
    );

    let (sender, receiver) = mpsc::channel::<usize>();

    let producer = thread::spawn({
        let pool = Arc::clone(&pool);

        move || {
            for _ in 0..OPERATIONS_PER_THREAD {
                let buffer = pool.allocate().unwrap();
                sender.send(to_address(buffer)).unwrap();
            }
        }
    });

    let consumer = thread::spawn({
        let pool = Arc::clone(&pool);

        move || {
            for address in receiver {
                unsafe { pool.free(from_address(address)) };
            }
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();

    assert_eq!(pool.stats().outstanding_buffers(), 0);
}
