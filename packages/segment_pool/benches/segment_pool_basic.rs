//! Basic benchmarks for the `segment_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use segment_pool::SegmentPool;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const PAYLOAD_SIZE: usize = 64;
const BUFFERS_PER_SEGMENT: usize = 128;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_pool_basic");

    group.bench_function("build", |b| {
        b.iter(|| {
            drop(black_box(
                SegmentPool::builder()
                    .payload_size(PAYLOAD_SIZE)
                    .buffers_per_segment(BUFFERS_PER_SEGMENT)
                    .build()
                    .unwrap(),
            ));
        });
    });

    group.bench_function("allocate_free_one", |b| {
        let pool = SegmentPool::builder()
            .payload_size(PAYLOAD_SIZE)
            .buffers_per_segment(BUFFERS_PER_SEGMENT)
            .build()
            .unwrap();

        b.iter(|| {
            let buffer = black_box(pool.allocate().unwrap());

            // SAFETY: The buffer came from this pool and is freed exactly once.
            unsafe { pool.free(buffer) };
        });
    });

    group.bench_function("allocate_free_full_segment", |b| {
        let pool = SegmentPool::builder()
            .payload_size(PAYLOAD_SIZE)
            .buffers_per_segment(BUFFERS_PER_SEGMENT)
            .build()
            .unwrap();

        let mut buffers = Vec::with_capacity(BUFFERS_PER_SEGMENT);

        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                buffers.extend((0..BUFFERS_PER_SEGMENT).map(|_| pool.allocate().unwrap()));

                for buffer in buffers.drain(..) {
                    // SAFETY: The buffer came from this pool and is freed exactly once.
                    unsafe { pool.free(black_box(buffer)) };
                }
            }

            start.elapsed()
        });
    });

    group.bench_function("grow_and_shrink", |b| {
        // Every iteration crosses a segment boundary and back, exercising the parked segment.
        let pool = SegmentPool::builder()
            .payload_size(PAYLOAD_SIZE)
            .buffers_per_segment(BUFFERS_PER_SEGMENT)
            .low_mark(1)
            .build()
            .unwrap();

        let base = (0..BUFFERS_PER_SEGMENT)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        b.iter(|| {
            let extra = black_box(pool.allocate().unwrap());

            // SAFETY: The buffer came from this pool and is freed exactly once.
            unsafe { pool.free(extra) };
        });

        for buffer in base {
            // SAFETY: The buffer came from this pool and is freed exactly once.
            unsafe { pool.free(buffer) };
        }
    });

    group.finish();
}
