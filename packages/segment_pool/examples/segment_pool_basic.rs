//! Basic usage example for `SegmentPool`.
//!
//! This example allocates fixed-size message buffers, shows how the pool grows and shrinks
//! its segments as demand changes, and prints the pool statistics along the way.

use segment_pool::SegmentPool;

const MESSAGE_SIZE: usize = 256;

fn main() -> Result<(), segment_pool::Error> {
    let pool = SegmentPool::builder()
        .payload_size(MESSAGE_SIZE)
        .buffers_per_segment(16)
        .start_segments(1)
        .low_mark(1)
        .high_mark(4)
        .build()?;

    println!(
        "Created SegmentPool: {} buffers of {} bytes per segment, {} bytes mapped per segment",
        pool.buffers_per_segment(),
        pool.payload_layout().size(),
        pool.segment_size()
    );
    println!("Initial: {:?}", pool.stats());

    // Allocate enough messages to need a second segment.
    let mut messages = Vec::new();
    for i in 0..20_u8 {
        let message = pool.allocate()?;

        // SAFETY: The buffer is MESSAGE_SIZE bytes that we exclusively own until it is freed.
        unsafe { message.as_ptr().write_bytes(i, MESSAGE_SIZE) };

        messages.push(message);
    }

    println!("After 20 allocations: {:?}", pool.stats());

    // Fill the pool up to its high mark to show the capacity error.
    while let Ok(message) = pool.allocate() {
        messages.push(message);
    }

    match pool.allocate() {
        Ok(_) => unreachable!("the pool is at its high mark"),
        Err(e) => println!("Allocation refused: {e}"),
    }

    println!("At capacity: {:?}", pool.stats());

    for message in messages {
        // SAFETY: Every buffer came from this pool and is freed exactly once.
        unsafe { pool.free(message) };
    }

    println!("After freeing everything: {:?}", pool.stats());

    Ok(())
}
