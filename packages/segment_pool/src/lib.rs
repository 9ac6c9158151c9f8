//! A thread-safe pool of fixed-size buffers backed by memory segments mapped directly from the
//! operating system.
//!
//! This crate provides [`SegmentPool`], which hands out equally-sized raw buffers in O(1) time
//! without touching the general-purpose heap. It is meant for workloads that allocate and free
//! large numbers of same-sized objects, such as network packets or protocol messages, where a
//! general allocator would fragment memory or add unpredictable latency.
//!
//! # Key Features
//!
//! - **Constant-time allocate and free**: every segment keeps an intrusive free list of its
//!   slots and a freed buffer finds its segment through a header stored in front of it
//! - **Memory straight from the OS**: segments are mapped with `mmap` or `VirtualAlloc` and
//!   returned to the OS when no longer needed
//! - **Bounded footprint**: a low mark and a high mark bound the number of active segments
//! - **Hysteresis**: one idle segment is kept in reserve to avoid mapping and unmapping
//!   repeatedly when usage oscillates around a segment boundary
//! - **Debug-build checks**: buffers are filled with a recognizable byte pattern when handed out
//!   or returned, and segment and buffer headers carry signatures that catch foreign pointers
//!
//! # Memory layout
//!
//! Each segment is one mapping, laid out as a segment header followed by
//! `buffers_per_segment` slots. Each slot is a small buffer header followed by the payload
//! that callers use. While a slot is free, its payload stores the index of the next free
//! slot, which is why payloads are never smaller than a `usize`.
//!
//! # Example
//!
//! ```rust
//! use segment_pool::SegmentPool;
//!
//! let pool = SegmentPool::builder()
//!     .payload_size(1500)
//!     .buffers_per_segment(64)
//!     .low_mark(1)
//!     .high_mark(32)
//!     .build()?;
//!
//! let packet = pool.allocate()?;
//!
//! // SAFETY: The buffer is 1500 bytes that we exclusively own until it is freed.
//! unsafe { packet.as_ptr().write_bytes(0, 1500) };
//!
//! let stats = pool.stats();
//! assert_eq!(stats.outstanding_buffers(), 1);
//! assert_eq!(stats.free_buffers(), 63);
//!
//! // SAFETY: The buffer came from this pool and is freed exactly once.
//! unsafe { pool.free(packet) };
//! # Ok::<(), segment_pool::Error>(())
//! ```
//!
//! # Logging
//!
//! The pool emits [`tracing`](https://docs.rs/tracing) events when segments are mapped,
//! parked, reactivated or released, and warnings when an allocation fails. The hot paths of
//! allocating from and freeing into an existing segment do not log.

mod builder;
mod constants;
mod coordinates;
mod error;
mod layout;
mod pal;
mod pool;
mod segment;
mod segments;
mod state;
mod stats;

pub use builder::*;
pub(crate) use coordinates::*;
pub use error::Error;
pub(crate) use layout::*;
pub use pool::*;
pub(crate) use segment::*;
pub(crate) use segments::*;
pub(crate) use state::*;
pub use stats::*;
