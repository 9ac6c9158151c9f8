use std::num::NonZero;

use new_zealand::nz;

pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - segment pool \
    bookkeeping may be half-updated and program validity cannot be guaranteed";

/// Number of buffers carved out of each segment unless configured otherwise.
#[cfg(not(miri))]
pub(crate) const DEFAULT_BUFFERS_PER_SEGMENT: NonZero<usize> = nz!(128);

// Under Miri, we use smaller segments because Miri test runtime scales by memory usage.
#[cfg(miri)]
pub(crate) const DEFAULT_BUFFERS_PER_SEGMENT: NonZero<usize> = nz!(16);

/// Fraction of a segment's buffers that must be free elsewhere in the pool before a parked
/// deletion candidate is returned to the operating system.
pub(crate) const DEFAULT_DELETION_RATIO: f64 = 0.333;

/// Byte pattern written over buffers that are not owned by a caller, so that use-after-free
/// shows up as recognizable garbage in debug builds.
#[cfg(debug_assertions)]
pub(crate) const STAMP_BYTE: u8 = 0xEE;
