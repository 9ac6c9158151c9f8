/// A snapshot of the bookkeeping of a [`SegmentPool`][crate::SegmentPool].
///
/// All values are captured together under the pool's lock, so they are consistent with each
/// other. For any snapshot, `free_buffers() + outstanding_buffers()` equals
/// `active_segments()` multiplied by the number of buffers per segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolStats {
    pub(crate) free_buffers: usize,
    pub(crate) active_segments: usize,
    pub(crate) outstanding_buffers: usize,
    pub(crate) has_deletion_candidate: bool,
}

impl PoolStats {
    /// Number of buffers that can be allocated from active segments without mapping memory.
    ///
    /// Buffers of a parked deletion candidate are not included.
    #[must_use]
    pub fn free_buffers(&self) -> usize {
        self.free_buffers
    }

    /// Number of segments currently serving allocations.
    #[must_use]
    pub fn active_segments(&self) -> usize {
        self.active_segments
    }

    /// Number of buffers handed out by `allocate()` and not yet freed.
    #[must_use]
    pub fn outstanding_buffers(&self) -> usize {
        self.outstanding_buffers
    }

    /// Whether a fully idle segment is parked, still mapped, waiting to be either reactivated
    /// or released to the operating system.
    #[must_use]
    pub fn has_deletion_candidate(&self) -> bool {
        self.has_deletion_candidate
    }
}
