use std::ptr::NonNull;
use std::thread;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pal::{MapperFacade, PageMapper};
use crate::{PoolStats, Segment, SegmentId, SegmentLayout, Segments};

/// Mark limits and thresholds that drive segment growth and retirement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SegmentPolicy {
    /// The pool never retires segments below this many active segments.
    pub(crate) low_mark: usize,

    /// The pool never grows beyond this many active segments.
    pub(crate) high_mark: usize,

    /// The deletion candidate is released once more than this many buffers are free elsewhere.
    pub(crate) deletion_threshold: usize,
}

/// Everything a pool mutates, guarded as one unit by the pool's lock.
///
/// Counters follow these rules after every public operation:
///
/// * `free_buffer_count` equals the sum of the free slots of all linked (active) segments.
/// * The deletion candidate, if any, is fully free and not linked.
/// * Active segments with free slots precede all exhausted active segments, so the front
///   segment has a free slot whenever `free_buffer_count > 0`.
#[derive(Debug)]
pub(crate) struct PoolState {
    mapper: MapperFacade,
    layout: SegmentLayout,
    policy: SegmentPolicy,

    segments: Segments,

    /// At most one fully idle segment held back from the operating system to absorb
    /// allocate/free oscillation around a segment boundary.
    deletion_candidate: Option<SegmentId>,

    free_buffer_count: usize,
    active_segment_count: usize,
}

impl PoolState {
    #[must_use]
    pub(crate) fn new(mapper: MapperFacade, layout: SegmentLayout, policy: SegmentPolicy) -> Self {
        Self {
            mapper,
            layout,
            policy,
            segments: Segments::default(),
            deletion_candidate: None,
            free_buffer_count: 0,
            active_segment_count: 0,
        }
    }

    /// Maps `count` segments up front. On failure, the state is dropped by the caller, which
    /// returns everything mapped so far to the operating system.
    pub(crate) fn populate(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.grow()?;
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    pub(crate) fn allocate(&mut self) -> Result<NonNull<u8>> {
        if self.free_buffer_count == 0 {
            if self.active_segment_count >= self.policy.high_mark {
                warn!(
                    active_segments = self.active_segment_count,
                    high_mark = self.policy.high_mark,
                    "segment pool is at capacity"
                );

                return Err(Error::CapacityExceeded {
                    active_segments: self.active_segment_count,
                    high_mark: self.policy.high_mark,
                });
            }

            if let Some(candidate) = self.deletion_candidate.take() {
                self.segments.push_front(candidate);
                self.add_active_segment();

                debug!(segment = candidate.index(), "reactivated deletion candidate");
            } else {
                self.grow()?;
            }
        }

        let id = self
            .segments
            .front()
            .expect("a buffer is free, so at least one segment is active");

        let segment = self.segments.get_mut(id);
        let payload = segment.pop_free(&self.layout);

        if segment.is_exhausted() {
            // Exhausted segments wait at the back until a buffer in them is freed.
            self.segments.move_to_back(id);
        }

        // Cannot underflow because we made sure a buffer is free above.
        self.free_buffer_count = self.free_buffer_count.wrapping_sub(1);

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(payload)
    }

    /// # Safety
    ///
    /// `payload` must have been returned by `allocate()` on this state and not freed since.
    pub(crate) unsafe fn free(&mut self, payload: NonNull<u8>) {
        // SAFETY: Forwarding the caller's guarantee that this is a live buffer of ours.
        let coordinates = unsafe { Segment::locate(payload, &self.layout) };
        let id = coordinates.segment();

        debug_assert_ne!(
            self.deletion_candidate,
            Some(id),
            "buffer {payload:?} belongs to the deletion candidate, so it was already freed"
        );

        let segment = self.segments.get_mut(id);

        debug_assert_eq!(
            segment.payload_ptr(coordinates.index_in_segment(), &self.layout),
            payload,
            "buffer {payload:?} does not point at the start of a payload"
        );

        segment.push_free(coordinates.index_in_segment(), &self.layout);
        let segment_is_idle = segment.is_fully_free(&self.layout);

        // Recently freed segments serve the next allocations, letting idle ones drift back.
        self.segments.move_to_front(id);

        // Compared before counting the buffer we just freed.
        if self.free_buffer_count > self.policy.deletion_threshold {
            if let Some(candidate) = self.deletion_candidate.take() {
                self.release(candidate);

                debug!(
                    segment = candidate.index(),
                    free_buffers = self.free_buffer_count,
                    "released deletion candidate"
                );
            }
        }

        // Cannot overflow because there are at most as many free buffers as mapped buffers.
        self.free_buffer_count = self.free_buffer_count.wrapping_add(1);

        if segment_is_idle && self.active_segment_count > self.policy.low_mark {
            self.segments.unlink(id);
            self.remove_active_segment();

            if self.deletion_candidate.is_some() {
                // Never park two candidates.
                self.release(id);

                debug!(segment = id.index(), "released idle segment");
            } else {
                self.deletion_candidate = Some(id);

                debug!(segment = id.index(), "parked idle segment as deletion candidate");
            }
        }

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    #[must_use]
    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            free_buffers: self.free_buffer_count,
            active_segments: self.active_segment_count,
            outstanding_buffers: self.outstanding_buffer_count(),
            has_deletion_candidate: self.deletion_candidate.is_some(),
        }
    }

    #[cfg(test)]
    pub(crate) fn active_segment_order(&self) -> Vec<SegmentId> {
        self.segments.iter_linked().collect()
    }

    #[cfg(test)]
    pub(crate) fn deletion_candidate(&self) -> Option<SegmentId> {
        self.deletion_candidate
    }

    fn outstanding_buffer_count(&self) -> usize {
        // Cannot overflow because all these buffers exist in memory. Cannot underflow because
        // the free buffers are a subset of the buffers in active segments.
        self.active_segment_count
            .wrapping_mul(self.layout.buffers_per_segment().get())
            .wrapping_sub(self.free_buffer_count)
    }

    /// Maps a new segment and links it at the front of the active list.
    fn grow(&mut self) -> Result<()> {
        let size = self.layout.segment_size();

        let region = self.mapper.map(size).map_err(|source| {
            warn!(size = size.get(), %source, "operating system refused to map a segment");

            Error::OutOfMemory {
                size: size.get(),
                source,
            }
        })?;

        let layout = self.layout;
        let id = self
            .segments
            .insert_with(|id| Segment::initialize(region, id, &layout));

        self.segments.push_front(id);
        self.add_active_segment();

        debug!(
            segment = id.index(),
            size = size.get(),
            active_segments = self.active_segment_count,
            "mapped segment"
        );

        Ok(())
    }

    /// Returns an unlinked, fully free segment to the operating system. Counters must already
    /// have been adjusted by the caller.
    fn release(&mut self, id: SegmentId) {
        self.segments.remove(id).release(&self.mapper);
    }

    fn add_active_segment(&mut self) {
        // Cannot overflow because every active segment occupies memory.
        self.active_segment_count = self.active_segment_count.wrapping_add(1);
        self.free_buffer_count = self
            .free_buffer_count
            .wrapping_add(self.layout.buffers_per_segment().get());
    }

    fn remove_active_segment(&mut self) {
        // Cannot underflow because the segment was active and all its buffers were free.
        self.active_segment_count = self.active_segment_count.wrapping_sub(1);
        self.free_buffer_count = self
            .free_buffer_count
            .wrapping_sub(self.layout.buffers_per_segment().get());
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    fn integrity_check(&self) {
        let mut observed_free = 0_usize;
        let mut observed_active = 0_usize;
        let mut seen_exhausted = false;

        for id in self.segments.iter_linked() {
            let segment = self.segments.get(id);

            assert_ne!(
                Some(id),
                self.deletion_candidate,
                "deletion candidate {id:?} is linked into the active list"
            );

            if segment.is_exhausted() {
                seen_exhausted = true;
            } else {
                assert!(
                    !seen_exhausted,
                    "segment {id:?} with free buffers sits behind an exhausted segment"
                );
            }

            observed_free = observed_free.wrapping_add(segment.free_count());
            observed_active = observed_active.wrapping_add(1);
        }

        assert_eq!(
            observed_free, self.free_buffer_count,
            "free buffer count {} does not match the observed {observed_free}",
            self.free_buffer_count
        );

        assert_eq!(
            observed_active, self.active_segment_count,
            "active segment count {} does not match the observed {observed_active}",
            self.active_segment_count
        );

        assert_eq!(observed_active, self.segments.linked_count());

        if let Some(candidate) = self.deletion_candidate {
            assert!(!self.segments.is_linked(candidate));
            assert!(
                self.segments.get(candidate).is_fully_free(&self.layout),
                "deletion candidate {candidate:?} has buffers in use"
            );
        }

        assert_eq!(
            self.segments.len(),
            self.active_segment_count
                .wrapping_add(usize::from(self.deletion_candidate.is_some())),
            "segment arena holds segments that are neither active nor the deletion candidate"
        );
    }
}

impl Drop for PoolState {
    fn drop(&mut self) {
        let outstanding = self.outstanding_buffer_count();

        let segments = self.segments.drain();
        let released = segments.len();

        for segment in segments {
            segment.release(&self.mapper);
        }

        self.deletion_candidate = None;

        debug!(released, "released all segments of segment pool");

        // We do this check at the end so we clean up the memory first. Mostly to make Miri happy.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() {
            assert!(
                outstanding == 0,
                "dropped a SegmentPool with {outstanding} buffers still allocated - \
                 every buffer must be freed before the pool is dropped"
            );
        }
    }
}

// SAFETY: The state owns its segment memory exclusively; raw pointers into it are only handed
// out as payloads, which callers own independently. Nothing is tied to the creating thread.
unsafe impl Send for PoolState {}
