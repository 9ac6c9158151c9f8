use std::ptr::NonNull;

#[cfg(debug_assertions)]
use crate::constants::STAMP_BYTE;
#[cfg(debug_assertions)]
use crate::layout::{BUFFER_SIGNATURE, SEGMENT_SIGNATURE};
use crate::pal::{PageMapper, Region};
use crate::{BufferHeader, FreeLink, SegmentHeader, SegmentId, SegmentLayout, SlotCoordinates};

/// Terminates the intrusive free list of a segment.
const END_OF_FREE_LIST: FreeLink = FreeLink::MAX;

/// One mapped memory region subdivided into equally-sized slots.
///
/// The segment does not remember its own layout; every operation takes the [`SegmentLayout`]
/// of the owning pool, which is identical for all segments of that pool.
///
/// # Out of band access
///
/// The segment does not create or keep references to payloads. Callers own a payload between
/// `pop_free()` and `push_free()` and may access it through raw pointers while the pool is
/// mutating other slots of the same segment.
#[derive(Debug)]
pub(crate) struct Segment {
    region: Region,

    /// Head of the intrusive free list implementing a stack of available slots, where each
    /// free payload stores the index of the next free slot.
    first_free_index: FreeLink,

    free_count: usize,
}

impl Segment {
    /// Writes the segment and buffer headers into a freshly mapped region and links every slot
    /// into the free list.
    ///
    /// Whatever the region contained before is overwritten; zero-filled memory is not required.
    ///
    /// # Panics
    ///
    /// Panics if the region is smaller than the segment size of `layout`.
    #[must_use]
    pub(crate) fn initialize(region: Region, id: SegmentId, layout: &SegmentLayout) -> Self {
        assert!(
            region.len() >= layout.segment_size(),
            "region of {} bytes cannot hold a segment of {} bytes",
            region.len(),
            layout.segment_size()
        );

        #[cfg(debug_assertions)]
        // SAFETY: The region is at least segment_size() writable bytes that we exclusively own.
        unsafe {
            region
                .as_ptr()
                .as_ptr()
                .write_bytes(STAMP_BYTE, layout.segment_size().get());
        }

        #[allow(
            clippy::cast_ptr_alignment,
            reason = "regions are page-aligned, which satisfies SegmentHeader alignment"
        )]
        let segment_header_ptr = region.as_ptr().as_ptr().cast::<SegmentHeader>();

        // SAFETY: The region starts with room for a SegmentHeader (see SegmentLayout) and is
        // exclusively ours to write.
        unsafe {
            segment_header_ptr.write(SegmentHeader::new(id));
        }

        let mut segment = Self {
            region,
            first_free_index: END_OF_FREE_LIST,
            free_count: 0,
        };

        for index in 0..layout.buffers_per_segment().get() {
            let buffer_header_ptr = segment.buffer_header_ptr(index, layout);

            // SAFETY: The pointer is in bounds and aligned for BufferHeader per SegmentLayout,
            // and no caller has been handed this slot yet.
            unsafe {
                buffer_header_ptr.write(BufferHeader::new(index));
            }

            segment.push_free(index, layout);
        }

        segment
    }

    #[cfg(any(debug_assertions, test))]
    #[must_use]
    pub(crate) fn free_count(&self) -> usize {
        self.free_count
    }

    /// Whether every slot has been handed out.
    #[must_use]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.free_count == 0
    }

    #[must_use]
    pub(crate) fn is_fully_free(&self, layout: &SegmentLayout) -> bool {
        self.free_count == layout.buffers_per_segment().get()
    }

    #[allow(
        clippy::cast_ptr_alignment,
        reason = "SegmentLayout aligns every slot for BufferHeader"
    )]
    fn buffer_header_ptr(&self, index: usize, layout: &SegmentLayout) -> NonNull<BufferHeader> {
        // SAFETY: buffer_header_offset() bounds-checks the index, so the offset stays within
        // the region.
        unsafe {
            self.region
                .as_ptr()
                .byte_add(layout.buffer_header_offset(index))
                .cast::<BufferHeader>()
        }
    }

    #[must_use]
    pub(crate) fn payload_ptr(&self, index: usize, layout: &SegmentLayout) -> NonNull<u8> {
        // SAFETY: payload_offset_in_segment() bounds-checks the index, so the offset stays
        // within the region.
        unsafe {
            self.region
                .as_ptr()
                .byte_add(layout.payload_offset_in_segment(index))
        }
    }

    /// Takes a slot from the free list and returns a pointer to its payload.
    ///
    /// # Panics
    ///
    /// Panics if the segment has no free slot.
    #[must_use]
    pub(crate) fn pop_free(&mut self, layout: &SegmentLayout) -> NonNull<u8> {
        assert!(
            self.first_free_index != END_OF_FREE_LIST,
            "cannot take a buffer from an exhausted segment of {} buffers",
            layout.buffers_per_segment()
        );

        let index = self.first_free_index;
        let payload = self.payload_ptr(index, layout);

        #[allow(
            clippy::cast_ptr_alignment,
            reason = "payload alignment is widened to at least that of FreeLink"
        )]
        let link_ptr = payload.as_ptr().cast::<FreeLink>();

        // SAFETY: The slot is free, so its payload holds the link written by push_free()
        // and nobody outside the pool references it.
        self.first_free_index = unsafe { link_ptr.read() };

        // Cannot underflow because the free list was not empty.
        self.free_count = self.free_count.wrapping_sub(1);

        #[cfg(debug_assertions)]
        // SAFETY: We still own the payload; it is handed to the caller only after we return.
        unsafe {
            stamp_payload(payload, layout);
        }

        payload
    }

    /// Returns the slot at `index` to the free list.
    ///
    /// The caller must have given up all access to the payload of the slot.
    pub(crate) fn push_free(&mut self, index: usize, layout: &SegmentLayout) {
        debug_assert!(
            !self.is_fully_free(layout),
            "segment already has all {} buffers free - double free of slot {index}?",
            layout.buffers_per_segment()
        );

        let payload = self.payload_ptr(index, layout);

        #[cfg(debug_assertions)]
        // SAFETY: The caller has given the payload back, so the pool owns it again.
        unsafe {
            stamp_payload(payload, layout);
        }

        #[allow(
            clippy::cast_ptr_alignment,
            reason = "payload alignment is widened to at least that of FreeLink"
        )]
        let link_ptr = payload.as_ptr().cast::<FreeLink>();

        // SAFETY: The payload is at least FreeLink-sized and owned by the pool again.
        unsafe {
            link_ptr.write(self.first_free_index);
        }

        self.first_free_index = index;

        // Cannot overflow because a segment never has more free slots than it has slots.
        self.free_count = self.free_count.wrapping_add(1);
    }

    /// Traces a payload pointer back to the segment and slot it belongs to, using only the
    /// headers embedded in segment memory.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by `pop_free()` on a still-mapped segment that uses
    /// `layout`, and must not have been returned via `push_free()` since.
    #[must_use]
    pub(crate) unsafe fn locate(payload: NonNull<u8>, layout: &SegmentLayout) -> SlotCoordinates {
        // SAFETY: Every payload is preceded by its buffer header at payload_offset(),
        // per the caller's guarantee that this is a live payload of such a segment.
        let buffer_header_ptr = unsafe { payload.byte_sub(layout.payload_offset()) };

        // SAFETY: The buffer header was written by initialize() and is never modified after.
        let buffer_header = unsafe { buffer_header_ptr.cast::<BufferHeader>().as_ref() };

        #[cfg(debug_assertions)]
        assert_eq!(
            buffer_header.signature, BUFFER_SIGNATURE,
            "buffer {payload:?} was not allocated from a segment pool or its header was overwritten"
        );

        let index = buffer_header.index;

        // SAFETY: The header is intact, so stepping back by the offset of its slot lands on
        // the start of the segment.
        let segment_header_ptr =
            unsafe { buffer_header_ptr.byte_sub(layout.buffer_header_offset(index)) };

        // SAFETY: The segment header was written by initialize() and is never modified after.
        let segment_header = unsafe { segment_header_ptr.cast::<SegmentHeader>().as_ref() };

        #[cfg(debug_assertions)]
        assert_eq!(
            segment_header.signature, SEGMENT_SIGNATURE,
            "buffer {payload:?} does not belong to a live segment"
        );

        SlotCoordinates::from_parts(segment_header.id, index)
    }

    /// Returns the segment memory to the operating system.
    pub(crate) fn release(self, mapper: &impl PageMapper) {
        mapper.unmap(self.region);
    }
}

/// # Safety
///
/// The pool must own the payload, i.e. it must not be in the hands of a caller.
#[cfg(debug_assertions)]
unsafe fn stamp_payload(payload: NonNull<u8>, layout: &SegmentLayout) {
    // SAFETY: Payloads are payload_layout().size() bytes long and owned by the pool,
    // per the caller's guarantee.
    unsafe {
        payload
            .as_ptr()
            .write_bytes(STAMP_BYTE, layout.payload_layout().size());
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::alloc::Layout;
    use std::collections::HashSet;

    use new_zealand::nz;

    use super::*;
    use crate::pal::RustMapper;

    fn test_layout() -> SegmentLayout {
        SegmentLayout::calculate(Layout::new::<[u64; 3]>(), nz!(8), RustMapper.page_size())
            .unwrap()
    }

    fn new_segment(id: usize, layout: &SegmentLayout) -> Segment {
        let region = RustMapper.map(layout.segment_size()).unwrap();
        Segment::initialize(region, SegmentId::new(id), layout)
    }

    #[test]
    fn new_segment_is_fully_free() {
        let layout = test_layout();
        let segment = new_segment(0, &layout);

        assert_eq!(segment.free_count(), 8);
        assert!(segment.is_fully_free(&layout));
        assert!(!segment.is_exhausted());

        segment.release(&RustMapper);
    }

    #[test]
    fn pop_hands_out_every_slot_once() {
        let layout = test_layout();
        let mut segment = new_segment(0, &layout);

        let payloads = (0..8)
            .map(|_| segment.pop_free(&layout))
            .collect::<Vec<_>>();

        assert!(segment.is_exhausted());

        let unique = payloads.iter().copied().collect::<HashSet<_>>();
        assert_eq!(unique.len(), 8);

        // Payload regions must not overlap.
        let mut addresses = payloads
            .iter()
            .map(|p| p.as_ptr().addr())
            .collect::<Vec<_>>();
        addresses.sort_unstable();
        for pair in addresses.windows(2) {
            assert!(pair[1] - pair[0] >= layout.payload_layout().size());
        }

        for payload in payloads {
            let coordinates = unsafe { Segment::locate(payload, &layout) };
            segment.push_free(coordinates.index_in_segment(), &layout);
        }

        assert!(segment.is_fully_free(&layout));

        segment.release(&RustMapper);
    }

    #[test]
    fn slots_are_handed_out_last_pushed_first() {
        let layout = test_layout();
        let mut segment = new_segment(0, &layout);

        // Initialization pushes slots in index order, so the highest index is on top.
        let first = segment.pop_free(&layout);
        assert_eq!(first, segment.payload_ptr(7, &layout));

        let second = segment.pop_free(&layout);
        assert_eq!(second, segment.payload_ptr(6, &layout));

        // A freed slot is reused before any other.
        segment.push_free(7, &layout);
        assert_eq!(segment.pop_free(&layout), first);

        segment.push_free(7, &layout);
        segment.push_free(6, &layout);
        segment.release(&RustMapper);
    }

    #[test]
    fn locate_recovers_segment_and_index() {
        let layout = test_layout();
        let mut segment_a = new_segment(3, &layout);
        let mut segment_b = new_segment(9, &layout);

        let a = segment_a.pop_free(&layout);
        let b = segment_b.pop_free(&layout);

        let coordinates_a = unsafe { Segment::locate(a, &layout) };
        let coordinates_b = unsafe { Segment::locate(b, &layout) };

        assert_eq!(coordinates_a, SlotCoordinates::from_parts(SegmentId::new(3), 7));
        assert_eq!(coordinates_b, SlotCoordinates::from_parts(SegmentId::new(9), 7));

        segment_a.push_free(7, &layout);
        segment_b.push_free(7, &layout);
        segment_a.release(&RustMapper);
        segment_b.release(&RustMapper);
    }

    #[test]
    fn payload_is_writable_without_disturbing_neighbors() {
        let layout = test_layout();
        let mut segment = new_segment(0, &layout);

        let a = segment.pop_free(&layout);
        let b = segment.pop_free(&layout);

        unsafe {
            a.as_ptr().write_bytes(0x11, layout.payload_layout().size());
            b.as_ptr().write_bytes(0x22, layout.payload_layout().size());
        }

        // Headers survive payload writes, so both buffers can still be located.
        let coordinates_a = unsafe { Segment::locate(a, &layout) };
        let coordinates_b = unsafe { Segment::locate(b, &layout) };

        segment.push_free(coordinates_a.index_in_segment(), &layout);
        segment.push_free(coordinates_b.index_in_segment(), &layout);
        assert!(segment.is_fully_free(&layout));

        segment.release(&RustMapper);
    }

    #[test]
    #[should_panic]
    fn pop_from_exhausted_segment_panics() {
        let layout = test_layout();
        let mut segment = new_segment(0, &layout);

        for _ in 0..9 {
            _ = segment.pop_free(&layout);
        }
    }

    #[test]
    #[should_panic]
    fn region_too_small_panics() {
        let layout = test_layout();
        let region = RustMapper.map(nz!(16)).unwrap();

        _ = Segment::initialize(region, SegmentId::new(0), &layout);
    }
}
