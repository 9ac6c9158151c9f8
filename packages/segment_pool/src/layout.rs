use std::alloc::{Layout, LayoutError};
use std::num::NonZero;

use crate::SegmentId;
use crate::error::{Error, Result};

#[cfg(debug_assertions)]
pub(crate) const SEGMENT_SIGNATURE: u32 = u32::from_be_bytes(*b"Sgmt");

#[cfg(debug_assertions)]
pub(crate) const BUFFER_SIGNATURE: u32 = u32::from_be_bytes(*b"Bffr");

/// Written at the start of every mapped segment so that a freed payload pointer
/// can be traced back to the bookkeeping entry of its segment.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct SegmentHeader {
    #[cfg(debug_assertions)]
    pub(crate) signature: u32,

    pub(crate) id: SegmentId,
}

impl SegmentHeader {
    pub(crate) fn new(id: SegmentId) -> Self {
        Self {
            #[cfg(debug_assertions)]
            signature: SEGMENT_SIGNATURE,
            id,
        }
    }
}

/// Written immediately before every payload, recording the index of the slot in its segment.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct BufferHeader {
    #[cfg(debug_assertions)]
    pub(crate) signature: u32,

    pub(crate) index: usize,
}

impl BufferHeader {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            #[cfg(debug_assertions)]
            signature: BUFFER_SIGNATURE,
            index,
        }
    }
}

/// While a slot is free, its payload holds the index of the next free slot in the same segment.
pub(crate) type FreeLink = usize;

/// Byte offsets of everything inside a mapped segment.
///
/// ```text
/// | SegmentHeader | pad | BufferHeader | pad | payload | pad | BufferHeader | ... | page pad |
///                       ^---------------- slot_stride ------^
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SegmentLayout {
    /// Effective payload layout, widened so that a free slot can hold a [`FreeLink`].
    payload_layout: Layout,

    buffers_per_segment: NonZero<usize>,

    /// Offset from the segment base to the first slot.
    slots_offset: usize,

    /// Distance between the starts of two consecutive slots.
    slot_stride: usize,

    /// Offset from the start of a slot (its buffer header) to its payload.
    payload_offset: usize,

    /// Bytes mapped per segment, rounded up to whole pages.
    segment_size: NonZero<usize>,
}

impl SegmentLayout {
    /// Calculates the layout of a segment holding `buffers_per_segment` payloads shaped
    /// like `requested_payload`, mapped in units of `page_size`.
    pub(crate) fn calculate(
        requested_payload: Layout,
        buffers_per_segment: NonZero<usize>,
        page_size: NonZero<usize>,
    ) -> Result<Self> {
        if requested_payload.size() == 0 {
            return Err(Error::invalid_configuration(
                "payload size must be greater than zero",
            ));
        }

        if requested_payload.align() > page_size.get() {
            return Err(Error::invalid_configuration(format!(
                "payload alignment {} exceeds the page size {page_size}",
                requested_payload.align()
            )));
        }

        let link_layout = Layout::new::<FreeLink>();

        let payload_layout = Layout::from_size_align(
            requested_payload.size().max(link_layout.size()),
            requested_payload.align().max(link_layout.align()),
        )
        .map_err(|e| Error::invalid_configuration(format!("payload layout is invalid: {e}")))?;

        let invalid_layout =
            |e: LayoutError| Error::invalid_configuration(format!("slot layout is invalid: {e}"));

        let (slot_layout, payload_offset) = Layout::new::<BufferHeader>()
            .extend(payload_layout)
            .map_err(invalid_layout)?;

        // Padding the slot to its own alignment makes consecutive slots line up.
        let slot_layout = slot_layout.pad_to_align();

        let (_, slots_offset) = Layout::new::<SegmentHeader>()
            .extend(slot_layout)
            .map_err(invalid_layout)?;

        let segment_size = slot_layout
            .size()
            .checked_mul(buffers_per_segment.get())
            .and_then(|slots| slots.checked_add(slots_offset))
            .and_then(|size| size.checked_next_multiple_of(page_size.get()))
            .and_then(NonZero::new)
            .ok_or_else(|| {
                Error::invalid_configuration("segment size overflows the address space")
            })?;

        Ok(Self {
            payload_layout,
            buffers_per_segment,
            slots_offset,
            slot_stride: slot_layout.size(),
            payload_offset,
            segment_size,
        })
    }

    #[must_use]
    pub(crate) fn payload_layout(&self) -> Layout {
        self.payload_layout
    }

    #[must_use]
    pub(crate) fn buffers_per_segment(&self) -> NonZero<usize> {
        self.buffers_per_segment
    }

    #[must_use]
    pub(crate) fn segment_size(&self) -> NonZero<usize> {
        self.segment_size
    }

    #[must_use]
    pub(crate) fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Offset from the segment base to the buffer header of the slot at `index`.
    #[must_use]
    pub(crate) fn buffer_header_offset(&self, index: usize) -> usize {
        assert!(
            index < self.buffers_per_segment.get(),
            "slot {index} out of bounds in segment of {} buffers",
            self.buffers_per_segment
        );

        // Cannot overflow because calculate() verified the whole segment fits in usize.
        self.slots_offset
            .wrapping_add(index.wrapping_mul(self.slot_stride))
    }

    /// Offset from the segment base to the payload of the slot at `index`.
    #[must_use]
    pub(crate) fn payload_offset_in_segment(&self, index: usize) -> usize {
        // Cannot overflow because calculate() verified the whole segment fits in usize.
        self.buffer_header_offset(index)
            .wrapping_add(self.payload_offset)
    }

    /// Memory the pool uses per buffer, including headers and padding.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn slot_stride(&self) -> usize {
        self.slot_stride
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "ratio is validated to be in [0, 1), so the product is within 0..buffers_per_segment"
    )]
    #[must_use]
    pub(crate) fn deletion_threshold(&self, deletion_ratio: f64) -> usize {
        debug_assert!((0.0..1.0).contains(&deletion_ratio));

        (self.buffers_per_segment.get() as f64 * deletion_ratio).floor() as usize
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use new_zealand::nz;

    use super::*;

    const PAGE: NonZero<usize> = nz!(4096);

    #[test]
    fn tiny_payload_is_widened_to_free_link() {
        let layout =
            SegmentLayout::calculate(Layout::new::<u8>(), nz!(4), PAGE).unwrap();

        assert_eq!(layout.payload_layout().size(), mem::size_of::<FreeLink>());
        assert_eq!(layout.payload_layout().align(), mem::align_of::<FreeLink>());
    }

    #[test]
    fn slots_are_contiguous_and_aligned() {
        let payload = Layout::from_size_align(24, 16).unwrap();
        let layout = SegmentLayout::calculate(payload, nz!(10), PAGE).unwrap();

        assert_eq!(layout.slot_stride() % 16, 0);
        assert!(layout.slot_stride() >= mem::size_of::<BufferHeader>() + 24);

        for index in 0..10 {
            assert_eq!(layout.payload_offset_in_segment(index) % 16, 0);
            assert_eq!(
                layout.payload_offset_in_segment(index),
                layout.buffer_header_offset(index) + layout.payload_offset()
            );
        }

        assert_eq!(
            layout.buffer_header_offset(1) - layout.buffer_header_offset(0),
            layout.slot_stride()
        );
        assert!(layout.buffer_header_offset(0) >= mem::size_of::<SegmentHeader>());
    }

    #[test]
    fn segment_size_is_whole_pages() {
        let layout = SegmentLayout::calculate(Layout::new::<[u8; 100]>(), nz!(100), PAGE).unwrap();

        assert_eq!(layout.segment_size().get() % PAGE.get(), 0);
        assert!(
            layout.segment_size().get()
                >= layout.payload_offset_in_segment(99) + layout.payload_layout().size()
        );
    }

    #[test]
    fn zero_sized_payload_is_rejected() {
        let result = SegmentLayout::calculate(Layout::new::<()>(), nz!(4), PAGE);

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn alignment_above_page_size_is_rejected() {
        let payload = Layout::from_size_align(64, 8192).unwrap();
        let result = SegmentLayout::calculate(payload, nz!(4), PAGE);

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn overflowing_segment_is_rejected() {
        let payload = Layout::from_size_align(1 << 20, 8).unwrap();
        let result = SegmentLayout::calculate(payload, NonZero::new(usize::MAX).unwrap(), PAGE);

        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[test]
    fn deletion_threshold_is_floored() {
        let layout = SegmentLayout::calculate(Layout::new::<u64>(), nz!(10), PAGE).unwrap();

        assert_eq!(layout.deletion_threshold(0.3), 3);
        assert_eq!(layout.deletion_threshold(0.0), 0);
        assert_eq!(layout.deletion_threshold(0.99), 9);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_slot_panics() {
        let layout = SegmentLayout::calculate(Layout::new::<u64>(), nz!(4), PAGE).unwrap();

        _ = layout.buffer_header_offset(4);
    }
}
