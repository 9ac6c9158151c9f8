use crate::SegmentId;

/// Internal coordinates of a buffer within the pool structure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SlotCoordinates {
    /// The segment containing this buffer.
    segment: SegmentId,
    /// The index within the segment where this buffer is stored.
    index_in_segment: usize,
}

impl SlotCoordinates {
    #[must_use]
    pub(crate) fn from_parts(segment: SegmentId, index_in_segment: usize) -> Self {
        Self {
            segment,
            index_in_segment,
        }
    }

    #[must_use]
    pub(crate) fn segment(&self) -> SegmentId {
        self.segment
    }

    #[must_use]
    pub(crate) fn index_in_segment(&self) -> usize {
        self.index_in_segment
    }
}
