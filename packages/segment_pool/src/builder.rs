use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::constants::{DEFAULT_BUFFERS_PER_SEGMENT, DEFAULT_DELETION_RATIO};
use crate::error::{Error, Result};
use crate::pal::{MapperFacade, PageMapper};
use crate::{SegmentLayout, SegmentPolicy, SegmentPool};

/// Builder for creating an instance of [`SegmentPool`].
///
/// The payload size is the only required setting. Everything else has a default:
///
/// | Setting | Default |
/// |---------|---------|
/// | `buffers_per_segment` | 128 |
/// | `start_segments` | 1 |
/// | `low_mark` | 1 |
/// | `high_mark` | unbounded |
/// | `deletion_ratio` | 0.333 |
///
/// # Examples
///
/// ```
/// use segment_pool::SegmentPool;
///
/// let pool = SegmentPool::builder()
///     .payload_size(256)
///     .buffers_per_segment(64)
///     .start_segments(2)
///     .low_mark(2)
///     .high_mark(16)
///     .deletion_ratio(0.5)
///     .build()?;
///
/// assert_eq!(pool.payload_layout().size(), 256);
/// assert_eq!(pool.deletion_threshold(), 32);
/// # Ok::<(), segment_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe (not [`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct SegmentPoolBuilder {
    payload_size: Option<usize>,
    payload_align: usize,
    buffers_per_segment: usize,
    start_segments: usize,
    low_mark: usize,
    high_mark: usize,
    deletion_ratio: f64,

    _not_sync: PhantomData<Cell<()>>,
}

impl SegmentPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            payload_size: None,
            payload_align: 1,
            buffers_per_segment: DEFAULT_BUFFERS_PER_SEGMENT.get(),
            start_segments: 1,
            low_mark: 1,
            high_mark: usize::MAX,
            deletion_ratio: DEFAULT_DELETION_RATIO,
            _not_sync: PhantomData,
        }
    }

    /// Sets the size in bytes of every buffer, with no alignment requirement beyond what the
    /// pool needs internally.
    ///
    /// Replaces any layout set by [`payload_layout()`](Self::payload_layout).
    pub fn payload_size(mut self, size: usize) -> Self {
        self.payload_size = Some(size);
        self.payload_align = 1;
        self
    }

    /// Sets the size and alignment of every buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder()
    ///     .payload_layout(Layout::from_size_align(48, 64).unwrap())
    ///     .build()?;
    ///
    /// let buffer = pool.allocate()?;
    /// assert_eq!(buffer.as_ptr().addr() % 64, 0);
    ///
    /// // SAFETY: The buffer came from this pool and is freed exactly once.
    /// unsafe { pool.free(buffer) };
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub fn payload_layout(mut self, layout: Layout) -> Self {
        self.payload_size = Some(layout.size());
        self.payload_align = layout.align();
        self
    }

    /// Sizes and aligns every buffer to hold one value of type `T`.
    pub fn payload_layout_of<T>(self) -> Self {
        self.payload_layout(Layout::new::<T>())
    }

    /// Sets how many buffers each segment holds. Must be greater than zero.
    pub fn buffers_per_segment(mut self, count: usize) -> Self {
        self.buffers_per_segment = count;
        self
    }

    /// Sets how many segments are mapped when the pool is built.
    ///
    /// Must be between the low mark and the high mark (inclusive). Zero is allowed if the low
    /// mark is also zero, in which case nothing is mapped until the first allocation.
    pub fn start_segments(mut self, count: usize) -> Self {
        self.start_segments = count;
        self
    }

    /// Sets the number of active segments below which idle segments are no longer retired.
    pub fn low_mark(mut self, count: usize) -> Self {
        self.low_mark = count;
        self
    }

    /// Sets the maximum number of active segments. Allocations that would need more fail with
    /// [`Error::CapacityExceeded`].
    pub fn high_mark(mut self, count: usize) -> Self {
        self.high_mark = count;
        self
    }

    /// Sets how eagerly a parked idle segment is returned to the operating system.
    ///
    /// The parked segment is released once more than
    /// `floor(buffers_per_segment * ratio)` buffers are free in the other segments. Lower
    /// values release memory sooner; higher values keep the segment around longer to absorb
    /// allocation bursts. Must be in the range `0.0..1.0`.
    pub fn deletion_ratio(mut self, ratio: f64) -> Self {
        self.deletion_ratio = ratio;
        self
    }

    /// Validates the configuration, maps the starting segments and returns the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if the payload size was never set or is zero,
    /// if the payload alignment exceeds the page size, if `buffers_per_segment` is zero, if the
    /// marks are inconsistent with each other or with `start_segments`, if the deletion ratio
    /// is outside `0.0..1.0`, or if a segment would not fit in the address space.
    ///
    /// Returns [`Error::OutOfMemory`] if a starting segment could not be mapped. Any segments
    /// mapped before the failure are released again.
    pub fn build(self) -> Result<SegmentPool> {
        self.build_with_mapper(MapperFacade::real())
    }

    pub(crate) fn build_with_mapper(self, mapper: MapperFacade) -> Result<SegmentPool> {
        let payload_size = self.payload_size.ok_or_else(|| {
            Error::invalid_configuration(
                "payload size must be set via payload_size(), payload_layout() or payload_layout_of()",
            )
        })?;

        let buffers_per_segment = NonZero::new(self.buffers_per_segment).ok_or_else(|| {
            Error::invalid_configuration("buffers_per_segment must be greater than zero")
        })?;

        if self.low_mark > self.high_mark {
            return Err(Error::invalid_configuration(format!(
                "low mark {} is above high mark {}",
                self.low_mark, self.high_mark
            )));
        }

        if self.start_segments < self.low_mark {
            return Err(Error::invalid_configuration(format!(
                "start_segments {} is below low mark {}",
                self.start_segments, self.low_mark
            )));
        }

        if self.start_segments > self.high_mark {
            return Err(Error::invalid_configuration(format!(
                "start_segments {} is above high mark {}",
                self.start_segments, self.high_mark
            )));
        }

        // Also rejects NaN.
        if !(0.0..1.0).contains(&self.deletion_ratio) {
            return Err(Error::invalid_configuration(format!(
                "deletion ratio {} is outside 0.0..1.0",
                self.deletion_ratio
            )));
        }

        let requested_payload = Layout::from_size_align(payload_size, self.payload_align)
            .map_err(|e| Error::invalid_configuration(format!("payload layout is invalid: {e}")))?;

        let layout =
            SegmentLayout::calculate(requested_payload, buffers_per_segment, mapper.page_size())?;

        let policy = SegmentPolicy {
            low_mark: self.low_mark,
            high_mark: self.high_mark,
            deletion_threshold: layout.deletion_threshold(self.deletion_ratio),
        };

        SegmentPool::new_inner(layout, policy, self.start_segments, mapper)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SegmentPoolBuilder: Send, Debug);
    assert_not_impl_any!(SegmentPoolBuilder: Sync);

    fn assert_invalid(result: Result<SegmentPool>) {
        assert!(
            matches!(result, Err(Error::InvalidConfiguration { .. })),
            "expected a configuration error, got {result:?}"
        );
    }

    #[test]
    fn defaults_produce_working_pool() {
        let pool = SegmentPool::builder().payload_size(16).build().unwrap();

        assert_eq!(pool.buffers_per_segment(), DEFAULT_BUFFERS_PER_SEGMENT);
        assert_eq!(pool.segment_low_mark(), 1);
        assert_eq!(pool.segment_high_mark(), usize::MAX);
        assert_eq!(pool.stats().active_segments(), 1);
        assert_eq!(
            pool.stats().free_buffers(),
            DEFAULT_BUFFERS_PER_SEGMENT.get()
        );
    }

    #[test]
    fn payload_size_is_required() {
        assert_invalid(SegmentPool::builder().build());
    }

    #[test]
    fn zero_payload_size_is_rejected() {
        assert_invalid(SegmentPool::builder().payload_size(0).build());
    }

    #[test]
    fn zero_buffers_per_segment_is_rejected() {
        assert_invalid(
            SegmentPool::builder()
                .payload_size(16)
                .buffers_per_segment(0)
                .build(),
        );
    }

    #[test]
    fn low_mark_above_high_mark_is_rejected() {
        assert_invalid(
            SegmentPool::builder()
                .payload_size(16)
                .start_segments(3)
                .low_mark(3)
                .high_mark(2)
                .build(),
        );
    }

    #[test]
    fn start_below_low_mark_is_rejected() {
        assert_invalid(
            SegmentPool::builder()
                .payload_size(16)
                .start_segments(1)
                .low_mark(2)
                .build(),
        );
    }

    #[test]
    fn start_above_high_mark_is_rejected() {
        assert_invalid(
            SegmentPool::builder()
                .payload_size(16)
                .start_segments(3)
                .high_mark(2)
                .build(),
        );
    }

    #[test]
    fn deletion_ratio_out_of_range_is_rejected() {
        for ratio in [-0.1, 1.0, 1.5, f64::NAN, f64::INFINITY] {
            assert_invalid(
                SegmentPool::builder()
                    .payload_size(16)
                    .deletion_ratio(ratio)
                    .build(),
            );
        }
    }

    #[test]
    fn overflowing_segment_is_rejected() {
        assert_invalid(
            SegmentPool::builder()
                .payload_size(1 << 20)
                .buffers_per_segment(usize::MAX)
                .build(),
        );
    }

    #[test]
    fn start_segments_zero_maps_lazily() {
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(4)
            .start_segments(0)
            .low_mark(0)
            .build()
            .unwrap();

        assert_eq!(pool.stats().active_segments(), 0);
        assert_eq!(pool.stats().free_buffers(), 0);

        let buffer = pool.allocate().unwrap();
        assert_eq!(pool.stats().active_segments(), 1);

        // SAFETY: The buffer came from this pool and is freed exactly once.
        unsafe { pool.free(buffer) };

        // Above the low mark of zero, so the idle segment is parked.
        assert_eq!(pool.stats().active_segments(), 0);
        assert!(pool.stats().has_deletion_candidate());
    }

    #[test]
    fn payload_size_resets_alignment() {
        let pool = SegmentPool::builder()
            .payload_layout(Layout::from_size_align(32, 128).unwrap())
            .payload_size(32)
            .build()
            .unwrap();

        assert_eq!(pool.payload_layout().size(), 32);
        assert_eq!(pool.payload_layout().align(), align_of::<usize>());
    }

    #[test]
    fn payload_layout_of_type() {
        let pool = SegmentPool::builder()
            .payload_layout_of::<[u128; 3]>()
            .build()
            .unwrap();

        assert_eq!(pool.payload_layout().size(), size_of::<[u128; 3]>());
        assert_eq!(pool.payload_layout().align(), align_of::<u128>());
    }

    #[test]
    fn deletion_threshold_follows_ratio() {
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(10)
            .deletion_ratio(0.3)
            .build()
            .unwrap();

        assert_eq!(pool.deletion_threshold(), 3);
    }
}
