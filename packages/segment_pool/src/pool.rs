use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::Mutex;

use tracing::debug;

use crate::constants::ERR_POISONED_LOCK;
use crate::error::Result;
use crate::pal::MapperFacade;
use crate::{PoolState, PoolStats, SegmentLayout, SegmentPolicy, SegmentPoolBuilder};

/// A thread-safe pool of equally-sized buffers carved out of memory segments that are mapped
/// directly from the operating system.
///
/// Each segment holds a fixed number of buffers. Allocating and freeing a buffer is O(1) and
/// never touches the general-purpose heap: a buffer is taken from or returned to the intrusive
/// free list of its segment, and the owning segment of a freed buffer is found by pointer
/// arithmetic on a small header stored in front of every buffer.
///
/// # Memory management
///
/// The pool maps a new segment when every buffer is in use, up to the configured high mark.
/// When a segment becomes entirely idle and more segments than the low mark are active, the
/// segment is parked as a *deletion candidate* instead of being unmapped right away. The
/// candidate is reused if demand returns and is only returned to the operating system once
/// enough buffers are free elsewhere in the pool (see
/// [`deletion_ratio()`][SegmentPoolBuilder::deletion_ratio]). At most one candidate exists,
/// so any further idle segment is unmapped immediately.
///
/// # Example
///
/// ```rust
/// use segment_pool::SegmentPool;
///
/// let pool = SegmentPool::builder()
///     .payload_size(64)
///     .buffers_per_segment(32)
///     .build()?;
///
/// let buffer = pool.allocate()?;
///
/// // SAFETY: The buffer is 64 bytes of memory exclusively owned by us until freed.
/// unsafe { buffer.as_ptr().write_bytes(0xAB, 64) };
///
/// // SAFETY: The buffer came from this pool and is freed exactly once.
/// unsafe { pool.free(buffer) };
/// # Ok::<(), segment_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The pool is thread-safe ([`Send`] and [`Sync`]). All operations on one pool are serialized
/// by a single lock held for a short, bounded time. Buffers may be freed on a different thread
/// than the one that allocated them.
///
/// # Dropping
///
/// Dropping the pool returns every segment to the operating system. All buffers must have been
/// freed before that happens; dropping a pool with buffers still allocated panics after the
/// memory has been released.
#[derive(Debug)]
pub struct SegmentPool {
    layout: SegmentLayout,
    policy: SegmentPolicy,

    state: Mutex<PoolState>,
}

impl SegmentPool {
    /// Creates a builder for configuring and constructing a [`SegmentPool`].
    ///
    /// You must specify the payload size of the buffers using either `.payload_size()`,
    /// `.payload_layout()` or `.payload_layout_of::<T>()` before calling `.build()`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder()
    ///     .payload_layout_of::<[u64; 4]>()
    ///     .buffers_per_segment(16)
    ///     .start_segments(2)
    ///     .low_mark(1)
    ///     .high_mark(8)
    ///     .build()?;
    ///
    /// assert_eq!(pool.stats().active_segments(), 2);
    /// assert_eq!(pool.stats().free_buffers(), 32);
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    #[inline]
    pub fn builder() -> SegmentPoolBuilder {
        SegmentPoolBuilder::new()
    }

    /// Creates the pool and eagerly maps `start_segments` segments.
    ///
    /// If any of the segments cannot be mapped, everything mapped so far is released again.
    pub(crate) fn new_inner(
        layout: SegmentLayout,
        policy: SegmentPolicy,
        start_segments: usize,
        mapper: MapperFacade,
    ) -> Result<Self> {
        let mut state = PoolState::new(mapper, layout, policy);

        // Dropping the state on failure unmaps the segments that did get mapped.
        state.populate(start_segments)?;

        debug!(
            payload_size = layout.payload_layout().size(),
            buffers_per_segment = layout.buffers_per_segment().get(),
            segment_size = layout.segment_size().get(),
            start_segments,
            low_mark = policy.low_mark,
            high_mark = policy.high_mark,
            "created segment pool"
        );

        Ok(Self {
            layout,
            policy,
            state: Mutex::new(state),
        })
    }

    /// Allocates a buffer and returns a pointer to its payload.
    ///
    /// The payload is [`payload_layout().size()`](Self::payload_layout) bytes long, aligned to
    /// [`payload_layout().align()`](Self::payload_layout) and exclusively owned by the caller
    /// until it is passed to [`free()`](Self::free). Its contents are unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`][crate::Error::CapacityExceeded] if every buffer is
    /// in use and the pool already holds as many segments as its high mark allows.
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if a new segment was needed
    /// but the operating system refused to map it. The pool remains usable.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::{Error, SegmentPool};
    ///
    /// let pool = SegmentPool::builder()
    ///     .payload_size(32)
    ///     .buffers_per_segment(2)
    ///     .high_mark(1)
    ///     .build()?;
    ///
    /// let a = pool.allocate()?;
    /// let b = pool.allocate()?;
    /// assert!(matches!(pool.allocate(), Err(Error::CapacityExceeded { .. })));
    ///
    /// // SAFETY: Both buffers came from this pool and are freed exactly once.
    /// unsafe {
    ///     pool.free(a);
    ///     pool.free(b);
    /// }
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub fn allocate(&self) -> Result<NonNull<u8>> {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);
        state.allocate()
    }

    /// Returns a buffer to the pool.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by [`allocate()`](Self::allocate) on this same pool
    /// and must not have been freed since. The caller must not access the payload after this
    /// call.
    ///
    /// Debug builds detect some violations of these rules and panic. Release builds do not
    /// check them and the behavior is undefined.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder().payload_size(128).build()?;
    ///
    /// let buffer = pool.allocate()?;
    /// assert_eq!(pool.stats().outstanding_buffers(), 1);
    ///
    /// // SAFETY: The buffer came from this pool and is freed exactly once.
    /// unsafe { pool.free(buffer) };
    /// assert_eq!(pool.stats().outstanding_buffers(), 0);
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    pub unsafe fn free(&self, payload: NonNull<u8>) {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        // SAFETY: Forwarding the caller's guarantee that this is a live buffer of this pool.
        unsafe {
            state.free(payload);
        }
    }

    /// Returns a consistent snapshot of the pool bookkeeping.
    ///
    /// This operation may block if another thread is currently accessing the pool.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.state.lock().expect(ERR_POISONED_LOCK).stats()
    }

    /// The memory layout of every buffer payload.
    ///
    /// This is the requested layout, widened where necessary so that a free buffer can hold
    /// the link to the next free buffer.
    ///
    /// # Example
    ///
    /// ```rust
    /// use segment_pool::SegmentPool;
    ///
    /// let pool = SegmentPool::builder().payload_size(1).build()?;
    ///
    /// // Free buffers store a link in their payload, so payloads are never smaller than that.
    /// assert_eq!(pool.payload_layout().size(), size_of::<usize>());
    /// # Ok::<(), segment_pool::Error>(())
    /// ```
    #[must_use]
    #[inline]
    pub fn payload_layout(&self) -> Layout {
        self.layout.payload_layout()
    }

    /// Number of buffers in each segment.
    #[must_use]
    #[inline]
    pub fn buffers_per_segment(&self) -> NonZero<usize> {
        self.layout.buffers_per_segment()
    }

    /// Number of bytes mapped from the operating system for each segment.
    #[must_use]
    #[inline]
    pub fn segment_size(&self) -> NonZero<usize> {
        self.layout.segment_size()
    }

    /// The pool never retires idle segments if that would leave fewer active segments.
    #[must_use]
    #[inline]
    pub fn segment_low_mark(&self) -> usize {
        self.policy.low_mark
    }

    /// The pool never grows beyond this many active segments.
    #[must_use]
    #[inline]
    pub fn segment_high_mark(&self) -> usize {
        self.policy.high_mark
    }

    /// A parked deletion candidate is released once more than this many buffers are free
    /// in the active segments.
    #[must_use]
    #[inline]
    pub fn deletion_threshold(&self) -> usize {
        self.policy.deletion_threshold
    }

    #[cfg(test)]
    fn with_state<R>(&self, f: impl FnOnce(&PoolState) -> R) -> R {
        f(&self.state.lock().expect(ERR_POISONED_LOCK))
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::collections::HashSet;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::Error;
    use crate::pal::{MockPageMapper, PageMapper, RustMapper};

    assert_impl_all!(SegmentPool: Send, Sync, std::fmt::Debug);

    #[derive(Clone, Debug, Default)]
    struct Counters {
        mapped: Arc<AtomicUsize>,
        unmapped: Arc<AtomicUsize>,
    }

    impl Counters {
        fn mapped(&self) -> usize {
            self.mapped.load(Ordering::Relaxed)
        }

        fn unmapped(&self) -> usize {
            self.unmapped.load(Ordering::Relaxed)
        }
    }

    /// Mapper backed by the Rust allocator that refuses to map more than `successes`
    /// segments and counts how many segments have been mapped and unmapped.
    fn limited_mapper(successes: usize, counters: &Counters) -> MapperFacade {
        let mut mock = MockPageMapper::new();

        mock.expect_page_size()
            .return_const(RustMapper.page_size());

        let mapped = Arc::clone(&counters.mapped);
        mock.expect_map().returning(move |len| {
            if mapped.load(Ordering::Relaxed) == successes {
                return Err(io::Error::from(io::ErrorKind::OutOfMemory));
            }

            mapped.fetch_add(1, Ordering::Relaxed);
            RustMapper.map(len)
        });

        let unmapped = Arc::clone(&counters.unmapped);
        mock.expect_unmap().returning(move |region| {
            unmapped.fetch_add(1, Ordering::Relaxed);
            RustMapper.unmap(region);
        });

        MapperFacade::from_mock(mock)
    }

    fn counting_mapper(counters: &Counters) -> MapperFacade {
        limited_mapper(usize::MAX, counters)
    }

    fn free_all(pool: &SegmentPool, buffers: impl IntoIterator<Item = NonNull<u8>>) {
        for buffer in buffers {
            unsafe { pool.free(buffer) };
        }
    }

    #[test]
    fn smoke_test() {
        let pool = SegmentPool::builder()
            .payload_size(24)
            .buffers_per_segment(4)
            .build()
            .unwrap();

        assert_eq!(pool.stats().active_segments(), 1);
        assert_eq!(pool.stats().free_buffers(), 4);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe {
            a.as_ptr().write_bytes(1, 24);
            b.as_ptr().write_bytes(2, 24);
            assert_eq!(a.as_ptr().add(23).read(), 1);
            assert_eq!(b.as_ptr().add(23).read(), 2);
        }

        assert_eq!(pool.stats().outstanding_buffers(), 2);
        assert_eq!(pool.stats().free_buffers(), 2);

        free_all(&pool, [a, b]);

        assert_eq!(pool.stats().outstanding_buffers(), 0);
        assert_eq!(pool.stats().free_buffers(), 4);
    }

    #[test]
    fn allocated_buffers_are_distinct_and_aligned() {
        let pool = SegmentPool::builder()
            .payload_layout(Layout::from_size_align(40, 64).unwrap())
            .buffers_per_segment(8)
            .build()
            .unwrap();

        let buffers = (0..50)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        let unique = buffers.iter().copied().collect::<HashSet<_>>();
        assert_eq!(unique.len(), buffers.len());

        for buffer in &buffers {
            assert_eq!(buffer.as_ptr().addr() % 64, 0);
        }

        // Fill every buffer completely, then verify nothing was overwritten by a neighbor.
        for (i, buffer) in buffers.iter().enumerate() {
            unsafe { buffer.as_ptr().write_bytes(u8::try_from(i).unwrap(), 40) };
        }

        for (i, buffer) in buffers.iter().enumerate() {
            let bytes = unsafe { std::slice::from_raw_parts(buffer.as_ptr(), 40) };
            assert!(bytes.iter().all(|b| usize::from(*b) == i));
        }

        free_all(&pool, buffers);
    }

    #[test]
    fn round_trip_restores_counters() {
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(4)
            .start_segments(2)
            .build()
            .unwrap();

        let keep = pool.allocate().unwrap();
        let before = pool.stats();

        let buffer = pool.allocate().unwrap();
        unsafe { pool.free(buffer) };

        assert_eq!(pool.stats(), before);

        unsafe { pool.free(keep) };
    }

    #[test]
    fn scenario_growth_then_first_segment_becomes_candidate() {
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(4)
            .start_segments(1)
            .low_mark(1)
            .high_mark(2)
            .build_with_mapper(counting_mapper(&counters))
            .unwrap();

        let first_segment = (0..4)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(counters.mapped(), 1);

        // The fifth allocation needs a second segment, which the high mark allows.
        let fifth = pool.allocate().unwrap();
        assert_eq!(counters.mapped(), 2);
        assert_eq!(pool.stats().active_segments(), 2);

        free_all(&pool, first_segment);

        let stats = pool.stats();
        assert!(stats.has_deletion_candidate());
        assert_eq!(stats.active_segments(), 1);
        assert_eq!(stats.free_buffers(), 3);
        assert_eq!(counters.unmapped(), 0);

        // The remaining segment is at the low mark, so it stays active when it becomes idle.
        unsafe { pool.free(fifth) };
        assert_eq!(pool.stats().active_segments(), 1);

        drop(pool);
        assert_eq!(counters.unmapped(), 2);
    }

    #[test]
    fn scenario_cannot_grow_past_high_mark() {
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(4)
            .start_segments(1)
            .low_mark(1)
            .high_mark(1)
            .build_with_mapper(counting_mapper(&counters))
            .unwrap();

        let buffers = (0..4)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        let result = pool.allocate();
        assert!(matches!(
            result,
            Err(Error::CapacityExceeded {
                active_segments: 1,
                high_mark: 1
            })
        ));

        // No mapping was even attempted.
        assert_eq!(counters.mapped(), 1);

        free_all(&pool, buffers);
    }

    #[test]
    fn scenario_free_into_front_segment_keeps_order() {
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(4)
            .start_segments(3)
            .low_mark(3)
            .build()
            .unwrap();

        let order_before = pool.with_state(PoolState::active_segment_order);

        let buffer = pool.allocate().unwrap();
        assert_eq!(pool.with_state(PoolState::active_segment_order), order_before);

        unsafe { pool.free(buffer) };
        assert_eq!(pool.with_state(PoolState::active_segment_order), order_before);
    }

    #[test]
    fn free_into_other_segment_moves_it_to_front() {
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(2)
            .start_segments(2)
            .low_mark(2)
            .build()
            .unwrap();

        let initial = pool.with_state(PoolState::active_segment_order);
        let (front, back) = (initial[0], initial[1]);

        // Exhausting the front segment sends it to the back.
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert_eq!(
            pool.with_state(PoolState::active_segment_order),
            vec![back, front]
        );

        // Freeing into it brings it back to the front.
        unsafe { pool.free(a) };
        assert_eq!(
            pool.with_state(PoolState::active_segment_order),
            vec![front, back]
        );

        // The next allocation reuses the freed slot.
        let c = pool.allocate().unwrap();
        assert_eq!(c, a);

        free_all(&pool, [b, c]);
    }

    #[test]
    fn candidate_released_only_after_threshold_exceeded() {
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(10)
            .start_segments(3)
            .low_mark(1)
            .deletion_ratio(0.3)
            .build_with_mapper(counting_mapper(&counters))
            .unwrap();

        assert_eq!(pool.deletion_threshold(), 3);

        // Segments are drained front to back, so each chunk of 10 shares a segment.
        let mut buffers = (0..30)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();
        let third = buffers.split_off(20);
        let second = buffers.split_off(10);
        let first = buffers;

        free_all(&pool, first);
        assert!(pool.stats().has_deletion_candidate());
        assert_eq!(pool.stats().free_buffers(), 0);

        let mut second = second.into_iter();

        for _ in 0..4 {
            unsafe { pool.free(second.next().unwrap()) };

            assert!(pool.stats().has_deletion_candidate());
            assert_eq!(counters.unmapped(), 0);
        }

        // Four buffers are now free elsewhere, which exceeds the threshold of three.
        unsafe { pool.free(second.next().unwrap()) };

        assert!(!pool.stats().has_deletion_candidate());
        assert_eq!(counters.unmapped(), 1);

        free_all(&pool, second);
        free_all(&pool, third);
    }

    #[test]
    fn idle_segment_released_immediately_when_candidate_exists() {
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(1)
            .start_segments(3)
            .low_mark(1)
            .build_with_mapper(counting_mapper(&counters))
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        unsafe { pool.free(a) };
        assert!(pool.stats().has_deletion_candidate());
        assert_eq!(counters.unmapped(), 0);

        let candidate = pool.with_state(PoolState::deletion_candidate);

        unsafe { pool.free(b) };
        assert_eq!(counters.unmapped(), 1);
        assert_eq!(pool.stats().active_segments(), 1);

        // The original candidate is kept; the newly idle segment went straight back to the OS.
        assert_eq!(pool.with_state(PoolState::deletion_candidate), candidate);

        unsafe { pool.free(c) };
        assert_eq!(pool.stats().active_segments(), 1);

        drop(pool);
        assert_eq!(counters.unmapped(), 3);
    }

    #[test]
    fn candidate_is_reactivated_instead_of_mapping() {
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(1)
            .start_segments(2)
            .low_mark(1)
            .build_with_mapper(counting_mapper(&counters))
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe { pool.free(a) };
        assert!(pool.stats().has_deletion_candidate());

        let c = pool.allocate().unwrap();

        assert_eq!(c, a);
        assert_eq!(counters.mapped(), 2);
        assert!(!pool.stats().has_deletion_candidate());
        assert_eq!(pool.stats().active_segments(), 2);

        free_all(&pool, [b, c]);
    }

    #[test]
    fn high_mark_is_a_hard_ceiling_after_reactivation() {
        // Comparing with `>` would let a reactivated candidate push the pool to three segments.
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(1)
            .start_segments(2)
            .low_mark(1)
            .high_mark(2)
            .build_with_mapper(counting_mapper(&counters))
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe { pool.free(a) };
        let c = pool.allocate().unwrap();
        assert_eq!(pool.stats().active_segments(), 2);

        assert!(matches!(
            pool.allocate(),
            Err(Error::CapacityExceeded {
                active_segments: 2,
                high_mark: 2
            })
        ));
        assert_eq!(counters.mapped(), 2);

        free_all(&pool, [b, c]);
    }

    #[test]
    fn low_mark_is_never_undercut() {
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(2)
            .start_segments(3)
            .low_mark(3)
            .build_with_mapper(counting_mapper(&counters))
            .unwrap();

        let buffers = (0..6)
            .map(|_| pool.allocate().unwrap())
            .collect::<Vec<_>>();

        free_all(&pool, buffers);

        let stats = pool.stats();
        assert_eq!(stats.active_segments(), 3);
        assert!(!stats.has_deletion_candidate());
        assert_eq!(counters.unmapped(), 0);
    }

    #[test]
    fn out_of_memory_during_growth_leaves_pool_usable() {
        let counters = Counters::default();
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(2)
            .build_with_mapper(limited_mapper(1, &counters))
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let before = pool.stats();

        let result = pool.allocate();
        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        assert_eq!(pool.stats(), before);

        unsafe { pool.free(a) };
        let c = pool.allocate().unwrap();

        free_all(&pool, [b, c]);
    }

    #[test]
    fn failed_build_releases_mapped_segments() {
        let counters = Counters::default();
        let result = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(2)
            .start_segments(3)
            .build_with_mapper(limited_mapper(2, &counters));

        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        assert_eq!(counters.mapped(), 2);
        assert_eq!(counters.unmapped(), 2);
    }

    #[test]
    fn conservation_holds_through_churn() {
        let pool = SegmentPool::builder()
            .payload_size(8)
            .buffers_per_segment(3)
            .start_segments(1)
            .low_mark(1)
            .build()
            .unwrap();

        let mut outstanding = Vec::new();

        for round in 0..200_usize {
            if round % 3 == 2 && !outstanding.is_empty() {
                let buffer = outstanding.swap_remove(round % outstanding.len());
                unsafe { pool.free(buffer) };
            } else {
                outstanding.push(pool.allocate().unwrap());
            }

            let stats = pool.stats();
            assert_eq!(stats.outstanding_buffers(), outstanding.len());
            assert_eq!(
                stats.free_buffers() + outstanding.len(),
                stats.active_segments() * 3
            );
            assert!(stats.active_segments() >= 1);
        }

        free_all(&pool, outstanding);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn allocated_buffers_are_stamped_in_debug_builds() {
        let pool = SegmentPool::builder()
            .payload_size(32)
            .buffers_per_segment(2)
            .build()
            .unwrap();

        let buffer = pool.allocate().unwrap();

        let bytes = unsafe { std::slice::from_raw_parts(buffer.as_ptr(), 32) };
        assert!(bytes.iter().all(|b| *b == crate::constants::STAMP_BYTE));

        unsafe { pool.free(buffer) };
    }

    #[test]
    #[should_panic]
    fn dropping_with_outstanding_buffers_panics() {
        let pool = SegmentPool::builder()
            .payload_size(16)
            .buffers_per_segment(2)
            .build()
            .unwrap();

        _ = pool.allocate().unwrap();

        drop(pool);
    }

    #[test]
    fn buffers_can_be_freed_on_another_thread() {
        let pool = Arc::new(
            SegmentPool::builder()
                .payload_size(16)
                .buffers_per_segment(4)
                .build()
                .unwrap(),
        );

        let buffer = pool.allocate().unwrap();
        let address = buffer.as_ptr().expose_provenance();

        std::thread::spawn({
            let pool = Arc::clone(&pool);
            move || {
                let buffer = NonNull::new(std::ptr::with_exposed_provenance_mut::<u8>(address))
                    .unwrap();
                unsafe { pool.free(buffer) };
            }
        })
        .join()
        .unwrap();

        assert_eq!(pool.stats().outstanding_buffers(), 0);
    }
}
