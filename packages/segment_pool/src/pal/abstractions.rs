use std::fmt::Debug;
use std::io;
use std::num::NonZero;
use std::ptr::NonNull;

/// A span of page-aligned, readable and writable memory handed out by a [`PageMapper`].
///
/// A region can only be created by a mapper and can only be given back by value, so the
/// same region can never be returned to the operating system twice.
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct Region {
    ptr: NonNull<u8>,
    len: NonZero<usize>,
}

impl Region {
    /// # Safety
    ///
    /// `ptr` must point to `len` bytes of page-aligned, readable and writable memory that
    /// remains valid and unaliased until the region is returned to the mapper that created it.
    #[must_use]
    pub(crate) unsafe fn from_raw_parts(ptr: NonNull<u8>, len: NonZero<usize>) -> Self {
        Self { ptr, len }
    }

    #[must_use]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[must_use]
    pub(crate) fn len(&self) -> NonZero<usize> {
        self.len
    }
}

/// Operating system page mapping service: reserve+commit a region, release it later.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait PageMapper: Debug + Send + Sync + 'static {
    /// Granularity at which the operating system hands out memory.
    fn page_size(&self) -> NonZero<usize>;

    /// Maps a fresh region of at least `len` bytes.
    fn map(&self, len: NonZero<usize>) -> io::Result<Region>;

    /// Returns a region to the operating system. Any pointers into it become dangling.
    fn unmap(&self, region: Region);
}
