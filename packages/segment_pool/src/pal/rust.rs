use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::io;
use std::num::NonZero;
use std::ptr::NonNull;

use new_zealand::nz;

use crate::pal::{PageMapper, Region};

const FALLBACK_PAGE_SIZE: NonZero<usize> = nz!(4096);

/// Emulates page mapping on top of the Rust global allocator.
///
/// We use this under Miri because Miri cannot talk to a real OS, on targets that have no
/// mapping primitive we bind to, and as the backing store of mock mappers in unit tests.
#[derive(Debug, Default)]
#[allow(dead_code, reason = "conditional")]
pub(crate) struct RustMapper;

impl RustMapper {
    fn region_layout(len: NonZero<usize>) -> io::Result<Layout> {
        Layout::from_size_align(len.get(), FALLBACK_PAGE_SIZE.get()).map_err(io::Error::other)
    }
}

impl PageMapper for RustMapper {
    fn page_size(&self) -> NonZero<usize> {
        FALLBACK_PAGE_SIZE
    }

    fn map(&self, len: NonZero<usize>) -> io::Result<Region> {
        let layout = Self::region_layout(len)?;

        // SAFETY: The layout has a non-zero size, which is the only requirement.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;

        // SAFETY: We just allocated `len` bytes aligned to our page size and nobody else
        // has a pointer to them.
        Ok(unsafe { Region::from_raw_parts(ptr, len) })
    }

    fn unmap(&self, region: Region) {
        let layout = Self::region_layout(region.len())
            .expect("layout was valid when the region was mapped, so it is valid now");

        // SAFETY: Regions are only created by map() above with this exact layout and are
        // consumed here, so the memory is deallocated exactly once.
        unsafe {
            dealloc(region.as_ptr().as_ptr(), layout);
        }
    }
}
