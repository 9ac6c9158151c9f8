use std::io;
use std::num::NonZero;
use std::ptr::{self, NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGESIZE};

use crate::pal::{PageMapper, Region};

/// Page mapper that targets the real operating system that the build is targeting.
///
/// You would only use a different mapper in unit tests that need to inject failures.
/// Even then, whenever possible, unit tests should use the real mapper for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetMapper;

impl PageMapper for BuildTargetMapper {
    fn page_size(&self) -> NonZero<usize> {
        // SAFETY: No safety requirements.
        let page_size = unsafe { libc::sysconf(_SC_PAGESIZE) };

        usize::try_from(page_size)
            .ok()
            .and_then(NonZero::new)
            .unwrap_or_else(|| {
                panic!(
                    "operating system reported an invalid page size {page_size}: {}",
                    io::Error::last_os_error()
                )
            })
    }

    fn map(&self, len: NonZero<usize>) -> io::Result<Region> {
        // SAFETY: We request a fresh private anonymous mapping at an address of the kernel's
        // choosing, so no existing memory is affected.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len.get(),
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap() returned a null mapping"))?;

        // SAFETY: mmap() succeeded, so we own `len` bytes of page-aligned read/write memory
        // until we munmap() them.
        Ok(unsafe { Region::from_raw_parts(ptr, len) })
    }

    fn unmap(&self, region: Region) {
        // SAFETY: Regions handed to us were created by map() above and are consumed here,
        // so each mapping is released exactly once.
        let result = unsafe { libc::munmap(region.as_ptr().as_ptr().cast(), region.len().get()) };

        assert!(result == 0, "{}", io::Error::last_os_error());
    }
}
