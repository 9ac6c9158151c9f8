use std::ffi::c_void;
use std::io;
use std::num::NonZero;
use std::ptr::NonNull;

use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAlloc, VirtualFree,
};
use windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use crate::pal::{PageMapper, Region};

/// Page mapper that targets the real operating system that the build is targeting.
///
/// You would only use a different mapper in unit tests that need to inject failures.
/// Even then, whenever possible, unit tests should use the real mapper for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetMapper;

impl PageMapper for BuildTargetMapper {
    fn page_size(&self) -> NonZero<usize> {
        let mut system_info = SYSTEM_INFO::default();

        // SAFETY: We pass a pointer to a valid, writable SYSTEM_INFO.
        unsafe {
            GetSystemInfo(&raw mut system_info);
        }

        usize::try_from(system_info.dwPageSize)
            .ok()
            .and_then(NonZero::new)
            .expect("operating system always reports a positive page size")
    }

    fn map(&self, len: NonZero<usize>) -> io::Result<Region> {
        // SAFETY: We reserve and commit a fresh region at an address of the system's choosing,
        // so no existing memory is affected.
        let ptr = unsafe { VirtualAlloc(None, len.get(), MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)?;

        // SAFETY: VirtualAlloc() succeeded, so we own `len` bytes of page-aligned read/write
        // memory until we release them.
        Ok(unsafe { Region::from_raw_parts(ptr, len) })
    }

    fn unmap(&self, region: Region) {
        // SAFETY: Regions handed to us were created by map() above and are consumed here,
        // so each reservation is released exactly once. MEM_RELEASE requires a zero size.
        let result =
            unsafe { VirtualFree(region.as_ptr().as_ptr().cast::<c_void>(), 0, MEM_RELEASE) };

        if let Err(e) = result {
            panic!("VirtualFree() failed to release a segment: {e}");
        }
    }
}
