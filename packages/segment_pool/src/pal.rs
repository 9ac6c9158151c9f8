mod abstractions;
mod facade;
mod rust;

pub(crate) use abstractions::*;
pub(crate) use facade::*;
pub(crate) use rust::*;

#[cfg(all(unix, not(miri)))]
mod unix;
#[cfg(all(unix, not(miri)))]
pub(crate) use unix::*;

#[cfg(all(windows, not(miri)))]
mod windows;
#[cfg(all(windows, not(miri)))]
pub(crate) use windows::*;

// Miri cannot talk to a real OS and other targets have no mapping primitive we bind to,
// so both fall back to the Rust allocator.
#[cfg(any(miri, not(any(unix, windows))))]
pub(crate) use rust::RustMapper as BuildTargetMapper;

/// Singleton instance of `BuildTargetMapper`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_MAPPER: BuildTargetMapper = BuildTargetMapper;
