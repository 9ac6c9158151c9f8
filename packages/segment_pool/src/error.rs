use std::io;

use thiserror::Error;

/// Errors that can occur when building a [`SegmentPool`][crate::SegmentPool] or allocating
/// buffers from it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool configuration was rejected before any memory was mapped.
    #[error("invalid segment pool configuration: {problem}")]
    InvalidConfiguration {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// The operating system refused to map memory for a new segment.
    ///
    /// When returned from a build, no memory remains mapped. When returned from an
    /// allocation, the pool remains in its prior valid state.
    #[error("operating system refused to map a segment of {size} bytes: {source}")]
    OutOfMemory {
        /// Size of the segment mapping that was refused, in bytes.
        size: usize,

        /// The error reported by the operating system.
        source: io::Error,
    },

    /// Every buffer is in use and the pool already holds as many segments as its high mark
    /// allows. No memory mapping was attempted.
    #[error(
        "segment pool is at capacity: {active_segments} active segments reached the high mark of {high_mark}"
    )]
    CapacityExceeded {
        /// Number of active segments at the time of the failed allocation.
        active_segments: usize,

        /// The configured maximum number of active segments.
        high_mark: usize,
    },
}

impl Error {
    pub(crate) fn invalid_configuration(problem: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            problem: problem.into(),
        }
    }
}

/// A specialized `Result` type for segment pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn out_of_memory_exposes_source() {
        let error = Error::OutOfMemory {
            size: 8192,
            source: io::Error::from(io::ErrorKind::OutOfMemory),
        };

        assert!(error.source().is_some());
        assert!(error.to_string().contains("8192"));
    }

    #[test]
    fn capacity_exceeded_mentions_high_mark() {
        let error = Error::CapacityExceeded {
            active_segments: 4,
            high_mark: 4,
        };

        assert!(error.to_string().contains("high mark of 4"));
        assert!(error.source().is_none());
    }

    #[test]
    fn invalid_configuration_carries_problem() {
        let error = Error::invalid_configuration("low mark above high mark");

        assert!(matches!(
            &error,
            Error::InvalidConfiguration { problem } if problem == "low mark above high mark"
        ));
    }
}
