//! Errors reported by the heap and its thread caches.

use thiserror::Error;

/// Error
///
/// Argument and construction errors are reported to the immediate caller; exhaustion is reported as a recoverable
/// failure. Double frees are not reported: they panic in debug builds, and are Undefined Behavior otherwise.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Error)]
pub enum Error {
    /// The number of buckets is 0, or greater than `MAX_BUCKETS`.
    #[error("invalid bucket count {0}, expected between 1 and 64")]
    InvalidBucketCount(usize),

    /// The size of a bucket is 0, or too large to be reserved or indexed.
    #[error("invalid bucket size {0}")]
    InvalidBucketSize(usize),

    /// The platform could not reserve the requested memory.
    #[error("platform failed to reserve {size} bytes aligned on {align}")]
    ReservationFailed {
        /// Number of bytes requested.
        size: usize,
        /// Alignment requested.
        align: usize,
    },

    /// The capacity of a thread cache is 0, or too large.
    #[error("invalid thread cache size {0}")]
    InvalidCacheSize(usize),

    /// The size of an allocation is 0, or greater than the allocation limit.
    #[error("invalid allocation size {size}, expected between 1 and {limit}")]
    InvalidSize {
        /// Size requested.
        size: usize,
        /// Allocation limit of the heap.
        limit: usize,
    },

    /// The alignment is not a power of 2, or no bucket can honour it for the requested size.
    #[error("invalid alignment {alignment} for a size of {size}")]
    InvalidAlignment {
        /// Size requested.
        size: usize,
        /// Alignment requested.
        alignment: usize,
    },

    /// A null pointer was passed where an allocation was expected.
    #[error("null pointer")]
    NullPointer,

    /// The pointer does not designate the start of a slot of this heap.
    #[error("pointer {0:#x} was not allocated by this heap")]
    ForeignPointer(usize),

    /// Both the thread cache and the bucket are out of slots.
    #[error("bucket {0} is exhausted")]
    Exhausted(usize),

    /// The calling thread already has a thread cache.
    #[error("a thread cache is already registered for this thread")]
    ThreadCacheExists,

    /// The calling thread is exiting, and can no longer register a thread cache.
    #[error("the calling thread is exiting")]
    ThreadExiting,

    /// The registry of thread caches of the calling thread is already in use, higher up the stack.
    #[error("the thread cache registry of the calling thread is in use")]
    RegistryBusy,
}

impl Error {
    /// Returns whether the same request may succeed later, once memory has been freed.
    pub fn is_recoverable(&self) -> bool { matches!(self, Error::Exhausted(_)) }
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn error_is_recoverable() {
    assert!(Error::Exhausted(3).is_recoverable());

    assert!(!Error::NullPointer.is_recoverable());
    assert!(!Error::InvalidSize { size: 0, limit: 64 }.is_recoverable());
    assert!(!Error::InvalidBucketCount(65).is_recoverable());
}

#[test]
fn error_display() {
    assert_eq!("invalid allocation size 65, expected between 1 and 64",
        Error::InvalidSize { size: 65, limit: 64 }.to_string());
    assert_eq!("pointer 0x40 was not allocated by this heap", Error::ForeignPointer(64).to_string());
    assert_eq!("bucket 2 is exhausted", Error::Exhausted(2).to_string());
    assert_eq!("the calling thread is exiting", Error::ThreadExiting.to_string());
}

} // mod tests
