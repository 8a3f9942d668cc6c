//! Platform
//!
//! The Platform trait is used to reserve memory directly from the Platform: the region carved into buckets, the
//! stocks of the thread caches, and the debug bookkeeping. By abstracting the underlying platform, the heap can be
//! backed by `mmap`, by another allocator, or by a static buffer on a bare-metal target.

use core::{
    alloc::Layout,
    ptr::NonNull,
};

/// Abstraction of platform specific memory reservation and release.
pub trait Platform {
    /// Reserves a fresh block of memory as per the specified layout.
    ///
    /// Returns None if the request cannot be satisfied.
    ///
    /// #   Safety
    ///
    /// The caller may assume that if the returned pointer is not null then:
    /// -   The number of usable bytes is _greater than or equal_ to `layout.size()`.
    /// -   The pointer is _at least_ aligned to `layout.align()`.
    ///
    /// `allocate` assumes that:
    /// -   `layout.size()` is a non-zero multiple of `layout.align()`.
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases the supplied block of memory.
    ///
    /// #   Safety
    ///
    /// The caller should no longer reference the memory after calling this function.
    ///
    /// `deallocate` assumes that:
    /// -   `pointer` was reserved by this instance of `Platform`, with `layout` as argument.
    /// -   `pointer` is the value returned by `allocate`, and not an interior pointer.
    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout);
}

impl<P> Platform for &P
    where
        P: Platform + ?Sized,
{
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> { (**self).allocate(layout) }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) { (**self).deallocate(pointer, layout) }
}
