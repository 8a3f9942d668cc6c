//! Implementation of the Platform trait, on top of the global allocator.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

/// Implementation of the Platform trait, on top of the global allocator.
#[derive(Debug, Default)]
pub(crate) struct SystemPlatform;

impl SystemPlatform {
    /// Creates an instance.
    pub(crate) const fn new() -> Self { Self }
}

impl fbmalloc_core::Platform for SystemPlatform {
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> { NonNull::new(alloc::alloc_zeroed(layout)) }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) { alloc::dealloc(pointer.as_ptr(), layout) }
}
