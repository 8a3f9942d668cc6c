//! Test helpers for the internals.

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{Configuration, Heap, Platform};

/// Test Heap
pub(crate) type TestHeap<'a> = Heap<&'a TestPlatform>;

/// Test Platform
///
/// Serves reservations from the system allocator, zeroed, and keeps track of what is outstanding.
pub(crate) struct TestPlatform {
    outstanding: AtomicUsize,
    bytes: AtomicUsize,
    //  Number of reservations still allowed, or usize::MAX.
    budget: AtomicUsize,
}

impl TestPlatform {
    pub(crate) fn new() -> Self {
        Self { outstanding: AtomicUsize::new(0), bytes: AtomicUsize::new(0), budget: AtomicUsize::new(usize::MAX) }
    }

    //  Creates a platform which fails after `n` reservations.
    pub(crate) fn with_budget(n: usize) -> Self {
        let result = Self::new();
        result.budget.store(n, Ordering::Relaxed);
        result
    }

    //  Creates a heap of `bucket_count` buckets of `bucket_size` bytes.
    pub(crate) fn heap(&self, bucket_count: usize, bucket_size: usize) -> TestHeap<'_> {
        Heap::new(self, Configuration::new(bucket_count, bucket_size)).expect("Valid configuration")
    }

    //  Returns the number of outstanding reservations.
    pub(crate) fn outstanding(&self) -> usize { self.outstanding.load(Ordering::Relaxed) }

    //  Returns the number of outstanding bytes.
    pub(crate) fn bytes(&self) -> usize { self.bytes.load(Ordering::Relaxed) }
}

impl Platform for TestPlatform {
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        assert_ne!(0, layout.size());
        assert_eq!(0, layout.size() % layout.align());

        let budget = self.budget.load(Ordering::Relaxed);

        if budget == 0 {
            return None;
        }

        if budget != usize::MAX {
            self.budget.store(budget - 1, Ordering::Relaxed);
        }

        let result = NonNull::new(alloc::alloc_zeroed(layout))?;

        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(layout.size(), Ordering::Relaxed);

        Some(result)
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.bytes.fetch_sub(layout.size(), Ordering::Relaxed);

        alloc::dealloc(pointer.as_ptr(), layout);
    }
}

impl Default for TestPlatform {
    fn default() -> Self { Self::new() }
}

/// A zeroed buffer, with the requested layout.
pub(crate) struct AlignedBuffer {
    pointer: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuffer {
    pub(crate) fn new(layout: Layout) -> Self {
        let pointer = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).expect("Allocation");

        Self { pointer, layout }
    }

    pub(crate) fn address(&self) -> NonNull<u8> { self.pointer }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.pointer.as_ptr(), self.layout) };
    }
}
