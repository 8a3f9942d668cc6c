//! Thread Cache
//!
//! The Thread Cache is a thread-local front-end to a Heap; the user is expected to create one for each of the threads
//! they use, and on each allocation to refer to the thread-local Thread Cache.
//!
//! A Thread Cache does not borrow its Heap: the Heap is passed to each call instead, so that the user may store both
//! wherever suits them. Passing the Heap a cache was not created from is caught, and panics.
//!
//! #   Safety
//!
//! A Thread Cache is `Send`, but not `Sync`: it makes no attempt at synchronizing accesses to its stocks.

use core::{
    alloc::Layout,
    cmp,
    mem,
    ptr::{self, NonNull},
};

use crate::{CacheOptions, CacheStatistics, Error, Heap, Platform};
use crate::internals::thread_local::ThreadLocal;

use super::heap::Resize;

/// ThreadCache
///
/// A private stock of free slots per bucket, refilled from and flushed to the buckets of its Heap in batches.
pub struct ThreadCache {
    //  Identity of the heap.
    heap: usize,
    options: CacheOptions,
    storage: NonNull<u32>,
    storage_layout: Layout,
    local: ThreadLocal,
}

impl ThreadCache {
    /// Creates an instance for `heap`, reserving its stocks from the heap platform, and warming them up.
    ///
    /// #   Errors
    ///
    /// -   `InvalidCacheSize` if the size of the cache is 0, or too large.
    /// -   `ReservationFailed` if the platform cannot reserve the stocks.
    pub fn new<P: Platform>(heap: &Heap<P>, options: CacheOptions) -> Result<Self, Error> {
        options.validate()?;

        let invalid_size = Error::InvalidCacheSize(options.size);
        let bucket_count = heap.bucket_count();

        let entries = options.size.checked_mul(bucket_count).ok_or(invalid_size)?;
        let bytes = entries.checked_mul(mem::size_of::<u32>()).ok_or(invalid_size)?;
        let storage_layout = Layout::from_size_align(bytes, mem::align_of::<u32>()).map_err(|_| invalid_size)?;

        //  Safety:
        //  -   `storage_layout.size()` is a non-zero multiple of `storage_layout.align()`.
        let storage = unsafe { heap.platform().allocate(storage_layout) }
            .ok_or(Error::ReservationFailed { size: storage_layout.size(), align: storage_layout.align() })?;

        //  Safety:
        //  -   `storage` points to `storage_layout.size()` writable bytes.
        unsafe { ptr::write_bytes(storage.as_ptr(), 0, storage_layout.size()) };

        let storage = storage.cast::<u32>();

        //  Safety:
        //  -   `storage` points to `bucket_count * size` u32, exclusively owned.
        //  -   `options.size` fits in u32, as validated.
        let mut local = unsafe { ThreadLocal::new(storage, bucket_count, options.size as u32, options.batch()) };

        for bucket in heap.buckets() {
            local.warm_up(bucket, options.warmup);
        }

        Ok(Self { heap: heap.identity(), options, storage, storage_layout, local })
    }

    /// Returns the options the instance was created with.
    pub fn options(&self) -> CacheOptions { self.options }

    /// Returns the statistics of the instance.
    pub fn statistics(&self) -> CacheStatistics { self.local.statistics() }

    /// Returns the number of slots in stock for the bucket.
    pub fn stocked(&self, bucket: crate::BucketIndex) -> usize { self.local.stocked(bucket.value()) }

    /// Allocates `size` bytes, aligned on `alignment`, 0 meaning natural alignment.
    ///
    /// The memory is served from the stock of the bucket, refilling it from the bucket in a single batch if empty.
    ///
    /// #   Errors
    ///
    /// -   `InvalidSize` or `InvalidAlignment` if no bucket can serve the request.
    /// -   `Exhausted` if neither the stock nor the bucket have any slot left.
    pub fn allocate<P: Platform>(&mut self, heap: &Heap<P>, size: usize, alignment: usize)
        -> Result<NonNull<u8>, Error>
    {
        self.check_heap(heap);

        let index = heap.bucket_for(size, alignment)?;
        let bucket = heap.bucket(index).ok_or(Error::Exhausted(index.value()))?;

        self.local.allocate(bucket)
    }

    /// Deallocates the memory pointed to by `ptr`.
    ///
    /// The slot is stocked, flushing half of the stock back to the bucket first if full. The slot need not have been
    /// allocated by this instance, as long as it was allocated from the same heap.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` if `ptr` is null.
    /// -   `ForeignPointer` if `ptr` is not the start of a slot of `heap`.
    ///
    /// #   Panics
    ///
    /// In debug builds, if `ptr` is not currently allocated.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` is no longer referenced.
    pub unsafe fn deallocate<P: Platform>(&mut self, heap: &Heap<P>, ptr: *mut u8) -> Result<(), Error> {
        self.check_heap(heap);

        let (bucket, ptr) = heap.locate(ptr)?;

        self.local.deallocate(bucket, ptr)
    }

    /// Reallocates the memory pointed to by `ptr` to hold `size` bytes, aligned on `alignment`.
    ///
    /// If the current slot is large enough, and sufficiently aligned, `ptr` is returned as is. Otherwise a new slot is
    /// allocated, the first `min(slot size, size)` bytes are copied over, and the current slot is deallocated.
    ///
    /// #   Errors
    ///
    /// Any error of `allocate` or `deallocate`; in which case `ptr` is left untouched.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` is not referenced by anyone else, and is no longer referenced if a new pointer is returned.
    pub unsafe fn reallocate<P: Platform>(&mut self, heap: &Heap<P>, ptr: *mut u8, size: usize, alignment: usize)
        -> Result<NonNull<u8>, Error>
    {
        self.check_heap(heap);

        let (ptr, slot_size) = match heap.resize_in_place(ptr, size, alignment)? {
            Resize::InPlace(ptr) => return Ok(ptr),
            Resize::Move { ptr, slot_size } => (ptr, slot_size),
        };

        let new = self.allocate(heap, size, alignment)?;

        ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), cmp::min(slot_size, size));

        self.deallocate(heap, ptr.as_ptr())?;

        Ok(new)
    }

    /// Flushes all stocks back to their buckets, and returns the storage of the stocks to the heap platform.
    ///
    /// An instance must be closed before being dropped; otherwise its stocked slots are stranded, and its storage
    /// leaked.
    ///
    /// #   Panics
    ///
    /// If `heap` is not the heap the instance was created for.
    pub fn close<P: Platform>(mut self, heap: &Heap<P>) {
        assert_eq!(self.heap, heap.identity(), "Thread cache closed against a foreign heap");

        for bucket in heap.buckets() {
            //  Safety:
            //  -   The stocks of the instance were filled from the buckets of `heap`, index for index.
            unsafe { self.local.flush(bucket) };
        }

        //  Safety:
        //  -   `self.storage` was reserved from this platform, with this layout, and is no longer used.
        unsafe { heap.platform().deallocate(self.storage.cast(), self.storage_layout) };

        mem::forget(self);
    }

    #[inline(always)]
    fn check_heap<P: Platform>(&self, heap: &Heap<P>) {
        debug_assert_eq!(self.heap, heap.identity(), "Thread cache used against a foreign heap");
    }
}

impl Drop for ThreadCache {
    //  `close` forgets the instance.
    fn drop(&mut self) {
        debug_assert!(is_unwinding(), "Thread cache dropped without being closed, stranding its stocks");
    }
}

//  Safety:
//  -   The storage is exclusively owned.
unsafe impl Send for ThreadCache {}

#[cfg(test)]
fn is_unwinding() -> bool { std::thread::panicking() }

#[cfg(not(test))]
fn is_unwinding() -> bool { false }

// mod tests
