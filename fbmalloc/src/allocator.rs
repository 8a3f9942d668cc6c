//! Allocator

use std::{
    collections::HashMap,
    fmt,
    ptr::NonNull,
    sync::{Arc, Weak, atomic::{AtomicU64, Ordering}},
    thread::ThreadId,
};

use fbmalloc_core::{BucketIndex, CacheOptions, CacheStatistics, Error, Heap, Properties, ThreadCache};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{AllocatorBuilder, Configuration, SystemPlatform};
use crate::registry::{self, LocalCaches, Registration};

/// Fixed-Bucket Allocator.
///
/// A handle to a heap, and to the thread caches registered with it. Cloning the handle shares the heap; the heap is
/// released, and all outstanding allocations invalidated, once the last handle is dropped.
///
/// Each thread allocates through its own thread cache, created with the default options on first allocation, or
/// explicitly with `create_thread_cache`. A thread cache is flushed back to the heap when destroyed explicitly, when
/// its thread exits, or when the heap is released, whichever comes first.
#[derive(Clone)]
pub struct Allocator(Arc<Shared>);

impl Allocator {
    /// Creates an instance, reserving the whole heap upfront.
    ///
    /// #   Errors
    ///
    /// -   `InvalidBucketCount`, `InvalidBucketSize`, or `InvalidCacheSize` if the configuration is invalid.
    /// -   `ReservationFailed` if the OS cannot reserve the heap.
    #[cold]
    pub fn new(configuration: Configuration) -> Result<Self, Error> {
        configuration.default_cache.validate()?;

        let heap = Heap::new(SystemPlatform::new(), configuration.heap())?;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

        info!(
            allocator = id,
            buckets = heap.bucket_count(),
            bucket_size = heap.properties().bucket_size(),
            allocation_limit = heap.allocation_limit(),
            "allocator created"
        );

        let shared = Shared { id, heap, default_cache: configuration.default_cache, caches: Mutex::new(HashMap::new()) };

        Ok(Self(Arc::new(shared)))
    }

    /// Returns a builder, with the default configuration.
    pub fn builder() -> AllocatorBuilder { AllocatorBuilder::new() }

    /// Returns the properties of the heap.
    pub fn properties(&self) -> &Properties { self.0.heap.properties() }

    /// Returns the largest size which can be allocated.
    pub fn allocation_limit(&self) -> usize { self.0.heap.allocation_limit() }

    /// Creates a thread cache for the calling thread, pre-filled as per `options.warmup`.
    ///
    /// #   Errors
    ///
    /// -   `ThreadCacheExists` if the calling thread already has a thread cache.
    /// -   `InvalidCacheSize` if `options.size` is 0, or too large.
    /// -   `ReservationFailed` if the OS cannot reserve the storage of the cache.
    /// -   `ThreadExiting` if the calling thread is exiting.
    /// -   `RegistryBusy` if the thread caches of the calling thread are already in use higher up the stack.
    #[cold]
    pub fn create_thread_cache(&self, options: CacheOptions) -> Result<(), Error> {
        registry::with_local_caches(|caches| self.create_thread_cache_in(caches, options).map(|_| ()))?
    }

    /// Destroys the thread cache of the calling thread, flushing its stock back to the heap.
    ///
    /// Returns false if the calling thread had no thread cache.
    #[cold]
    pub fn destroy_thread_cache(&self) -> bool {
        let unregistered = registry::with_local_caches(|caches| {
            caches.unregister(self.0.id).map(|_| caches.thread())
        });

        match unregistered.ok().flatten() {
            Some(thread) => self.0.reap(thread),
            None => false,
        }
    }

    /// Returns whether the calling thread has a thread cache.
    pub fn has_thread_cache(&self) -> bool {
        registry::with_local_caches(|caches| caches.find(self.0.id).is_some()).unwrap_or(false)
    }

    /// Returns the statistics of the thread cache of the calling thread, if any.
    pub fn statistics(&self) -> Option<CacheStatistics> {
        registry::with_local_caches(|caches| {
            //  Safety:
            //  -   The cache is registered for this thread, and the allocator is alive.
            caches.find(self.0.id).map(|cache| unsafe { cache.as_ref() }.statistics())
        })
        .ok()
        .flatten()
    }

    /// Allocates `size` bytes, aligned on `alignment`, 0 meaning the natural alignment of 16 bytes.
    ///
    /// Creates a thread cache with the default options first, if the calling thread has none.
    ///
    /// #   Errors
    ///
    /// -   `InvalidSize` if `size` is 0, or greater than the allocation limit.
    /// -   `InvalidAlignment` if `alignment` is not a power of 2, or no bucket can honour it.
    /// -   `Exhausted` if the bucket serving the request has no slot left.
    pub fn malloc(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, Error> {
        let heap = &self.0.heap;

        let result = self.with_cache(true, |cache| cache.allocate(heap, size, alignment))
            .unwrap_or_else(|| heap.allocate_uncached(size, alignment));

        if let Err(Error::Exhausted(bucket)) = result {
            debug!(allocator = self.0.id, bucket, size, alignment, "bucket exhausted");
        }

        result
    }

    /// Deallocates the memory pointed to by `ptr`.
    ///
    /// The memory may have been allocated on any thread, it is stocked in the thread cache of the calling thread.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` if `ptr` is null.
    /// -   `ForeignPointer` if `ptr` was not allocated by this allocator.
    ///
    /// #   Panics
    ///
    /// In debug builds, on double free.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` is not used after this call.
    pub unsafe fn free(&self, ptr: *mut u8) -> Result<(), Error> {
        let heap = &self.0.heap;

        self.with_cache(false, |cache| cache.deallocate(heap, ptr))
            .unwrap_or_else(|| heap.deallocate_uncached(ptr))
    }

    /// Reallocates the memory pointed to by `ptr` to hold `size` bytes, aligned on `alignment`.
    ///
    /// Returns `ptr` itself if its slot is large enough and sufficiently aligned. Otherwise, the memory is moved to a
    /// new slot, preserving the first `min(slot size, size)` bytes.
    ///
    /// #   Errors
    ///
    /// Any of the errors of `malloc` and `free`; in which case `ptr` is left untouched.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` is not used after this call, if a different pointer is returned.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize, alignment: usize) -> Result<NonNull<u8>, Error> {
        let heap = &self.0.heap;

        let result = self.with_cache(true, |cache| cache.reallocate(heap, ptr, size, alignment))
            .unwrap_or_else(|| heap.reallocate_uncached(ptr, size, alignment));

        if let Err(Error::Exhausted(bucket)) = result {
            debug!(allocator = self.0.id, bucket, size, alignment, "bucket exhausted");
        }

        result
    }

    /// Returns the usable size of the allocation pointed to by `ptr`; at least the size it was requested with.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` if `ptr` is null.
    /// -   `ForeignPointer` if `ptr` was not allocated by this allocator.
    pub fn size_of(&self, ptr: *const u8) -> Result<usize, Error> { self.0.heap.size_of(ptr) }

    /// Returns the index of the bucket of the allocation pointed to by `ptr`.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` if `ptr` is null.
    /// -   `ForeignPointer` if `ptr` was not allocated by this allocator.
    pub fn bucket_of(&self, ptr: *const u8) -> Result<usize, Error> { self.0.heap.bucket_of(ptr).map(|b| b.value()) }

    /// Returns the approximate number of slots of the bucket which are not allocated, nor stocked in a thread cache.
    pub fn available(&self, bucket: usize) -> usize {
        BucketIndex::new(bucket).map(|b| self.0.heap.available(b)).unwrap_or(0)
    }

    /// Returns the number of slots of the bucket.
    pub fn capacity(&self, bucket: usize) -> usize {
        BucketIndex::new(bucket).map(|b| self.0.heap.capacity(b)).unwrap_or(0)
    }

    pub(crate) fn id(&self) -> u64 { self.0.id }

    pub(crate) fn downgrade(&self) -> Weak<Shared> { Arc::downgrade(&self.0) }

    //  Invokes `fun` with the thread cache of the calling thread, creating it first if `create` is true.
    //
    //  Returns None if there is no thread cache to use.
    #[inline(always)]
    fn with_cache<F, R>(&self, create: bool, fun: F) -> Option<R>
        where
            F: FnOnce(&mut ThreadCache) -> R,
    {
        registry::with_local_caches(|caches| {
            let cache = match caches.find(self.0.id) {
                Some(cache) => cache,
                None if create => self.create_default_thread_cache(caches)?,
                None => return None,
            };

            //  Safety:
            //  -   The cache is registered for this thread, and only accessed from it.
            //  -   The cache is alive for as long as its registration, and the allocator, are.
            Some(fun(unsafe { &mut *cache.as_ptr() }))
        })
        .ok()
        .flatten()
    }

    #[cold]
    #[inline(never)]
    fn create_default_thread_cache(&self, caches: &mut LocalCaches) -> Option<NonNull<ThreadCache>> {
        self.create_thread_cache_in(caches, self.0.default_cache).ok()
    }

    fn create_thread_cache_in(&self, caches: &mut LocalCaches, options: CacheOptions)
        -> Result<NonNull<ThreadCache>, Error>
    {
        if caches.find(self.0.id).is_some() {
            return Err(Error::ThreadCacheExists);
        }

        let thread = caches.thread();
        let cache = ThreadCache::new(&self.0.heap, options)?;
        let cache = NonNull::from(Box::leak(Box::new(cache)));

        let previous = self.0.caches.lock().insert(thread, CachePtr(cache));
        debug_assert!(previous.is_none());

        caches.register(Registration { allocator: self.0.id, shared: self.downgrade(), cache });

        debug!(allocator = self.0.id, ?thread, size = options.size, warmup = ?options.warmup, "thread cache created");

        Ok(cache)
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("id", &self.0.id)
            .field("heap", &self.0.heap)
            .finish()
    }
}

/// The state shared by all handles to an allocator.
pub(crate) struct Shared {
    id: u64,
    heap: Heap<SystemPlatform>,
    default_cache: CacheOptions,
    //  Owner of the thread caches.
    caches: Mutex<HashMap<ThreadId, CachePtr>>,
}

impl Shared {
    /// Flushes and releases the thread cache of `thread`, returning whether there was one.
    #[cold]
    pub(crate) fn reap(&self, thread: ThreadId) -> bool {
        let cache = self.caches.lock().remove(&thread);

        match cache {
            Some(cache) => {
                //  Safety:
                //  -   The cache was unregistered, hence no longer referenced.
                unsafe { cache.close(&self.heap) };

                debug!(allocator = self.id, ?thread, "thread cache destroyed");
                true
            },
            None => false,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let caches: Vec<_> = self.caches.get_mut().drain().collect();
        let number_caches = caches.len();

        for (_, cache) in caches {
            //  Safety:
            //  -   The allocator is being destroyed, hence no registration can be used any longer.
            unsafe { cache.close(&self.heap) };
        }

        info!(allocator = self.id, thread_caches = number_caches, "allocator destroyed");
    }
}

//  Pointer to a thread cache, owned by the registry of an allocator.
struct CachePtr(NonNull<ThreadCache>);

impl CachePtr {
    //  Flushes and releases the thread cache.
    //
    //  #   Safety
    //
    //  -   Assumes the cache is no longer referenced.
    unsafe fn close(self, heap: &Heap<SystemPlatform>) {
        let cache = Box::from_raw(self.0.as_ptr());
        cache.close(heap);
    }
}

//  Safety:
//  -   A ThreadCache is Send.
unsafe impl Send for CachePtr {}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

// mod tests
