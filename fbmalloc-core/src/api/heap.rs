//! Heap
//!
//! The Heap owns the region reserved from the Platform, and the buckets it is carved into.
//!
//! Bucket `i` spans `[base + i * bucket_size, base + (i + 1) * bucket_size)`, hence the bucket of any pointer is
//! recovered by arithmetic alone, without any header in the slots.
//!
//! The Heap is shared by all threads; the thread caches built on top of it are not.

use core::{
    cmp,
    fmt,
    ptr::{self, NonNull},
};

use crate::{BucketIndex, Configuration, Error, MAX_BUCKETS, Platform, Properties};
use crate::internals::bucket::Bucket;
use crate::utils;

/// Heap
pub struct Heap<P: Platform> {
    platform: P,
    properties: Properties,
    base: NonNull<u8>,
    //  Buckets, those past `bucket_count` are None.
    buckets: [Option<Bucket>; MAX_BUCKETS],
}

impl<P: Platform> Heap<P> {
    /// Creates an instance, reserving its region from `platform`.
    ///
    /// All slots of all buckets start on their bucket free-list.
    ///
    /// #   Errors
    ///
    /// -   `InvalidBucketCount` or `InvalidBucketSize` if the configuration is invalid.
    /// -   `ReservationFailed` if the platform cannot reserve the region, or the bookkeeping.
    pub fn new(platform: P, configuration: Configuration) -> Result<Self, Error> {
        let properties = configuration.properties()?;
        let layout = properties.region_layout();

        //  Safety:
        //  -   `layout.size()` is a non-zero multiple of `layout.align()`.
        let base = unsafe { platform.allocate(layout) }
            .ok_or(Error::ReservationFailed { size: layout.size(), align: layout.align() })?;

        let bucket_size = properties.bucket_size();
        let mut failed = false;

        let buckets = core::array::from_fn(|index| {
            if failed || index >= properties.bucket_count() {
                return None;
            }

            let bucket_index = BucketIndex::new(index)?;

            //  Safety:
            //  -   The region spans `bucket_count * bucket_size` bytes.
            //  -   `bucket_size` is a multiple of the maximum alignment, hence so is each bucket start.
            //  -   The number of slots was validated by `properties`.
            let bucket = unsafe {
                let start = NonNull::new_unchecked(base.as_ptr().add(index * bucket_size));
                Bucket::new(&platform, bucket_index, start, bucket_size)
            };

            failed = bucket.is_none();
            bucket
        });

        let heap = Self { platform, properties, base, buckets };

        if failed {
            //  Dropping releases what was reserved so far.
            return Err(Error::ReservationFailed { size: layout.size(), align: layout.align() });
        }

        Ok(heap)
    }

    /// Returns the platform.
    pub fn platform(&self) -> &P { &self.platform }

    /// Returns the properties.
    pub fn properties(&self) -> &Properties { &self.properties }

    /// Returns the number of buckets.
    pub fn bucket_count(&self) -> usize { self.properties.bucket_count() }

    /// Returns the largest size which can be allocated.
    pub fn allocation_limit(&self) -> usize { self.properties.allocation_limit() }

    /// Returns the bucket serving allocations of `size` bytes, aligned on `alignment`, 0 meaning natural alignment.
    pub fn bucket_for(&self, size: usize, alignment: usize) -> Result<BucketIndex, Error> {
        self.properties.bucket_for(size, alignment)
    }

    /// Returns whether `ptr` points within the region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let address = ptr as usize;
        let base = self.base.as_ptr() as usize;

        address >= base && address - base < self.properties.region_layout().size()
    }

    /// Returns the bucket of the slot starting at `ptr`.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` if `ptr` is null.
    /// -   `ForeignPointer` if `ptr` is not the start of a slot of this heap.
    pub fn bucket_of(&self, ptr: *const u8) -> Result<BucketIndex, Error> {
        self.locate(ptr).map(|(bucket, _)| bucket.index())
    }

    /// Returns the size of the slot starting at `ptr`; at least the size requested when allocating it.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` if `ptr` is null.
    /// -   `ForeignPointer` if `ptr` is not the start of a slot of this heap.
    pub fn size_of(&self, ptr: *const u8) -> Result<usize, Error> { self.bucket_of(ptr).map(|b| b.slot_size()) }

    /// Returns the number of slots of the bucket.
    pub fn capacity(&self, bucket: BucketIndex) -> usize { self.bucket(bucket).map(|b| b.capacity()).unwrap_or(0) }

    /// Returns the approximate number of slots on the free-list of the bucket; slots stocked by thread caches are
    /// not accounted for.
    pub fn available(&self, bucket: BucketIndex) -> usize {
        self.bucket(bucket).map(|b| b.available()).unwrap_or(0)
    }

    /// Allocates a slot directly from its bucket, bypassing any thread cache.
    ///
    /// #   Errors
    ///
    /// -   `InvalidSize` or `InvalidAlignment` if no bucket can serve the request.
    /// -   `Exhausted` if the bucket has no slot left.
    pub fn allocate_uncached(&self, size: usize, alignment: usize) -> Result<NonNull<u8>, Error> {
        let index = self.bucket_for(size, alignment)?;
        let bucket = self.bucket(index).ok_or(Error::Exhausted(index.value()))?;

        let mut slot = [0u32; 1];

        if bucket.acquire_batch(&mut slot) == 0 {
            return Err(Error::Exhausted(index.value()));
        }

        Ok(bucket.hand_out(slot[0]))
    }

    /// Deallocates a slot directly to its bucket, bypassing any thread cache.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` if `ptr` is null.
    /// -   `ForeignPointer` if `ptr` is not the start of a slot of this heap.
    ///
    /// #   Panics
    ///
    /// In debug builds, if `ptr` is not currently allocated.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` is no longer referenced.
    pub unsafe fn deallocate_uncached(&self, ptr: *mut u8) -> Result<(), Error> {
        let (bucket, ptr) = self.locate(ptr)?;
        let index = bucket.take_back(ptr)?;

        bucket.release_batch(&[index]);

        Ok(())
    }

    /// Reallocates a slot directly from and to its buckets, bypassing any thread cache.
    ///
    /// See `ThreadCache::reallocate` for the semantics.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` is not referenced by anyone else, and is no longer referenced if a new pointer is returned.
    pub unsafe fn reallocate_uncached(&self, ptr: *mut u8, size: usize, alignment: usize)
        -> Result<NonNull<u8>, Error>
    {
        let (ptr, slot_size) = match self.resize_in_place(ptr, size, alignment)? {
            Resize::InPlace(ptr) => return Ok(ptr),
            Resize::Move { ptr, slot_size } => (ptr, slot_size),
        };

        let new = self.allocate_uncached(size, alignment)?;

        ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), cmp::min(slot_size, size));

        self.deallocate_uncached(ptr.as_ptr())?;

        Ok(new)
    }

    /// Determines whether the slot at `ptr` can hold `size` bytes aligned on `alignment`.
    ///
    /// #   Errors
    ///
    /// -   `NullPointer` or `ForeignPointer` if `ptr` is not a slot of this heap.
    /// -   `InvalidSize` or `InvalidAlignment` if no bucket can serve the request.
    pub(crate) fn resize_in_place(&self, ptr: *mut u8, size: usize, alignment: usize) -> Result<Resize, Error> {
        let (bucket, ptr) = self.locate(ptr)?;
        let slot_size = bucket.index().slot_size();

        //  Validates the request, even if the slot is kept.
        self.bucket_for(size, alignment)?;

        let effective = Properties::effective_alignment(alignment).ok_or(Error::InvalidAlignment { size, alignment })?;

        if size <= slot_size && utils::is_sufficiently_aligned_for(ptr, effective) {
            Ok(Resize::InPlace(ptr))
        } else {
            Ok(Resize::Move { ptr, slot_size })
        }
    }

    /// Returns the address identifying this heap.
    pub(crate) fn identity(&self) -> usize { self.base.as_ptr() as usize }

    /// Returns the bucket, if part of this heap.
    pub(crate) fn bucket(&self, index: BucketIndex) -> Option<&Bucket> {
        self.buckets.get(index.value()).and_then(Option::as_ref)
    }

    /// Returns the buckets.
    pub(crate) fn buckets(&self) -> impl Iterator<Item = &Bucket> { self.buckets.iter().filter_map(Option::as_ref) }

    /// Returns the bucket containing `ptr`, checking that `ptr` points to the start of a slot.
    pub(crate) fn locate(&self, ptr: *const u8) -> Result<(&Bucket, NonNull<u8>), Error> {
        let ptr = NonNull::new(ptr as *mut u8).ok_or(Error::NullPointer)?;
        let foreign = Error::ForeignPointer(ptr.as_ptr() as usize);

        if !self.contains(ptr.as_ptr()) {
            return Err(foreign);
        }

        let offset = ptr.as_ptr() as usize - self.base.as_ptr() as usize;
        let index = BucketIndex::new(offset / self.properties.bucket_size()).ok_or(foreign)?;
        let bucket = self.bucket(index).ok_or(foreign)?;

        if !bucket.is_slot(ptr) {
            return Err(foreign);
        }

        Ok((bucket, ptr))
    }
}

/// Outcome of `resize_in_place`.
pub(crate) enum Resize {
    /// The slot can be kept.
    InPlace(NonNull<u8>),
    /// The slot is too small, or insufficiently aligned.
    Move { ptr: NonNull<u8>, slot_size: usize },
}

impl<P: Platform> Drop for Heap<P> {
    fn drop(&mut self) {
        //  Safety:
        //  -   The buckets and the region were reserved from `self.platform`, and are no longer used.
        unsafe {
            for bucket in self.buckets() {
                bucket.release(&self.platform);
            }

            self.platform.deallocate(self.base, self.properties.region_layout());
        }
    }
}

impl<P: Platform> fmt::Debug for Heap<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("base", &self.base)
            .field("properties", &self.properties)
            .finish()
    }
}

//  Safety:
//  -   The buckets are only mutated through atomic operations.
//  -   The platform is only shared if it is Sync, and only sent if it is Send.
unsafe impl<P: Platform + Send> Send for Heap<P> {}
unsafe impl<P: Platform + Sync> Sync for Heap<P> {}

// mod tests
