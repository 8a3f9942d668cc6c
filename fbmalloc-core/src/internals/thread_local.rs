//! ThreadLocal
//!
//! A ThreadLocal instance is the engine of a thread cache: one Stock per bucket, refilled from and flushed to the
//! buckets in batches.

use core::ptr::NonNull;

use crate::{CacheStatistics, Error, MAX_BUCKETS, Warmup};

use super::{bucket::Bucket, stock::Stock};

/// ThreadLocal
pub(crate) struct ThreadLocal {
    //  Stocks, 1 per bucket; those past the last bucket have no capacity.
    stocks: [Stock; MAX_BUCKETS],
    //  Number of slots exchanged per refill or flush.
    batch: usize,
    statistics: CacheStatistics,
}

impl ThreadLocal {
    /// Creates an instance with `bucket_count` empty stocks of `size` slots each.
    ///
    /// #   Safety
    ///
    /// -   Assumes `storage` points to `bucket_count * size` writable `u32`, exclusively owned by the instance.
    pub(crate) unsafe fn new(storage: NonNull<u32>, bucket_count: usize, size: u32, batch: usize) -> Self {
        debug_assert!(bucket_count <= MAX_BUCKETS);
        debug_assert!(batch > 0 && batch <= size as usize);

        let stocks = core::array::from_fn(|index| {
            if index < bucket_count {
                let entries = NonNull::new_unchecked(storage.as_ptr().add(index * size as usize));
                Stock::new(entries, size)
            } else {
                Stock::new(NonNull::dangling(), 0)
            }
        });

        Self { stocks, batch, statistics: CacheStatistics::default() }
    }

    /// Returns the statistics.
    pub(crate) fn statistics(&self) -> CacheStatistics { self.statistics }

    /// Returns the number of slots in stock for the bucket.
    pub(crate) fn stocked(&self, bucket: usize) -> usize { self.stocks.get(bucket).map(|s| s.len()).unwrap_or(0) }

    /// Pre-fills the stock of `bucket` as per `warmup`, returning the number of slots acquired.
    ///
    /// Warming up is not accounted for as a refill.
    pub(crate) fn warm_up(&mut self, bucket: &Bucket, warmup: Warmup) -> usize {
        let stock = &mut self.stocks[bucket.index().value()];
        let target = warmup.target(stock.capacity());

        let mut acquired = 0;

        //  A single exchange may return less than requested whilst other threads are refilling concurrently.
        while stock.len() < target {
            let got = stock.refill(bucket, target - stock.len());

            if got == 0 {
                break;
            }

            acquired += got;
        }

        acquired
    }

    /// Allocates a slot of `bucket`.
    ///
    /// #   Errors
    ///
    /// -   `Exhausted` if neither the stock nor the bucket have any slot left.
    pub(crate) fn allocate(&mut self, bucket: &Bucket) -> Result<NonNull<u8>, Error> {
        let stock = &mut self.stocks[bucket.index().value()];

        if let Some(index) = stock.pop() {
            self.statistics.hits += 1;
            return Ok(bucket.hand_out(index));
        }

        if stock.refill(bucket, self.batch) == 0 {
            self.statistics.exhausted += 1;
            return Err(Error::Exhausted(bucket.index().value()));
        }

        self.statistics.refills += 1;

        match stock.pop() {
            Some(index) => Ok(bucket.hand_out(index)),
            None => Err(Error::Exhausted(bucket.index().value())),
        }
    }

    /// Deallocates `ptr`, a slot of `bucket`.
    ///
    /// #   Errors
    ///
    /// -   `ForeignPointer` if `ptr` is not the start of a slot of `bucket`.
    ///
    /// #   Panics
    ///
    /// In debug builds, if `ptr` is not live.
    ///
    /// #   Safety
    ///
    /// -   Assumes `ptr` is no longer referenced.
    pub(crate) unsafe fn deallocate(&mut self, bucket: &Bucket, ptr: NonNull<u8>) -> Result<(), Error> {
        let index = bucket.take_back(ptr)?;
        let stock = &mut self.stocks[bucket.index().value()];

        debug_assert!(!stock.contains(index), "Double free of {:?}: slot {} already in stock", ptr, index);

        if stock.is_full() {
            stock.flush(bucket, self.batch);
            self.statistics.flushes += 1;
        }

        let pushed = stock.push(index);
        debug_assert!(pushed);

        Ok(())
    }

    /// Returns all slots in stock to `bucket`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `bucket` is the bucket whose slots were stocked, at this index.
    pub(crate) unsafe fn flush(&mut self, bucket: &Bucket) {
        let stock = &mut self.stocks[bucket.index().value()];
        let len = stock.len();

        stock.flush(bucket, len);
    }
}

#[cfg(test)]
mod tests {

use std::alloc::Layout;

use crate::BucketIndex;

use super::*;
use super::super::test::{AlignedBuffer, TestPlatform};

struct Fixture {
    platform: TestPlatform,
    _buffer: AlignedBuffer,
    bucket: Bucket,
    storage: Vec<u32>,
}

impl Fixture {
    //  A bucket, of index 0, with `capacity` slots of 16 bytes.
    fn new(capacity: usize) -> Self {
        let platform = TestPlatform::new();
        let buffer = AlignedBuffer::new(Layout::from_size_align(capacity * 16, 16).unwrap());
        let bucket = unsafe { Bucket::new(&platform, BucketIndex::new(0).unwrap(), buffer.address(), capacity * 16) };

        Self { platform, _buffer: buffer, bucket: bucket.unwrap(), storage: vec!() }
    }

    //  A thread-local with a single stock of `size` slots.
    fn local(&mut self, size: u32) -> ThreadLocal {
        self.storage = vec![0; size as usize];

        let storage = NonNull::new(self.storage.as_mut_ptr()).unwrap();
        let batch = std::cmp::max(1, size as usize / 2);

        unsafe { ThreadLocal::new(storage, 1, size, batch) }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        unsafe { self.bucket.release(&self.platform) };
    }
}

#[test]
fn thread_local_cold_allocate() {
    let mut fixture = Fixture::new(32);
    let mut local = fixture.local(8);

    assert_eq!(0, local.stocked(0));

    let first = local.allocate(&fixture.bucket).unwrap();
    assert_eq!(3, local.stocked(0));
    assert_eq!(28, fixture.bucket.available());

    let statistics = local.statistics();
    assert_eq!(1, statistics.refills);
    assert_eq!(0, statistics.hits);

    let second = local.allocate(&fixture.bucket).unwrap();
    assert_ne!(first, second);
    assert_eq!(1, local.statistics().hits);

    unsafe {
        local.deallocate(&fixture.bucket, first).unwrap();
        local.deallocate(&fixture.bucket, second).unwrap();
        local.flush(&fixture.bucket);
    }

    assert_eq!(0, local.stocked(0));
    assert_eq!(32, fixture.bucket.available());
}

#[test]
fn thread_local_warm_up() {
    let mut fixture = Fixture::new(32);

    let mut local = fixture.local(8);
    assert_eq!(0, local.warm_up(&fixture.bucket, Warmup::Cold));
    assert_eq!(4, local.warm_up(&fixture.bucket, Warmup::Warm));
    assert_eq!(4, local.warm_up(&fixture.bucket, Warmup::Hot));
    assert_eq!(8, local.stocked(0));
    assert_eq!(0, local.statistics().refills);

    unsafe { local.flush(&fixture.bucket) };
}

#[test]
fn thread_local_hot_no_refill_until_exhausted() {
    let mut fixture = Fixture::new(32);
    let mut local = fixture.local(8);

    local.warm_up(&fixture.bucket, Warmup::Hot);

    let mut pointers = vec!();

    for _ in 0..8 {
        pointers.push(local.allocate(&fixture.bucket).unwrap());
        assert_eq!(0, local.statistics().refills);
    }

    pointers.push(local.allocate(&fixture.bucket).unwrap());
    assert_eq!(1, local.statistics().refills);
    assert_eq!(8, local.statistics().hits);

    for ptr in pointers {
        unsafe { local.deallocate(&fixture.bucket, ptr).unwrap() };
    }

    unsafe { local.flush(&fixture.bucket) };
}

#[test]
fn thread_local_exhaustion() {
    let mut fixture = Fixture::new(4);
    let mut local = fixture.local(8);

    let pointers: Vec<_> = (0..4).map(|_| local.allocate(&fixture.bucket).unwrap()).collect();

    assert_eq!(Err(Error::Exhausted(0)), local.allocate(&fixture.bucket));
    assert_eq!(1, local.statistics().exhausted);

    //  Recoverable, once a slot is freed.
    unsafe { local.deallocate(&fixture.bucket, pointers[2]).unwrap() };
    assert_eq!(Ok(pointers[2]), local.allocate(&fixture.bucket));

    for ptr in pointers {
        unsafe { local.deallocate(&fixture.bucket, ptr).unwrap() };
    }

    unsafe { local.flush(&fixture.bucket) };
}

#[test]
fn thread_local_flush_on_full() {
    let mut fixture = Fixture::new(32);
    let mut local = fixture.local(4);

    let pointers: Vec<_> = (0..12).map(|_| local.allocate(&fixture.bucket).unwrap()).collect();
    assert_eq!(0, local.stocked(0));

    for ptr in &pointers[..4] {
        unsafe { local.deallocate(&fixture.bucket, *ptr).unwrap() };
    }

    assert_eq!(4, local.stocked(0));
    assert_eq!(0, local.statistics().flushes);

    unsafe { local.deallocate(&fixture.bucket, pointers[4]).unwrap() };

    assert_eq!(3, local.stocked(0));
    assert_eq!(1, local.statistics().flushes);
    assert_eq!(22, fixture.bucket.available());

    for ptr in &pointers[5..] {
        unsafe { local.deallocate(&fixture.bucket, *ptr).unwrap() };
    }

    unsafe { local.flush(&fixture.bucket) };
    assert_eq!(32, fixture.bucket.available());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "Double free")]
fn thread_local_double_free() {
    let mut fixture = Fixture::new(32);
    let mut local = fixture.local(8);

    let ptr = local.allocate(&fixture.bucket).unwrap();

    unsafe {
        local.deallocate(&fixture.bucket, ptr).unwrap();
        let _ = local.deallocate(&fixture.bucket, ptr);
    }
}

} // mod tests
