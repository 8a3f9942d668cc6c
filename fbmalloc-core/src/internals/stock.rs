//! Stock
//!
//! The private stock of free slots a thread cache keeps for a single bucket: a bounded stack of slot indices.
//!
//! A Stock is only ever touched by the thread owning the cache, and therefore requires no synchronization.

use core::{cmp, ptr::NonNull, slice};

use super::bucket::Bucket;

/// Stock
pub(crate) struct Stock {
    entries: NonNull<u32>,
    capacity: u32,
    len: u32,
}

impl Stock {
    /// Creates an empty instance, storing its entries in `entries`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `entries` points to `capacity` writable, and otherwise unused, `u32`.
    pub(crate) unsafe fn new(entries: NonNull<u32>, capacity: u32) -> Self { Self { entries, capacity, len: 0 } }

    /// Returns the number of slots in stock.
    pub(crate) fn len(&self) -> usize { self.len as usize }

    /// Returns the maximum number of slots in stock.
    pub(crate) fn capacity(&self) -> usize { self.capacity as usize }

    /// Returns whether the stock is empty.
    pub(crate) fn is_empty(&self) -> bool { self.len == 0 }

    /// Returns whether the stock is full.
    pub(crate) fn is_full(&self) -> bool { self.len == self.capacity }

    /// Returns whether the slot is in stock.
    pub(crate) fn contains(&self, index: u32) -> bool { self.as_slice().contains(&index) }

    /// Pops the most recently stocked slot, if any.
    pub(crate) fn pop(&mut self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }

        self.len -= 1;

        //  Safety:
        //  -   `self.len` is within bounds, and was initialized.
        Some(unsafe { self.entries.as_ptr().add(self.len as usize).read() })
    }

    /// Pushes a slot, returning false if the stock is full.
    pub(crate) fn push(&mut self, index: u32) -> bool {
        if self.is_full() {
            return false;
        }

        //  Safety:
        //  -   `self.len` is within bounds.
        unsafe { self.entries.as_ptr().add(self.len as usize).write(index) };

        self.len += 1;

        true
    }

    /// Acquires up to `n` slots from `bucket`, within the remaining room.
    ///
    /// Returns the number of slots acquired.
    pub(crate) fn refill(&mut self, bucket: &Bucket, n: usize) -> usize {
        let room = (self.capacity - self.len) as usize;
        let wanted = cmp::min(n, room);

        //  Safety:
        //  -   `[len, len + wanted)` is within bounds.
        let tail = unsafe { slice::from_raw_parts_mut(self.entries.as_ptr().add(self.len as usize), wanted) };

        let acquired = bucket.acquire_batch(tail);
        self.len += acquired as u32;

        acquired
    }

    /// Releases the `n` most recently stocked slots to `bucket`, or all of them if fewer.
    ///
    /// Returns the number of slots released.
    ///
    /// #   Safety
    ///
    /// -   Assumes all slots in stock belong to `bucket`.
    pub(crate) unsafe fn flush(&mut self, bucket: &Bucket, n: usize) -> usize {
        let released = cmp::min(n, self.len as usize);
        let start = self.len as usize - released;

        bucket.release_batch(&self.as_slice()[start..]);
        self.len = start as u32;

        released
    }

    fn as_slice(&self) -> &[u32] {
        //  Safety:
        //  -   `[0, len)` is within bounds, and initialized.
        unsafe { slice::from_raw_parts(self.entries.as_ptr(), self.len as usize) }
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
    //  A bucket of 16 slots of 16 bytes.
    fn new() -> Self {
        let platform = TestPlatform::new();
        let buffer = AlignedBuffer::new(Layout::from_size_align(256, 16).unwrap());
        let index = BucketIndex::new(0).unwrap();
        let bucket = unsafe { Bucket::new(&platform, index, buffer.address(), 256) }.unwrap();

        Self { platform, _buffer: buffer, bucket, storage: vec![0; 8] }
    }

    fn stock(&mut self) -> Stock {
        let capacity = self.storage.len() as u32;
        unsafe { Stock::new(NonNull::new(self.storage.as_mut_ptr()).unwrap(), capacity) }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        unsafe { self.bucket.release(&self.platform) };
    }
}

#[test]
fn stock_push_pop() {
    let mut fixture = Fixture::new();
    let mut stock = fixture.stock();

    assert!(stock.is_empty());
    assert_eq!(None, stock.pop());

    for index in 0..8 {
        assert!(stock.push(index));
    }

    assert!(stock.is_full());
    assert!(!stock.push(8));
    assert!(stock.contains(3));
    assert!(!stock.contains(8));

    assert_eq!(Some(7), stock.pop());
    assert_eq!(Some(6), stock.pop());
    assert_eq!(6, stock.len());
}

#[test]
fn stock_refill() {
    let mut fixture = Fixture::new();
    let mut stock = fixture.stock();

    assert_eq!(4, stock.refill(&fixture.bucket, 4));
    assert_eq!(4, stock.len());
    assert_eq!(12, fixture.bucket.available());

    //  Bounded by the remaining room.
    assert_eq!(4, stock.refill(&fixture.bucket, 6));
    assert!(stock.is_full());
    assert_eq!(0, stock.refill(&fixture.bucket, 6));
    assert_eq!(8, fixture.bucket.available());
}

#[test]
fn stock_refill_exhausted() {
    let mut fixture = Fixture::new();

    let mut first = fixture.stock();
    let mut drain = [0u32; 12];
    assert_eq!(12, fixture.bucket.acquire_batch(&mut drain));

    assert_eq!(4, first.refill(&fixture.bucket, 8));
    assert_eq!(0, first.refill(&fixture.bucket, 8));
}

#[test]
fn stock_flush() {
    let mut fixture = Fixture::new();
    let mut stock = fixture.stock();

    stock.refill(&fixture.bucket, 8);

    let top = [stock.pop().unwrap(), stock.pop().unwrap(), stock.pop().unwrap()];
    for index in top.iter().rev() {
        stock.push(*index);
    }

    assert_eq!(3, unsafe { stock.flush(&fixture.bucket, 3) });
    assert_eq!(5, stock.len());
    assert_eq!(11, fixture.bucket.available());

    for index in &top {
        assert!(!stock.contains(*index));
    }

    assert_eq!(5, unsafe { stock.flush(&fixture.bucket, 8) });
    assert!(stock.is_empty());
    assert_eq!(16, fixture.bucket.available());
}

} // mod tests
