//! Bucket
//!
//! A Bucket is a fixed-capacity arena of equally sized slots, shared by all threads through its lock-free free-list.

use core::ptr::NonNull;

use crate::{BucketIndex, Error, Platform};

use super::{
    free_list::FreeList,
    live_map::{LiveMap, SlotState},
    slots::Slots,
};

/// Bucket
pub(crate) struct Bucket {
    index: BucketIndex,
    slots: Slots,
    free_list: FreeList,
    live: LiveMap,
}

impl Bucket {
    /// Creates an instance spanning `bucket_size` bytes from `base`, with all its slots free.
    ///
    /// Returns None if the bookkeeping cannot be reserved from `platform`.
    ///
    /// #   Safety
    ///
    /// -   Assumes `base` points to `bucket_size` writable bytes, exclusively owned by the instance.
    /// -   Assumes `base` is aligned on `index.slot_alignment()`.
    /// -   Assumes `bucket_size / index.slot_size()` is less than `u32::MAX`.
    pub(crate) unsafe fn new<P: Platform>(platform: &P, index: BucketIndex, base: NonNull<u8>, bucket_size: usize)
        -> Option<Self>
    {
        let capacity = bucket_size / index.slot_size();
        debug_assert!(capacity < u32::MAX as usize);

        let live = LiveMap::new(platform, capacity)?;
        let slots = Slots::new(base, index.slot_size(), capacity as u32);
        let free_list = FreeList::new(&slots);

        Some(Self { index, slots, free_list, live })
    }

    /// Returns the bookkeeping to the platform.
    ///
    /// #   Safety
    ///
    /// -   Assumes `platform` is the platform the instance was created with.
    /// -   Assumes the instance is no longer used afterwards.
    pub(crate) unsafe fn release<P: Platform>(&self, platform: &P) { self.live.release(platform) }

    /// Returns the index of the bucket.
    pub(crate) fn index(&self) -> BucketIndex { self.index }

    /// Returns the number of slots.
    pub(crate) fn capacity(&self) -> usize { self.slots.capacity() as usize }

    /// Returns the approximate number of slots on the free-list.
    pub(crate) fn available(&self) -> usize { self.free_list.available() }

    /// Returns whether `ptr` points to the start of one of the slots.
    pub(crate) fn is_slot(&self, ptr: NonNull<u8>) -> bool { self.slots.index_of(ptr).is_some() }

    /// Removes up to `out.len()` slots from the free-list, in a single exchange.
    ///
    /// Returns the number of slots acquired, stored at the front of `out`; 0 if the bucket is exhausted.
    ///
    /// #   Panics
    ///
    /// In debug builds, if any slot acquired was not listed.
    pub(crate) fn acquire_batch(&self, out: &mut [u32]) -> usize {
        let acquired = self.free_list.pop_batch(&self.slots, out);

        for index in &out[..acquired] {
            let moved = self.live.transition(*index, SlotState::Listed, SlotState::Stocked);
            debug_assert!(moved.is_ok(), "Slot {} of bucket {} acquired while {:?}", index, self.index.value(), moved);
        }

        acquired
    }

    /// Pushes the slots back onto the free-list, in a single exchange.
    ///
    /// #   Panics
    ///
    /// In debug builds, if any slot is out of bounds, still live, or already listed.
    ///
    /// #   Safety
    ///
    /// -   Assumes the slots are no longer referenced, and appear only once.
    pub(crate) unsafe fn release_batch(&self, batch: &[u32]) {
        if cfg!(debug_assertions) {
            for index in batch {
                assert!(self.slots.contains(*index), "Slot {} out of bucket {}", index, self.index.value());

                match self.live.transition(*index, SlotState::Stocked, SlotState::Listed) {
                    Ok(()) => (),
                    Err(SlotState::Live) => panic!("Slot {} of bucket {} released while live", index, self.index.value()),
                    Err(_) => panic!("Slot {} of bucket {} released twice", index, self.index.value()),
                }
            }
        }

        self.free_list.push_batch(&self.slots, batch);
    }

    /// Hands out a slot acquired from the free-list to the user.
    ///
    /// #   Panics
    ///
    /// In debug builds, if the slot is not stocked; that is, if it is handed out twice.
    pub(crate) fn hand_out(&self, index: u32) -> NonNull<u8> {
        let moved = self.live.transition(index, SlotState::Stocked, SlotState::Live);
        debug_assert!(moved.is_ok(), "Slot {} of bucket {} handed out while {:?}", index, self.index.value(), moved);

        self.slots.slot(index)
    }

    /// Takes back a slot from the user, returning its index.
    ///
    /// #   Errors
    ///
    /// -   `ForeignPointer` if `ptr` does not point to the start of one of the slots.
    ///
    /// #   Panics
    ///
    /// In debug builds, if the slot is not live; that is, on double free.
    pub(crate) fn take_back(&self, ptr: NonNull<u8>) -> Result<u32, Error> {
        let index = self.slots.index_of(ptr).ok_or(Error::ForeignPointer(ptr.as_ptr() as usize))?;

        let moved = self.live.transition(index, SlotState::Live, SlotState::Stocked);
        debug_assert!(moved.is_ok(), "Double free of {:?}, slot {} of bucket {}", ptr, index, self.index.value());

        Ok(index)
    }
}

// mod tests
