//! Slots
//!
//! A view of the memory spanned by a bucket, as an array of equally sized slots addressed by a 32-bit index.

use core::{
    ptr::NonNull,
    sync::atomic::AtomicU32,
};

/// The index marking the end of a chain of slots.
pub(crate) const END_OF_CHAIN: u32 = u32::MAX;

/// Slots
///
/// The slots of a bucket, starting at `base`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Slots {
    base: NonNull<u8>,
    slot_size: usize,
    capacity: u32,
}

impl Slots {
    /// Creates an instance.
    ///
    /// #   Safety
    ///
    /// -   Assumes `base` points to at least `slot_size * capacity` bytes, valid for as long as the instance is used.
    /// -   Assumes `base` and `slot_size` are both multiples of 4.
    /// -   Assumes `capacity` is less than `END_OF_CHAIN`.
    pub(crate) unsafe fn new(base: NonNull<u8>, slot_size: usize, capacity: u32) -> Self {
        debug_assert!(slot_size >= 4 && slot_size % 4 == 0);
        debug_assert!((base.as_ptr() as usize) % 4 == 0);
        debug_assert!(capacity < END_OF_CHAIN);

        Self { base, slot_size, capacity }
    }

    /// Returns the size of each slot.
    pub(crate) fn slot_size(&self) -> usize { self.slot_size }

    /// Returns the number of slots.
    pub(crate) fn capacity(&self) -> u32 { self.capacity }

    /// Returns whether `index` designates one of the slots.
    pub(crate) fn contains(&self, index: u32) -> bool { index < self.capacity }

    /// Returns the address of the slot.
    pub(crate) fn slot(&self, index: u32) -> NonNull<u8> {
        debug_assert!(self.contains(index), "{} >= {}", index, self.capacity);

        //  Safety:
        //  -   `index` is within bounds, hence the offset is within the region.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index as usize * self.slot_size)) }
    }

    /// Returns the index of the slot starting at `ptr`.
    ///
    /// Returns None if `ptr` is outside the slots, or does not point to the start of a slot.
    pub(crate) fn index_of(&self, ptr: NonNull<u8>) -> Option<u32> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.base.as_ptr() as usize)?;

        if offset % self.slot_size != 0 {
            return None;
        }

        let index = offset / self.slot_size;

        if index >= self.capacity as usize {
            return None;
        }

        Some(index as u32)
    }

    /// Returns the link embedded in the first 4 bytes of a slot.
    ///
    /// #   Safety
    ///
    /// -   Assumes the slot is not live, or is being raced for by a free-list which will discard whatever is read.
    pub(crate) unsafe fn link(&self, index: u32) -> &AtomicU32 {
        &*(self.slot(index).as_ptr() as *const AtomicU32)
    }
}

#[cfg(test)]
mod tests {

use std::alloc::Layout;

use super::*;
use super::super::test::AlignedBuffer;

#[test]
fn slots_slot() {
    let buffer = AlignedBuffer::new(Layout::from_size_align(256, 64).unwrap());
    let slots = unsafe { Slots::new(buffer.address(), 48, 5) };

    let base = buffer.address().as_ptr() as usize;

    assert_eq!(base, slots.slot(0).as_ptr() as usize);
    assert_eq!(base + 48, slots.slot(1).as_ptr() as usize);
    assert_eq!(base + 192, slots.slot(4).as_ptr() as usize);
}

#[test]
fn slots_index_of() {
    let buffer = AlignedBuffer::new(Layout::from_size_align(256, 64).unwrap());
    let slots = unsafe { Slots::new(buffer.address(), 48, 5) };

    let at = |offset: isize| NonNull::new(buffer.address().as_ptr().wrapping_offset(offset)).unwrap();

    assert_eq!(Some(0), slots.index_of(at(0)));
    assert_eq!(Some(1), slots.index_of(at(48)));
    assert_eq!(Some(4), slots.index_of(at(192)));

    assert_eq!(None, slots.index_of(at(-48)));
    assert_eq!(None, slots.index_of(at(16)));
    assert_eq!(None, slots.index_of(at(240)));
}

#[test]
fn slots_link() {
    let buffer = AlignedBuffer::new(Layout::from_size_align(64, 16).unwrap());
    let slots = unsafe { Slots::new(buffer.address(), 16, 4) };

    unsafe { slots.link(2) }.store(7, core::sync::atomic::Ordering::Relaxed);

    let bytes = unsafe { core::slice::from_raw_parts(slots.slot(2).as_ptr(), 4) };
    assert_eq!(7u32.to_ne_bytes(), bytes);
}

} // mod tests
