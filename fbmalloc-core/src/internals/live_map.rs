//! LiveMap
//!
//! The state of each slot of a bucket: on the free-list, stocked in a thread cache, or handed out to the user. Every
//! move of a slot is checked against its recorded state, catching double frees, double releases, and slots released
//! while still in use.
//!
//! The map only exists in debug builds; in release builds it is a zero-sized type whose checks always pass.

#[cfg(debug_assertions)]
pub(crate) use checked::LiveMap;

#[cfg(not(debug_assertions))]
pub(crate) use unchecked::LiveMap;

/// The state of a slot.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum SlotState {
    /// On the free-list of the bucket.
    Listed = 0,
    /// Acquired from the free-list, not yet handed out.
    Stocked = 1,
    /// Handed out to the user.
    Live = 2,
}

#[cfg(debug_assertions)]
mod checked {

use core::{
    alloc::Layout,
    mem,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::Platform;

use super::SlotState;

const BITS_PER_SLOT: usize = 2;
const SLOTS_PER_WORD: usize = 64 / BITS_PER_SLOT;
const MASK: u64 = 0b11;

/// LiveMap
pub(crate) struct LiveMap {
    words: NonNull<AtomicU64>,
    number_words: usize,
}

impl LiveMap {
    /// Creates an instance tracking `capacity` slots, all listed, reserving its storage from `platform`.
    ///
    /// Returns None if the platform cannot reserve the storage.
    pub(crate) fn new<P: Platform>(platform: &P, capacity: usize) -> Option<Self> {
        let number_words = core::cmp::max(1, (capacity + SLOTS_PER_WORD - 1) / SLOTS_PER_WORD);
        let layout = Self::layout(number_words)?;

        //  Safety:
        //  -   `layout.size()` is a non-zero multiple of `layout.align()`.
        let words = unsafe { platform.allocate(layout) }?;

        //  Safety:
        //  -   `words` points to `layout.size()` writable bytes.
        unsafe { words.as_ptr().write_bytes(0, layout.size()) };

        Some(Self { words: words.cast(), number_words })
    }

    /// Returns the storage to the platform.
    ///
    /// #   Safety
    ///
    /// -   Assumes `platform` is the platform the instance was created with.
    /// -   Assumes the instance is no longer used afterwards.
    pub(crate) unsafe fn release<P: Platform>(&self, platform: &P) {
        if let Some(layout) = Self::layout(self.number_words) {
            platform.deallocate(self.words.cast(), layout);
        }
    }

    /// Moves the slot from state `from` to state `to`.
    ///
    /// #   Errors
    ///
    /// Returns the current state of the slot, left untouched, if it is not `from`.
    pub(crate) fn transition(&self, index: u32, from: SlotState, to: SlotState) -> Result<(), SlotState> {
        let (word, shift) = self.locate(index);

        let mut current = word.load(Ordering::Relaxed);

        loop {
            let state = Self::decode((current >> shift) & MASK);

            if state != from {
                return Err(state);
            }

            let next = (current & !(MASK << shift)) | ((to as u64) << shift);

            match word.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the state of the slot.
    #[cfg(test)]
    pub(crate) fn state(&self, index: u32) -> SlotState {
        let (word, shift) = self.locate(index);

        Self::decode((word.load(Ordering::Relaxed) >> shift) & MASK)
    }

    fn decode(bits: u64) -> SlotState {
        match bits {
            0 => SlotState::Listed,
            1 => SlotState::Stocked,
            _ => SlotState::Live,
        }
    }

    fn layout(number_words: usize) -> Option<Layout> {
        let size = number_words.checked_mul(mem::size_of::<AtomicU64>())?;

        Layout::from_size_align(size, mem::align_of::<AtomicU64>()).ok()
    }

    fn locate(&self, index: u32) -> (&AtomicU64, u32) {
        let index = index as usize;
        assert!(index / SLOTS_PER_WORD < self.number_words, "Slot {} out of the live map", index);

        //  Safety:
        //  -   In bounds, as per the assert above.
        let word = unsafe { &*self.words.as_ptr().add(index / SLOTS_PER_WORD) };

        (word, ((index % SLOTS_PER_WORD) * BITS_PER_SLOT) as u32)
    }
}

//  Safety:
//  -   The words are only accessed atomically.
unsafe impl Send for LiveMap {}
unsafe impl Sync for LiveMap {}

} // mod checked

#[cfg(not(debug_assertions))]
mod unchecked {

use crate::Platform;

use super::SlotState;

/// LiveMap
pub(crate) struct LiveMap;

impl LiveMap {
    pub(crate) fn new<P: Platform>(_: &P, _: usize) -> Option<Self> { Some(LiveMap) }

    pub(crate) unsafe fn release<P: Platform>(&self, _: &P) {}

    #[inline(always)]
    pub(crate) fn transition(&self, _: u32, _: SlotState, _: SlotState) -> Result<(), SlotState> { Ok(()) }
}

} // mod unchecked

#[cfg(all(test, debug_assertions))]
mod tests {

use super::*;
use super::super::test::TestPlatform;

#[test]
fn live_map_transition() {
    let platform = TestPlatform::new();
    let map = LiveMap::new(&platform, 100).unwrap();

    assert_eq!(1, platform.outstanding());
    assert_eq!(32, platform.bytes());

    assert_eq!(SlotState::Listed, map.state(70));

    assert_eq!(Ok(()), map.transition(70, SlotState::Listed, SlotState::Stocked));
    assert_eq!(Err(SlotState::Stocked), map.transition(70, SlotState::Listed, SlotState::Stocked));

    assert_eq!(Ok(()), map.transition(70, SlotState::Stocked, SlotState::Live));
    assert_eq!(SlotState::Live, map.state(70));

    assert_eq!(SlotState::Listed, map.state(69));
    assert_eq!(SlotState::Listed, map.state(71));

    assert_eq!(Ok(()), map.transition(70, SlotState::Live, SlotState::Stocked));
    assert_eq!(Err(SlotState::Stocked), map.transition(70, SlotState::Live, SlotState::Stocked));

    assert_eq!(Ok(()), map.transition(70, SlotState::Stocked, SlotState::Listed));
    assert_eq!(SlotState::Listed, map.state(70));

    unsafe { map.release(&platform) };
    assert_eq!(0, platform.outstanding());
}

#[test]
fn live_map_reservation_failure() {
    let platform = TestPlatform::with_budget(0);

    assert!(LiveMap::new(&platform, 100).is_none());
}

#[test]
#[should_panic]
fn live_map_out_of_bounds() {
    let platform = TestPlatform::new();
    let map = LiveMap::new(&platform, 32).unwrap();

    map.state(32);
}

} // mod tests
