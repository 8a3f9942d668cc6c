//! A lock-free stack of slot indices.
//!
//! The free slots of a bucket are chained through their first 4 bytes, each holding the index of the next free slot,
//! or `END_OF_CHAIN`.
//!
//! The head of the chain is packed with a tag in a single 64-bits atomic; the tag is bumped on every successful
//! exchange so that a head popped and pushed back in between a load and a compare-exchange is not mistaken for an
//! untouched head.
//!
//! #   Safety
//!
//! Walking the chain reads the links of slots which may have been popped, and are being written to, by another
//! thread. Such reads are never trusted: an index out of bounds restarts the walk, and an index in bounds is only
//! used if the compare-exchange on the head proves that the chain was not modified in the meantime.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::slots::{END_OF_CHAIN, Slots};

/// FreeList
pub(crate) struct FreeList {
    head: AtomicU64,
    //  Approximate number of slots in the list; never less than the actual number.
    available: AtomicUsize,
}

impl FreeList {
    /// Creates an instance, threading all the slots in order.
    ///
    /// #   Safety
    ///
    /// -   Assumes exclusive access to the slots.
    pub(crate) unsafe fn new(slots: &Slots) -> Self {
        let capacity = slots.capacity();

        for index in 0..capacity {
            let next = if index + 1 < capacity { index + 1 } else { END_OF_CHAIN };
            slots.link(index).store(next, Ordering::Relaxed);
        }

        let first = if capacity > 0 { 0 } else { END_OF_CHAIN };

        Self { head: AtomicU64::new(pack(0, first)), available: AtomicUsize::new(capacity as usize) }
    }

    /// Returns the approximate number of slots in the list.
    pub(crate) fn available(&self) -> usize { self.available.load(Ordering::Relaxed) }

    /// Pops up to `out.len()` slots, in a single exchange.
    ///
    /// Returns the number of slots popped, stored at the front of `out`.
    pub(crate) fn pop_batch(&self, slots: &Slots, out: &mut [u32]) -> usize {
        if out.is_empty() {
            return 0;
        }

        let mut current = self.head.load(Ordering::Acquire);

        loop {
            let (tag, first) = unpack(current);

            if first == END_OF_CHAIN {
                return 0;
            }

            let mut count = 0;
            let mut next = first;
            let mut torn = false;

            while count < out.len() && next != END_OF_CHAIN {
                if !slots.contains(next) {
                    torn = true;
                    break;
                }

                out[count] = next;
                count += 1;

                //  Safety:
                //  -   `next` is in bounds.
                //  -   The value read is only used if the exchange below succeeds.
                next = unsafe { slots.link(next) }.load(Ordering::Relaxed);
            }

            if torn {
                let reloaded = self.head.load(Ordering::Acquire);
                debug_assert_ne!(current, reloaded, "Free-list corrupted: link to {}", next);

                current = reloaded;
                continue;
            }

            match self.head.compare_exchange_weak(current, pack(tag.wrapping_add(1), next), Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.available.fetch_sub(count, Ordering::Relaxed);
                    return count;
                },
                Err(actual) => current = actual,
            }
        }
    }

    /// Pushes the slots, in a single exchange.
    ///
    /// #   Safety
    ///
    /// -   Assumes exclusive access to the slots of `batch`, which are no longer referenced by the caller.
    /// -   Assumes every index of `batch` is in bounds, and appears only once.
    pub(crate) unsafe fn push_batch(&self, slots: &Slots, batch: &[u32]) {
        let (first, last) = match (batch.first(), batch.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return,
        };

        for pair in batch.windows(2) {
            slots.link(pair[0]).store(pair[1], Ordering::Relaxed);
        }

        //  Incremented ahead, so that a concurrent pop never brings it below 0.
        self.available.fetch_add(batch.len(), Ordering::Relaxed);

        let last = slots.link(last);
        let mut current = self.head.load(Ordering::Relaxed);

        loop {
            let (tag, head) = unpack(current);

            last.store(head, Ordering::Relaxed);

            match self.head.compare_exchange_weak(current, pack(tag.wrapping_add(1), first), Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

//
//  Implementation
//

fn pack(tag: u32, index: u32) -> u64 { ((tag as u64) << 32) | (index as u64) }

fn unpack(packed: u64) -> (u32, u32) { ((packed >> 32) as u32, packed as u32) }

#[cfg(test)]
mod tests {

use std::{alloc::Layout, collections::BTreeSet};

use fbmalloc_test::LockstepBuilder;

use super::*;
use super::super::test::AlignedBuffer;

struct Fixture {
    _buffer: AlignedBuffer,
    slots: Slots,
    list: FreeList,
}

//  Safety:
//  -   The buffer is only accessed through the free-list, or by the thread which popped a slot.
unsafe impl Send for Fixture {}
unsafe impl Sync for Fixture {}

impl Fixture {
    fn new(capacity: u32) -> Self {
        let buffer = AlignedBuffer::new(Layout::from_size_align(capacity as usize * 16, 16).unwrap());
        let slots = unsafe { Slots::new(buffer.address(), 16, capacity) };
        let list = unsafe { FreeList::new(&slots) };

        Self { _buffer: buffer, slots, list }
    }

    fn pop(&self, n: usize) -> Vec<u32> {
        let mut out = vec![0; n];
        let count = self.list.pop_batch(&self.slots, &mut out);
        out.truncate(count);
        out
    }

    fn push(&self, batch: &[u32]) { unsafe { self.list.push_batch(&self.slots, batch) } }
}

#[test]
fn free_list_pack_unpack() {
    assert_eq!((0, 0), unpack(pack(0, 0)));
    assert_eq!((7, END_OF_CHAIN), unpack(pack(7, END_OF_CHAIN)));
    assert_eq!((u32::MAX, 42), unpack(pack(u32::MAX, 42)));
}

#[test]
fn free_list_new_in_order() {
    let fixture = Fixture::new(5);

    assert_eq!(5, fixture.list.available());
    assert_eq!(vec!(0, 1, 2), fixture.pop(3));
    assert_eq!(vec!(3, 4), fixture.pop(3));
    assert_eq!(Vec::<u32>::new(), fixture.pop(3));
    assert_eq!(0, fixture.list.available());
}

#[test]
fn free_list_pop_empty_out() {
    let fixture = Fixture::new(5);

    assert_eq!(Vec::<u32>::new(), fixture.pop(0));
    assert_eq!(5, fixture.list.available());
}

#[test]
fn free_list_push_pop() {
    let fixture = Fixture::new(8);

    let first = fixture.pop(8);
    assert_eq!(0, fixture.list.available());

    fixture.push(&first[4..]);
    assert_eq!(4, fixture.list.available());

    fixture.push(&[1, 0]);
    assert_eq!(6, fixture.list.available());

    assert_eq!(vec!(1, 0, 4, 5), fixture.pop(4));
    assert_eq!(vec!(6, 7), fixture.pop(4));
}

#[test]
fn free_list_push_empty() {
    let fixture = Fixture::new(2);

    fixture.push(&[]);

    assert_eq!(2, fixture.list.available());
    assert_eq!(vec!(0, 1), fixture.pop(4));
}

#[test]
fn free_list_concurrent_pop() {
    //  Each thread pops a batch; together they drain the list, and no slot is handed out twice.
    let mut builder = LockstepBuilder::new(Fixture::new(16), vec!(vec!(); 4));

    builder.add_step(|| |fixture: &Fixture, local: &mut Vec<u32>| {
        *local = fixture.pop(4);
        assert_eq!(4, local.len());
    });

    builder.add_step(|| |fixture: &Fixture, _: &mut Vec<u32>| {
        assert_eq!(0, fixture.list.available());
    });

    builder.add_step(|| |fixture: &Fixture, local: &mut Vec<u32>| {
        fixture.push(local);
        local.clear();
    });

    let lockstep = builder.launch(100);
    lockstep.join();

    let fixture = lockstep.shared();
    let all: BTreeSet<_> = fixture.pop(16).into_iter().collect();
    assert_eq!(16, all.len());
}

#[test]
fn free_list_concurrent_push_pop_fuzzing() {
    //  Half the threads push whilst the other half pop, then the roles are reversed. Each thread verifies that the
    //  slots it popped are its own to write to.
    #[derive(Clone)]
    struct Local {
        index: usize,
        held: Vec<u32>,
    }

    let fixture = Fixture::new(32);
    let locals: Vec<_> = (0..4).map(|index| Local { index, held: vec!() }).collect();

    //  Prime the pushers of the first step.
    let mut locals = locals;
    for local in locals.iter_mut().filter(|l| l.index % 2 == 0) {
        local.held = fixture.pop(4);
    }

    let mut builder = LockstepBuilder::new(fixture, locals);

    for phase in 0..2 {
        builder.add_step(move || move |fixture: &Fixture, local: &mut Local| {
            if local.index % 2 == phase {
                fixture.push(&local.held);
                local.held.clear();
            } else {
                local.held = fixture.pop(4);
                assert_eq!(4, local.held.len());

                for index in &local.held {
                    let slot = fixture.slots.slot(*index);
                    unsafe { slot.as_ptr().add(4).write_bytes(local.index as u8, 12) };
                }
            }
        });

        builder.add_step(|| |fixture: &Fixture, local: &mut Local| {
            for index in &local.held {
                let slot = fixture.slots.slot(*index);
                let bytes = unsafe { std::slice::from_raw_parts(slot.as_ptr().add(4), 12) };
                assert!(bytes.iter().all(|b| *b == local.index as u8), "{:?} in {}", bytes, local.index);
            }
        });
    }

    let lockstep = builder.launch(200);
    lockstep.join();

    let held: usize = lockstep.locals().iter().map(|l| l.held.len()).sum();
    assert_eq!(32, held + lockstep.shared().list.available());
}

} // mod tests
