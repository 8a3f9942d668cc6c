//! Registry of the thread caches of the calling thread.
//!
//! Each allocator owns the thread caches created for it, indexed by thread. To find its own cache without taking a
//! lock, each thread also keeps a list of its registrations; on thread exit, this list is used to flush and
//! unregister each cache whose allocator is still alive.

use std::{
    cell::RefCell,
    ptr::NonNull,
    sync::Weak,
    thread::{self, ThreadId},
};

use fbmalloc_core::{Error, ThreadCache};

use crate::allocator::Shared;

/// A thread cache registered with an allocator, as seen from its thread.
pub(crate) struct Registration {
    /// Identifier of the allocator.
    pub(crate) allocator: u64,
    /// The allocator; used to detect that it was destroyed, and to unregister from it.
    pub(crate) shared: Weak<Shared>,
    /// The cache, owned by the allocator.
    pub(crate) cache: NonNull<ThreadCache>,
}

/// The registrations of the calling thread.
#[derive(Default)]
pub(crate) struct LocalCaches {
    //  Captured on first registration, as `thread::current()` is unavailable during thread-local destruction.
    thread: Option<ThreadId>,
    registrations: Vec<Registration>,
}

impl LocalCaches {
    /// Returns the identifier of the calling thread.
    pub(crate) fn thread(&mut self) -> ThreadId { *self.thread.get_or_insert_with(|| thread::current().id()) }

    /// Returns the cache registered for `allocator`, if any.
    pub(crate) fn find(&self, allocator: u64) -> Option<NonNull<ThreadCache>> {
        self.registrations.iter()
            .find(|r| r.allocator == allocator)
            .map(|r| r.cache)
    }

    /// Registers a cache; pruning registrations whose allocator was destroyed.
    pub(crate) fn register(&mut self, registration: Registration) {
        debug_assert!(self.find(registration.allocator).is_none());

        self.registrations.retain(|r| r.shared.strong_count() > 0);
        self.registrations.push(registration);
    }

    /// Unregisters the cache of `allocator`, returning it if any.
    pub(crate) fn unregister(&mut self, allocator: u64) -> Option<NonNull<ThreadCache>> {
        let position = self.registrations.iter().position(|r| r.allocator == allocator)?;

        Some(self.registrations.swap_remove(position).cache)
    }
}

impl Drop for LocalCaches {
    fn drop(&mut self) {
        let thread = match self.thread {
            Some(thread) => thread,
            None => return,
        };

        for registration in self.registrations.drain(..) {
            if let Some(shared) = registration.shared.upgrade() {
                shared.reap(thread);
            }
        }
    }
}

thread_local! {
    static CACHES: RefCell<LocalCaches> = RefCell::new(LocalCaches::default());
}

/// Invokes `fun` with the registrations of the calling thread.
///
/// #   Errors
///
/// -   `ThreadExiting` if the registrations are being torn down, the calling thread exiting.
/// -   `RegistryBusy` if the registrations are already in use higher up the stack.
pub(crate) fn with_local_caches<F, R>(fun: F) -> Result<R, Error>
    where
        F: FnOnce(&mut LocalCaches) -> R,
{
    CACHES.try_with(|caches| {
        caches.try_borrow_mut()
            .map(|mut caches| fun(&mut caches))
            .map_err(|_| Error::RegistryBusy)
    })
    .unwrap_or(Err(Error::ThreadExiting))
}

#[cfg(test)]
mod tests {

use crate::{Allocator, Configuration};

use super::*;

fn registration(allocator: &Allocator, address: usize) -> Registration {
    Registration {
        allocator: allocator.id(),
        shared: allocator.downgrade(),
        cache: NonNull::new(address as *mut ThreadCache).unwrap(),
    }
}

#[test]
fn local_caches_register_find_unregister() {
    let first = Allocator::new(Configuration::new(4, 4096)).unwrap();
    let second = Allocator::new(Configuration::new(4, 4096)).unwrap();

    let mut caches = LocalCaches::default();

    caches.register(registration(&first, 0x100));
    caches.register(registration(&second, 0x200));

    assert_eq!(Some(0x100), caches.find(first.id()).map(|c| c.as_ptr() as usize));
    assert_eq!(Some(0x200), caches.find(second.id()).map(|c| c.as_ptr() as usize));

    assert_eq!(Some(0x100), caches.unregister(first.id()).map(|c| c.as_ptr() as usize));
    assert_eq!(None, caches.find(first.id()));
    assert_eq!(None, caches.unregister(first.id()));

    caches.unregister(second.id());
}

#[test]
fn local_caches_prune_destroyed() {
    let first = Allocator::new(Configuration::new(4, 4096)).unwrap();
    let first_id = first.id();

    let mut caches = LocalCaches::default();
    caches.register(registration(&first, 0x100));

    drop(first);

    let second = Allocator::new(Configuration::new(4, 4096)).unwrap();
    caches.register(registration(&second, 0x200));

    assert_eq!(None, caches.find(first_id));
    assert_eq!(1, caches.registrations.len());

    caches.unregister(second.id());
}

#[test]
fn local_caches_thread() {
    let mut caches = LocalCaches::default();

    assert_eq!(thread::current().id(), caches.thread());
    assert_eq!(Some(thread::current().id()), caches.thread);
}

#[test]
fn with_local_caches_reentrancy() {
    let outer = with_local_caches(|_| with_local_caches(|_| ()));

    assert_eq!(Ok(Err(Error::RegistryBusy)), outer);
    assert_eq!(Ok(()), with_local_caches(|_| ()));
}

} // mod tests
