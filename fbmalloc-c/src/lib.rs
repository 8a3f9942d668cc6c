#![deny(missing_docs)]

//! Exposition of the Allocator API via a C ABI.
//!
//! An allocator is handed out as an opaque pointer, created by `fb_allocator_create` and released by
//! `fb_allocator_destroy`. Every other function takes this pointer as its first argument; a NULL allocator is treated
//! as a failure.

use std::{process, ptr};

use fbmalloc::{Allocator, CacheOptions, Configuration, Error, Warmup};
use tracing::error;

/// Creates an allocator of `bucket_count` buckets of `bucket_size` bytes each.
///
/// Returns NULL if the configuration is invalid, or the memory cannot be reserved.
#[cold]
#[no_mangle]
pub extern "C" fn fb_allocator_create(bucket_count: u32, bucket_size: usize) -> *mut Allocator {
    match Allocator::new(Configuration::new(bucket_count as usize, bucket_size)) {
        Ok(allocator) => Box::into_raw(Box::new(allocator)),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroys the allocator; all memory allocated from it is released.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or was returned by `fb_allocator_create` and not destroyed since.
/// -   Assumes that no memory allocated from `allocator` is used after this call.
#[cold]
#[no_mangle]
pub unsafe extern "C" fn fb_allocator_destroy(allocator: *mut Allocator) {
    if !allocator.is_null() {
        drop(Box::from_raw(allocator));
    }
}

/// Creates a thread cache for the calling thread, holding up to `cache_size` slots per bucket.
///
/// `warmup` is 0 for cold, 1 for warm, and 2 for hot.
///
/// Returns 0 on success, and -1 otherwise; notably if the calling thread already has a thread cache.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or a live allocator.
#[cold]
#[no_mangle]
pub unsafe extern "C" fn fb_thread_cache_create(allocator: *const Allocator, warmup: u32, cache_size: usize) -> i32 {
    let (allocator, warmup) = match (allocator.as_ref(), Warmup::from_raw(warmup)) {
        (Some(allocator), Some(warmup)) => (allocator, warmup),
        _ => return -1,
    };

    match allocator.create_thread_cache(CacheOptions::new(cache_size, warmup)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Destroys the thread cache of the calling thread.
///
/// Returns 0 if a thread cache was destroyed, and -1 if there was none.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or a live allocator.
#[cold]
#[no_mangle]
pub unsafe extern "C" fn fb_thread_cache_destroy(allocator: *const Allocator) -> i32 {
    match allocator.as_ref() {
        Some(allocator) if allocator.destroy_thread_cache() => 0,
        _ => -1,
    }
}

/// Allocates `size` bytes, aligned on `alignment`; 0 stands for the natural alignment of 16 bytes.
///
/// Returns NULL if `size` is 0 or over the allocation limit, if `alignment` cannot be honoured, or if the bucket is
/// exhausted.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or a live allocator.
#[no_mangle]
pub unsafe extern "C" fn fb_malloc(allocator: *const Allocator, size: usize, alignment: usize) -> *mut u8 {
    allocator.as_ref()
        .and_then(|allocator| allocator.malloc(size, alignment).ok())
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// Deallocates the memory pointed to by `pointer`; a NULL `pointer` is ignored.
///
/// Aborts if `pointer` was not allocated by `allocator`.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or a live allocator.
/// -   Assumes `pointer` is not used after this call.
#[no_mangle]
pub unsafe extern "C" fn fb_free(allocator: *const Allocator, pointer: *mut u8) {
    let allocator = match allocator.as_ref() {
        Some(allocator) => allocator,
        None => return,
    };

    match allocator.free(pointer) {
        Ok(()) | Err(Error::NullPointer) => (),
        Err(error) => {
            error!(%error, "fb_free: aborting");
            process::abort();
        },
    }
}

/// Reallocates the memory pointed to by `pointer` to hold `size` bytes, aligned on `alignment`.
///
/// A NULL `pointer` behaves as `fb_malloc`. Returns NULL on failure, in which case `pointer` is untouched.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or a live allocator.
/// -   Assumes `pointer` is not used after this call, if a different pointer is returned.
#[no_mangle]
pub unsafe extern "C" fn fb_realloc(allocator: *const Allocator, pointer: *mut u8, size: usize, alignment: usize)
    -> *mut u8
{
    if pointer.is_null() {
        return fb_malloc(allocator, size, alignment);
    }

    allocator.as_ref()
        .and_then(|allocator| allocator.realloc(pointer, size, alignment).ok())
        .map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// Returns the usable size of the memory pointed to by `pointer`, or 0 if it was not allocated by `allocator`.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or a live allocator.
#[no_mangle]
pub unsafe extern "C" fn fb_msize(allocator: *const Allocator, pointer: *const u8) -> usize {
    allocator.as_ref()
        .and_then(|allocator| allocator.size_of(pointer).ok())
        .unwrap_or(0)
}

/// Returns the bucket of the memory pointed to by `pointer`, or -1 if it was not allocated by `allocator`.
///
/// #   Safety
///
/// -   Assumes `allocator` is NULL, or a live allocator.
#[no_mangle]
pub unsafe extern "C" fn fb_mbucket(allocator: *const Allocator, pointer: *const u8) -> i32 {
    allocator.as_ref()
        .and_then(|allocator| allocator.bucket_of(pointer).ok())
        .map_or(-1, |bucket| bucket as i32)
}

#[cfg(test)]
mod tests {

use super::*;

#[test]
fn create_destroy() {
    assert!(fb_allocator_create(65, 4096).is_null());
    assert!(fb_allocator_create(4, 0).is_null());

    let allocator = fb_allocator_create(4, 4096);
    assert!(!allocator.is_null());

    unsafe {
        fb_allocator_destroy(allocator);
        fb_allocator_destroy(ptr::null_mut());
    }
}

#[test]
fn thread_cache_lifecycle() {
    let allocator = fb_allocator_create(4, 4096);

    unsafe {
        assert_eq!(-1, fb_thread_cache_create(allocator, 3, 16));
        assert_eq!(-1, fb_thread_cache_create(allocator, 2, 0));
        assert_eq!(0, fb_thread_cache_create(allocator, 2, 16));
        assert_eq!(-1, fb_thread_cache_create(allocator, 2, 16));

        assert_eq!(0, fb_thread_cache_destroy(allocator));
        assert_eq!(-1, fb_thread_cache_destroy(allocator));

        assert_eq!(-1, fb_thread_cache_create(ptr::null(), 0, 16));
        assert_eq!(-1, fb_thread_cache_destroy(ptr::null()));

        fb_allocator_destroy(allocator);
    }
}

#[test]
fn allocate_introspect_free() {
    let allocator = fb_allocator_create(4, 64);

    unsafe {
        let pointer = fb_malloc(allocator, 32, 0);
        assert!(!pointer.is_null());

        assert_eq!(32, fb_msize(allocator, pointer));
        assert_eq!(1, fb_mbucket(allocator, pointer));

        assert!(fb_malloc(allocator, 0, 0).is_null());
        assert!(fb_malloc(allocator, 65, 0).is_null());
        assert!(fb_malloc(ptr::null(), 16, 0).is_null());

        assert_eq!(0, fb_msize(allocator, ptr::null()));
        assert_eq!(-1, fb_mbucket(allocator, ptr::null()));

        fb_free(allocator, pointer);
        fb_free(allocator, ptr::null_mut());

        fb_allocator_destroy(allocator);
    }
}

#[test]
fn reallocate() {
    let allocator = fb_allocator_create(4, 4096);

    unsafe {
        let pointer = fb_realloc(allocator, ptr::null_mut(), 20, 0);
        assert_eq!(32, fb_msize(allocator, pointer));

        pointer.write_bytes(0x42, 20);

        assert_eq!(pointer, fb_realloc(allocator, pointer, 32, 0));

        let moved = fb_realloc(allocator, pointer, 64, 0);
        assert_ne!(pointer, moved);
        assert_eq!(3, fb_mbucket(allocator, moved));
        assert!(std::slice::from_raw_parts(moved, 20).iter().all(|b| *b == 0x42));

        assert!(fb_realloc(allocator, moved, 65, 0).is_null());
        assert_eq!(64, fb_msize(allocator, moved));

        fb_free(allocator, moved);
        fb_allocator_destroy(allocator);
    }
}

} // mod tests
