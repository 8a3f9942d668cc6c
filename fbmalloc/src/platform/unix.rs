//! Implementation of the Platform trait, with `mmap`.

use std::{
    alloc::Layout,
    convert::TryFrom,
    ptr::{self, NonNull},
};

use fbmalloc_core::PowerOf2;

/// Implementation of the Platform trait, with `mmap`.
///
/// Memory is reserved lazily by the OS; the pages of a bucket are only committed once touched.
#[derive(Debug, Default)]
pub(crate) struct SystemPlatform;

impl SystemPlatform {
    /// Creates an instance.
    pub(crate) const fn new() -> Self { Self }
}

impl fbmalloc_core::Platform for SystemPlatform {
    unsafe fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        //  Safety:
        //  -   The alignment of a layout is always a power of 2.
        let alignment = PowerOf2::new_unchecked(layout.align());

        let candidate = if alignment <= page_size() {
            mmap_allocate(layout.size())
        } else {
            mmap_over(layout.size(), alignment)
        };

        debug_assert!(candidate.map(|c| c.as_ptr() as usize % alignment == 0).unwrap_or(true),
            "Incorrect alignment of allocation: {:?} % {:x} != 0", candidate, alignment.value());

        candidate
    }

    unsafe fn deallocate(&self, pointer: NonNull<u8>, layout: Layout) {
        munmap_deallocate(pointer.as_ptr(), layout.size());
    }
}

//  Safety:
//  -   4096 is a power of 2.
const DEFAULT_PAGE_SIZE: PowerOf2 = unsafe { PowerOf2::new_unchecked(4096) };

//  Returns the size of a page, as reported by the OS.
fn page_size() -> PowerOf2 {
    //  Safety:
    //  -   `sysconf` has no precondition.
    let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    usize::try_from(result).ok()
        .and_then(PowerOf2::new)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

//  Attempts to allocate the required size, aligned on `alignment`.
//
//  Ensures the alignment is met by over-allocating then trimming front and back.
fn mmap_over(size: usize, alignment: PowerOf2) -> Option<NonNull<u8>> {
    //  `munmap` requires page-aligned addresses, hence the back must start on a page boundary.
    let size = page_size().checked_round_up(size)?;
    let over_size = size.checked_add(alignment.value())?;
    let front_pointer = mmap_allocate(over_size)?;

    let misalignment = (front_pointer.as_ptr() as usize) % alignment;
    let front_size = if misalignment == 0 { 0 } else { alignment.value() - misalignment };
    let back_size = over_size - front_size - size;

    debug_assert!(front_size < alignment.value(), "{} >= {}", front_size, alignment.value());
    debug_assert!(front_size + size + back_size == over_size,
        "{} + {} + {} != {}", front_size, size, back_size, over_size);

    //  Safety:
    //  -   `front_size` is less than `over_size`, hence the result is within the allocated block.
    let aligned_pointer = unsafe { front_pointer.as_ptr().add(front_size) };

    //  Safety:
    //  -   `front_size + size` is less than `over_size`, hence the result is within the allocated block.
    let back_pointer = unsafe { aligned_pointer.add(size) };

    if front_size > 0 {
        //  Safety:
        //  -   `[front_pointer, front_pointer + front_size)` is mapped, and no longer in use.
        unsafe { munmap_deallocate(front_pointer.as_ptr(), front_size) };
    }

    if back_size > 0 {
        //  Safety:
        //  -   `[back_pointer, back_pointer + back_size)` is mapped, and no longer in use.
        unsafe { munmap_deallocate(back_pointer, back_size) };
    }

    NonNull::new(aligned_pointer)
}

//  Wrapper around `mmap`.
//
//  Returns a pointer to `size` bytes of zeroed memory, aligned on a page boundary.
fn mmap_allocate(size: usize) -> Option<NonNull<u8>> {
    let length = size;
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    //  No specific address hint.
    let addr = ptr::null_mut();
    //  When used in conjunction with MAP_ANONYMOUS, fd is mandated to be -1 on some implementations.
    let fd = -1;
    //  When used in conjunction with MAP_ANONYMOUS, offset is mandated to be 0 on some implementations.
    let offset = 0;

    //  Safety:
    //  -   `addr`, `fd`, and `offset` are suitable for MAP_ANONYMOUS.
    let result = unsafe { libc::mmap(addr, length, prot, flags, fd, offset) };

    let result = if result != libc::MAP_FAILED { result as *mut u8 } else { ptr::null_mut() };
    NonNull::new(result)
}

//  Wrapper around `munmap`.
//
//  #   Panics
//
//  If `munmap` returns a non-0 result.
//
//  #   Safety
//
//  -   Assumes that `addr` points to a `mmap`ed area of at least `size` bytes.
//  -   Assumes that the range `[addr, addr + size)` is no longer in use.
unsafe fn munmap_deallocate(addr: *mut u8, size: usize) {
    let result = libc::munmap(addr as *mut libc::c_void, size);
    assert!(result == 0, "Could not munmap {:x}, {}: {}", addr as usize, size, result);
}

// mod tests
