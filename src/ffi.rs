//! C symbols so that the `cdylib` can replace the system allocator, for
//! example with `LD_PRELOAD`. Everything goes through the process wide
//! allocator, see [`crate::global`].
//!
//! Only the functions below are replaced. Memory coming from the aligned
//! variants of the system allocator (`posix_memalign` and friends) is unknown
//! to us, so `free` ignores it.

use libc::{c_void, size_t};

#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    crate::allocate(size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn free(address: *mut c_void) {
    crate::release(address.cast())
}

#[no_mangle]
pub unsafe extern "C" fn realloc(address: *mut c_void, size: size_t) -> *mut c_void {
    crate::reallocate(address.cast(), size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    crate::zeroed_allocate(count, size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn reallocarray(
    address: *mut c_void,
    count: size_t,
    size: size_t,
) -> *mut c_void {
    crate::reallocate_array(address.cast(), count, size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn safe_malloc(size: size_t) -> *mut c_void {
    crate::fail_fast_allocate(size).cast()
}

#[no_mangle]
pub unsafe extern "C" fn show_alloc_mem() {
    crate::report(false)
}

#[no_mangle]
pub unsafe extern "C" fn show_alloc_mem_ex() {
    crate::report(true)
}
