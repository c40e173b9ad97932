//! General purpose memory allocator that maps memory straight from the kernel
//! and manages it in zones. Requests are classified as tiny, small or large
//! by size. Tiny and small requests share zones that are mapped with room to
//! spare, large requests get a zone of their own. Inside zones, memory is
//! handed out with a first fit search over a chain of blocks that are split
//! on allocation and merged with their free neighbours on release.
//!
//! There are two ways of using it:
//!
//! - Build a [`ZoneAllocator`] and call its methods, or register it as the
//! `#[global_allocator]`.
//! - Use the free functions of this crate, which all go through one process
//! wide allocator and mirror the classic C interface (null on failure, `errno`
//! set to `ENOMEM`). With the `malloc-symbols` feature the crate also exports
//! `malloc`, `free` and friends so that the `cdylib` can be preloaded.
//!
//! All operations are serialized by one single lock, see [`ZoneAllocator`].

use std::ptr::{self, NonNull};

mod align;
mod allocator;
mod block;
mod config;
mod error;
#[cfg(feature = "malloc-symbols")]
mod ffi;
mod header;
mod heap;
mod list;
mod platform;
mod realloc;
mod report;
mod zone;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

/// Shorter syntax for allocation/reallocation return types.
pub(crate) type AllocResult = Result<NonNull<u8>, AllocError>;

pub use allocator::{ZoneAllocator, ZERO_SIZE};
pub use config::Config;
pub use error::{AllocError, HeapError};
pub use heap::HeapStats;
pub use zone::SizeClass;

/// Process wide allocator behind the free functions.
static ALLOCATOR: ZoneAllocator = ZoneAllocator::with_default_config();

/// The process wide allocator used by the free functions of this crate.
pub fn global() -> &'static ZoneAllocator {
    &ALLOCATOR
}

fn into_raw(result: AllocResult) -> *mut u8 {
    match result {
        Ok(address) => address.as_ptr(),
        Err(_) => {
            platform::set_errno_out_of_memory();
            ptr::null_mut()
        }
    }
}

/// Allocates `size` bytes. Null if the kernel refuses to give us memory.
/// See [`ZoneAllocator::allocate`].
pub fn allocate(size: usize) -> *mut u8 {
    into_raw(ALLOCATOR.allocate(size))
}

/// See [`ZoneAllocator::release`].
///
/// # Safety
///
/// `address` must be null or come from this module's functions.
pub unsafe fn release(address: *mut u8) {
    ALLOCATOR.release(address)
}

/// See [`ZoneAllocator::reallocate`]. Null on failure, in which case
/// `address` is still valid.
///
/// # Safety
///
/// Same as [`release`].
pub unsafe fn reallocate(address: *mut u8, new_size: usize) -> *mut u8 {
    into_raw(ALLOCATOR.reallocate(address, new_size))
}

/// Allocates `count * size` zeroed bytes. Null if the product overflows.
pub fn zeroed_allocate(count: usize, size: usize) -> *mut u8 {
    into_raw(ALLOCATOR.zeroed_allocate(count, size))
}

/// [`reallocate`] with overflow check on `count * size`.
///
/// # Safety
///
/// Same as [`release`].
pub unsafe fn reallocate_array(address: *mut u8, count: usize, size: usize) -> *mut u8 {
    into_raw(ALLOCATOR.reallocate_array(address, count, size))
}

/// Never returns null, aborts the process instead. See
/// [`ZoneAllocator::fail_fast_allocate`].
pub fn fail_fast_allocate(size: usize) -> *mut u8 {
    ALLOCATOR.fail_fast_allocate(size).as_ptr()
}

/// Prints every zone and block to standard output, and their contents if
/// `hexdump` is set.
pub fn report(hexdump: bool) {
    ALLOCATOR.report(hexdump)
}

/// Releases every block handed out so far. Zones are kept for reuse.
pub fn reset_all() {
    ALLOCATOR.reset_all()
}

/// Bytes that can be written at `address`, 0 if it's not a used block.
///
/// # Safety
///
/// Same as [`release`].
pub unsafe fn usable_size(address: *mut u8) -> usize {
    ALLOCATOR.usable_size(address).unwrap_or(0)
}

pub fn stats() -> HeapStats {
    ALLOCATOR.stats()
}

pub fn verify() -> Result<(), HeapError> {
    ALLOCATOR.verify()
}
