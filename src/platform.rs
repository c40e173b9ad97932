use std::{
    io,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::Pointer;

/// Abstraction for platform specific memory handling. The allocator only needs
/// to request pages of memory and return them back when they are no longer in
/// use, but it doesn't care about the APIs offered by the underlying kernel or
/// libraries.
trait PlatformSpecificMemory {
    /// Requests a memory region from the kernel where `length` bytes can be
    /// written safely.
    unsafe fn request_memory(length: usize) -> Pointer<u8>;

    /// Attempts to return `length` bytes starting from `address` to the
    /// underlying kernel. Zones are always returned as a whole, so `length`
    /// equals the length the zone was mapped with.
    unsafe fn return_memory(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
pub(crate) struct Platform;

/// Virtual memory page size. 4096 bytes on most computers. Zero means we
/// didn't ask the kernel yet.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// We only know the value of the page size at runtime by calling into C
/// libraries, so we'll cache it the first time somebody needs it. Racing
/// threads all store the same value.
#[inline]
pub(crate) fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Platform::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Convenience wrapper for [`PlatformSpecificMemory::request_memory`].
#[inline]
pub(crate) unsafe fn request_memory(length: usize) -> Pointer<u8> {
    Platform::request_memory(length)
}

/// Convenience wrapper for [`PlatformSpecificMemory::return_memory`].
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    Platform::return_memory(address, length)
}

/// Unbuffered standard output. Reports are written while the allocator lock
/// is held, so going through [`std::io::Stdout`] is not an option when this
/// crate is the global allocator: its buffer is allocated lazily and that
/// allocation would try to take the same lock.
pub(crate) struct RawStdout;

#[cfg(all(unix, not(miri)))]
impl io::Write for RawStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = unsafe { libc::write(libc::STDOUT_FILENO, buf.as_ptr().cast(), buf.len()) };
        if written < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(written as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(not(all(unix, not(miri))))]
impl io::Write for RawStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut io::stdout(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut io::stdout())
    }
}

/// Sets the thread local `errno` to `ENOMEM`. That's how C callers learn why
/// `calloc` or `reallocarray` returned null.
pub(crate) fn set_errno_out_of_memory() {
    #[cfg(all(any(target_os = "linux", target_os = "android"), not(miri)))]
    unsafe {
        *libc::__errno_location() = libc::ENOMEM;
    }

    #[cfg(all(
        any(target_os = "macos", target_os = "ios", target_os = "freebsd"),
        not(miri)
    ))]
    unsafe {
        *libc::__error() = libc::ENOMEM;
    }
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use libc;

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any file.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => Some(NonNull::new_unchecked(address).cast()),
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                // The zone is still mapped. Nothing references it anymore so
                // it just stays there until the process exits.
            }
        }

        unsafe fn page_size() -> usize {
            libc::sysconf(libc::_SC_PAGE_SIZE) as usize
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Similar to mmap on Linux, Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            // Memory has to be reserved first and then committed in order to
            // become usable. We can do both at the same time with one single
            // call.
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            // For more detailed explanations of each parameter, see
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualalloc#parameters
            let address = Memory::VirtualAlloc(None, length, flags, protection);

            NonNull::new(address.cast())
        }

        unsafe fn return_memory(address: NonNull<u8>, _length: usize) {
            // Length must be 0 when releasing with MEM_RELEASE, the whole
            // reservation goes away. See
            // https://learn.microsoft.com/en-us/windows/win32/api/memoryapi/nf-memoryapi-virtualfree#parameters
            let address = address.cast().as_ptr();
            let length = 0;
            let flags = Memory::MEM_RELEASE;

            if !Memory::VirtualFree(address, length, flags).as_bool() {
                // Same as munmap failing on unix, the zone stays reserved.
            }
        }

        unsafe fn page_size() -> usize {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

#[cfg(miri)]
mod miri {
    //! When using Miri, we can't rely on system calls such as `mmap` because
    //! there's no FFI support, so instead we'll use the global allocator to
    //! mock low level memory management. This is also useful for detecting
    //! zones that are never returned back to the kernel.

    use std::{alloc, ptr::NonNull};

    use super::{page_size, Platform, PlatformSpecificMemory};
    use crate::Pointer;

    fn to_layout(length: usize) -> Option<alloc::Layout> {
        alloc::Layout::from_size_align(length, page_size()).ok()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc(to_layout(length)?))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if let Some(layout) = to_layout(length) {
                alloc::dealloc(address.as_ptr(), layout);
            }
        }

        unsafe fn page_size() -> usize {
            4096
        }
    }
}
