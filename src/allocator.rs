use std::{
    alloc::{GlobalAlloc, Layout},
    backtrace::Backtrace,
    io::{self, Write},
    process,
    ptr::{self, NonNull},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    align::MIN_ALIGN,
    config::Config,
    error::{AllocError, HeapError},
    heap::{Heap, HeapStats},
    platform::RawStdout,
    report::write_report,
    AllocResult,
};

/// Alignment of [`ZERO_SIZE`]. Only its address matters.
#[repr(align(16))]
struct ZeroSized;

/// Address returned for zero sized requests. It's not null, so callers don't
/// mistake it for a failure, but it doesn't point to any block. Releasing it
/// does nothing and reallocating it is the same as allocating. Don't read or
/// write through it.
pub const ZERO_SIZE: NonNull<u8> = NonNull::<ZeroSized>::dangling().cast();

/// This struct exposes the public interface. It owns the [`Heap`] behind one
/// single [`Mutex`], so every operation is a critical section from start to
/// end: allocations, releases, reallocations and reports from different
/// threads are totally ordered and nobody ever sees a block halfway through
/// a split or a merge. Contents of allocated blocks are not protected, that's
/// up to the callers.
///
/// # Examples
///
/// ## Standalone allocator
///
/// ```rust
/// use zonalloc::ZoneAllocator;
///
/// let allocator = ZoneAllocator::with_default_config();
///
/// unsafe {
///     let address = allocator.allocate(128).unwrap();
///     address.as_ptr().write_bytes(7, 128);
///
///     let address = allocator.reallocate(address.as_ptr(), 256).unwrap();
///     assert_eq!(*address.as_ptr().add(127), 7);
///
///     allocator.release(address.as_ptr());
/// }
/// ```
///
/// ## Global allocator
///
/// ```no_run
/// use zonalloc::ZoneAllocator;
///
/// #[global_allocator]
/// static ALLOCATOR: ZoneAllocator = ZoneAllocator::with_default_config();
///
/// fn main() {
///     let num = Box::new(5);
///     assert_eq!(*num, 5);
/// }
/// ```
///
/// # Drop
///
/// Dropping an allocator returns all of its zones to the kernel. Statics are
/// never dropped, so the global instances keep their zones until the process
/// exits.
pub struct ZoneAllocator {
    heap: Mutex<Heap>,
}

impl ZoneAllocator {
    /// See [`Config::DEFAULT`].
    pub const fn with_default_config() -> Self {
        Self::with_config(Config::DEFAULT)
    }

    /// Builds a new allocator with the given zone creation policy. No memory
    /// is mapped until the first allocation.
    pub const fn with_config(config: Config) -> Self {
        Self {
            heap: Mutex::new(Heap::new(config)),
        }
    }

    /// Policy used when mapping new zones.
    pub fn config(&self) -> Config {
        self.inspect().config
    }

    /// Lock for operations that change the heap. A poisoned lock means some
    /// thread panicked in the middle of a split or a merge, so the heap can't
    /// be trusted anymore.
    fn lock(&self) -> Result<MutexGuard<'_, Heap>, AllocError> {
        self.heap.lock().map_err(|_| AllocError::Poisoned)
    }

    /// Lock for read only operations, which can still show whatever state a
    /// panicking thread left behind.
    fn inspect(&self) -> MutexGuard<'_, Heap> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns an address where `size` bytes can be written. Contents are not
    /// initialized. Zero sized requests get [`ZERO_SIZE`].
    pub fn allocate(&self, size: usize) -> AllocResult {
        if size == 0 {
            return Ok(ZERO_SIZE);
        }

        let mut heap = self.lock()?;
        let zones = heap.zones.len();
        let result = unsafe { heap.allocate(size) };
        let new_zone = heap.zones.len() > zones;
        drop(heap);

        match result {
            Ok(address) if new_zone => {
                log::debug!("mapped a new zone to allocate {} bytes at {:p}", size, address);
            }
            Ok(_) => {}
            Err(err) => log::warn!("allocate({}) failed: {}", size, err),
        }

        result
    }

    /// Releases the block at `address`. Null and [`ZERO_SIZE`] are ignored.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by this allocator and not released
    /// since. Double releases and unknown addresses are ignored on a best
    /// effort basis, but that's not something to rely on.
    pub unsafe fn release(&self, address: *mut u8) {
        let Some(address) = NonNull::new(address) else {
            return;
        };

        if address == ZERO_SIZE {
            return;
        }

        let Ok(mut heap) = self.lock() else {
            return;
        };
        let released = heap.release(address);
        drop(heap);

        if !released {
            log::warn!("release({:p}) ignored, not a used block", address);
        }
    }

    /// Resizes the block at `address` so that it can hold `new_size` bytes.
    /// The first `min(old size, new_size)` bytes are preserved. The returned
    /// address might be different from `address`, in which case `address` is
    /// released.
    ///
    /// - Null or [`ZERO_SIZE`] behave like [`Self::allocate`].
    /// - `new_size == 0` returns `address` unchanged, the block is **not**
    /// released.
    /// - On failure the original block is left untouched and still has to be
    /// released by the caller.
    ///
    /// # Safety
    ///
    /// Same as [`Self::release`].
    pub unsafe fn reallocate(&self, address: *mut u8, new_size: usize) -> AllocResult {
        let address = match NonNull::new(address) {
            Some(address) if address != ZERO_SIZE => address,
            _ => return self.allocate(new_size),
        };

        if new_size == 0 {
            return Ok(address);
        }

        let mut heap = self.lock()?;
        let result = heap.reallocate(address, new_size);
        drop(heap);

        match result {
            Ok(realloc) => {
                log::trace!(
                    "reallocate({:p}, {}) -> {:p} ({:?})",
                    address,
                    new_size,
                    realloc.address,
                    realloc.method
                );
                Ok(realloc.address)
            }
            Err(err) => {
                log::warn!("reallocate({:p}, {}) failed: {}", address, new_size, err);
                Err(err)
            }
        }
    }

    /// Allocates `count * size` bytes set to zero. Fails with
    /// [`AllocError::Overflow`] before allocating anything if the product
    /// doesn't fit in a [`usize`].
    pub fn zeroed_allocate(&self, count: usize, size: usize) -> AllocResult {
        let total = checked_total(count, size)?;
        let address = self.allocate(total)?;

        if total > 0 {
            unsafe { address.as_ptr().write_bytes(0, total) };
        }

        Ok(address)
    }

    /// [`Self::reallocate`] to `count * size` bytes, with the same overflow
    /// check as [`Self::zeroed_allocate`].
    ///
    /// # Safety
    ///
    /// Same as [`Self::release`].
    pub unsafe fn reallocate_array(
        &self,
        address: *mut u8,
        count: usize,
        size: usize,
    ) -> AllocResult {
        self.reallocate(address, checked_total(count, size)?)
    }

    /// Same as [`Self::allocate`] but running out of memory is not an option:
    /// every zone is returned to the kernel, a diagnostic with a backtrace is
    /// written to stderr and the process aborts.
    pub fn fail_fast_allocate(&self, size: usize) -> NonNull<u8> {
        match self.allocate(size) {
            Ok(address) => address,
            Err(err) => self.abort_on_exhaustion(size, err),
        }
    }

    #[cold]
    fn abort_on_exhaustion(&self, size: usize, err: AllocError) -> ! {
        // Pointers handed out so far dangle after this, but nobody is going to
        // use them anyway.
        if let Ok(mut heap) = self.lock() {
            unsafe { heap.unmap_all() };
        }

        log::error!("fail_fast_allocate({}) failed: {}, aborting", size, err);

        let backtrace = Backtrace::force_capture();
        eprintln!("zonalloc: cannot allocate {} bytes: {}\nBacktrace:\n{}", size, err, backtrace);

        process::abort()
    }

    /// Writes the same report as [`Self::report_to`] to standard output,
    /// without allocating.
    pub fn report(&self, hexdump: bool) {
        // Nothing useful to do if stdout is closed.
        let _ = self.report_to(&mut RawStdout, hexdump);
    }

    /// Writes a consistent snapshot of every zone and block to `out`. Zones
    /// are sorted by address, the report ends with the total of bytes in use.
    /// With `hexdump` the content of used blocks is included.
    ///
    /// The lock is held while writing, so `out` must not allocate through
    /// this same allocator.
    pub fn report_to<W: Write>(&self, out: &mut W, hexdump: bool) -> io::Result<()> {
        let heap = self.inspect();
        write_report(&heap, out, hexdump)
    }

    /// Releases every used block. Zones stay mapped and fully reusable.
    pub fn reset_all(&self) {
        if let Ok(mut heap) = self.lock() {
            unsafe { heap.release_all() };
        }
    }

    /// Number of bytes that can be written at `address`, which is at least
    /// the size that was requested. `None` if `address` is not a used block.
    ///
    /// # Safety
    ///
    /// Nothing is dereferenced unless `address` is the content address of a
    /// block, but the answer is only meaningful for addresses returned by this
    /// allocator.
    pub unsafe fn usable_size(&self, address: *mut u8) -> Option<usize> {
        let address = NonNull::new(address)?;
        self.inspect().usable_size(address)
    }

    /// Counters of zones, blocks and bytes in use.
    pub fn stats(&self) -> HeapStats {
        self.inspect().stats()
    }

    /// Checks every zone invariant: blocks tile their zone with no gaps and
    /// no two neighbouring blocks are free.
    pub fn verify(&self) -> Result<(), HeapError> {
        self.inspect().verify()
    }
}

impl Default for ZoneAllocator {
    fn default() -> Self {
        ZoneAllocator::with_default_config()
    }
}

fn checked_total(count: usize, size: usize) -> Result<usize, AllocError> {
    count.checked_mul(size).ok_or_else(|| {
        let err = AllocError::Overflow { count, size };
        log::warn!("{}", err);
        err
    })
}

/// Payloads are aligned to [`MIN_ALIGN`], bigger alignments are refused with
/// null. Nothing in here logs, a logger that allocates would end up right
/// back here.
unsafe impl GlobalAlloc for ZoneAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MIN_ALIGN {
            return ptr::null_mut();
        }

        match self.lock() {
            Ok(mut heap) => heap
                .allocate(layout.size())
                .map_or(ptr::null_mut(), NonNull::as_ptr),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, address: *mut u8, _layout: Layout) {
        if let (Some(address), Ok(mut heap)) = (NonNull::new(address), self.lock()) {
            heap.release(address);
        }
    }

    unsafe fn realloc(&self, address: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(address) = NonNull::new(address) else {
            return ptr::null_mut();
        };

        if layout.align() > MIN_ALIGN {
            return ptr::null_mut();
        }

        match self.lock() {
            Ok(mut heap) => heap
                .reallocate(address, new_size)
                .map_or(ptr::null_mut(), |realloc| realloc.address.as_ptr()),
            Err(_) => ptr::null_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync,
        thread::{self, ThreadId},
    };

    use proptest::prelude::*;

    use super::*;
    use crate::platform::page_size;

    unsafe fn fill(address: NonNull<u8>, size: usize, seed: usize) {
        for i in 0..size {
            *address.as_ptr().add(i) = ((i + seed) % 256) as u8;
        }
    }

    unsafe fn check(address: NonNull<u8>, size: usize, seed: usize) {
        for i in 0..size {
            assert_eq!(*address.as_ptr().add(i), ((i + seed) % 256) as u8);
        }
    }

    #[test]
    fn allocate_write_read_release() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let sizes = [1, 8, 100, 128, 129, 1000, 1024, 1025, page_size() * 3];
            let addresses: Vec<_> = sizes
                .iter()
                .map(|&size| {
                    let address = allocator.allocate(size).unwrap();
                    fill(address, size, size);
                    address
                })
                .collect();

            for (address, &size) in addresses.iter().zip(&sizes) {
                assert_eq!(address.as_ptr() as usize % MIN_ALIGN, 0);
                assert!(allocator.usable_size(address.as_ptr()).unwrap() >= size);
                check(*address, size, size);
            }

            for address in addresses {
                allocator.release(address.as_ptr());
            }

            allocator.verify().unwrap();
            assert_eq!(allocator.stats().used_bytes, 0);
        }
    }

    #[test]
    fn zero_size_sentinel() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let zero = allocator.allocate(0).unwrap();
            assert_eq!(zero, ZERO_SIZE);
            assert_eq!(allocator.stats().zones, 0);

            // Releasing it twice is fine, so is releasing null.
            allocator.release(zero.as_ptr());
            allocator.release(zero.as_ptr());
            allocator.release(ptr::null_mut());

            // Reallocating it is a fresh allocation.
            let address = allocator.reallocate(zero.as_ptr(), 64).unwrap();
            assert_ne!(address, ZERO_SIZE);
            assert_eq!(allocator.usable_size(address.as_ptr()), Some(64));

            assert_eq!(allocator.reallocate(zero.as_ptr(), 0), Ok(ZERO_SIZE));
            assert_eq!(allocator.usable_size(zero.as_ptr()), None);

            let from_null = allocator.reallocate(ptr::null_mut(), 32).unwrap();
            assert_eq!(allocator.usable_size(from_null.as_ptr()), Some(32));
        }
    }

    #[test]
    fn reallocate_round_trip() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let address = allocator.allocate(100).unwrap();
            fill(address, 100, 3);

            let grown = allocator.reallocate(address.as_ptr(), 200).unwrap();
            check(grown, 100, 3);

            let shrunk = allocator.reallocate(grown.as_ptr(), 50).unwrap();
            check(shrunk, 50, 3);

            allocator.release(shrunk.as_ptr());
            allocator.verify().unwrap();
        }
    }

    #[test]
    fn reallocate_to_zero_keeps_the_block() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let address = allocator.allocate(64).unwrap();
            fill(address, 64, 9);

            let same = allocator.reallocate(address.as_ptr(), 0).unwrap();
            assert_eq!(same, address);
            assert_eq!(allocator.stats().used_blocks, 1);
            check(address, 64, 9);

            // Caller still has to release it.
            allocator.release(address.as_ptr());
            assert_eq!(allocator.stats().used_blocks, 0);
        }
    }

    #[test]
    fn grow_in_place_keeps_the_address() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let a = allocator.allocate(64).unwrap();
            let b = allocator.allocate(64).unwrap();
            let _c = allocator.allocate(64).unwrap();
            fill(a, 64, 1);

            allocator.release(b.as_ptr());

            let grown = allocator.reallocate(a.as_ptr(), 150).unwrap();
            assert_eq!(grown, a);
            check(a, 64, 1);
            allocator.verify().unwrap();
        }
    }

    #[test]
    fn failed_reallocation_keeps_the_original() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let address = allocator.allocate(32).unwrap();
            let _blocker = allocator.allocate(32).unwrap();
            fill(address, 32, 5);

            assert!(allocator.reallocate(address.as_ptr(), usize::MAX / 2).is_err());
            check(address, 32, 5);
            assert_eq!(allocator.usable_size(address.as_ptr()), Some(32));
        }
    }

    #[test]
    fn zeroed_allocation() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            // Dirty a block first so that the zeroed one recycles it.
            let dirty = allocator.allocate(256).unwrap();
            dirty.as_ptr().write_bytes(0xFF, 256);
            allocator.release(dirty.as_ptr());

            let zeroed = allocator.zeroed_allocate(32, 8).unwrap();
            assert_eq!(zeroed, dirty);
            for i in 0..256 {
                assert_eq!(*zeroed.as_ptr().add(i), 0);
            }

            assert_eq!(allocator.zeroed_allocate(0, 8), Ok(ZERO_SIZE));
        }
    }

    #[test]
    fn overflow_is_detected_before_allocating() {
        let allocator = ZoneAllocator::with_default_config();

        assert_eq!(
            allocator.zeroed_allocate(usize::MAX, 2),
            Err(AllocError::Overflow {
                count: usize::MAX,
                size: 2
            })
        );
        assert!(allocator.zeroed_allocate(usize::MAX / 2 + 1, 2).is_err());
        assert_eq!(allocator.stats().zones, 0);

        unsafe {
            let address = allocator.allocate(16).unwrap();
            assert!(matches!(
                allocator.reallocate_array(address.as_ptr(), 3, usize::MAX),
                Err(AllocError::Overflow { .. })
            ));
            assert_eq!(allocator.usable_size(address.as_ptr()), Some(16));

            let grown = allocator.reallocate_array(address.as_ptr(), 10, 10).unwrap();
            assert!(allocator.usable_size(grown.as_ptr()).unwrap() >= 100);
        }
    }

    #[test]
    fn double_release_doesnt_corrupt_other_blocks() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let a = allocator.allocate(40).unwrap();
            let b = allocator.allocate(40).unwrap();
            let c = allocator.allocate(40).unwrap();
            fill(b, 40, 11);
            fill(c, 40, 12);

            allocator.release(a.as_ptr());
            allocator.release(a.as_ptr());

            // `a` is reused, releasing the old pointer again must not touch
            // the new owner.
            let d = allocator.allocate(40).unwrap();
            assert_eq!(d, a);
            fill(d, 40, 13);

            allocator.release(b.as_ptr());
            allocator.release(b.as_ptr());

            check(c, 40, 12);
            check(d, 40, 13);
            allocator.verify().unwrap();
            assert_eq!(allocator.stats().used_blocks, 2);
        }
    }

    #[test]
    fn coalescing_avoids_new_zones() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let blocks: Vec<_> = (0..3).map(|_| allocator.allocate(96).unwrap()).collect();
            let zones = allocator.stats().zones;

            for index in [1, 0, 2] {
                allocator.release(blocks[index].as_ptr());
            }

            let merged = allocator.allocate(96 * 3).unwrap();
            assert_eq!(merged, blocks[0]);
            assert_eq!(allocator.stats().zones, zones);
        }
    }

    #[test]
    fn size_classes_decide_zone_length() {
        let config = Config {
            tiny_limit: 64,
            small_limit: 512,
            tiny_zone_pages: 2,
            small_zone_pages: 8,
        };
        let allocator = ZoneAllocator::with_config(config);
        assert_eq!(allocator.config(), config);

        let page = page_size();

        allocator.allocate(64).unwrap();
        assert_eq!(allocator.stats().mapped_bytes, 2 * page);

        // Doesn't fit in the tiny zone.
        allocator.allocate(2 * page).unwrap();
        assert_eq!(allocator.stats().mapped_bytes, 2 * page + 3 * page);

        // Classes don't restrict reuse, a small request still fits in the
        // free space left in the tiny zone.
        allocator.allocate(512).unwrap();
        assert_eq!(allocator.stats().mapped_bytes, 2 * page + 3 * page);

        allocator.verify().unwrap();
    }

    #[test]
    fn reset_all_releases_everything() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            for size in [10, 300, 5000, 70_000, 20] {
                allocator.allocate(size).unwrap();
            }
            let zones = allocator.stats().zones;

            allocator.reset_all();

            let stats = allocator.stats();
            assert_eq!(stats.used_blocks, 0);
            assert_eq!(stats.used_bytes, 0);
            assert_eq!(stats.zones, zones);
            assert_eq!(stats.blocks, zones);
            allocator.verify().unwrap();

            let mut report = Vec::new();
            allocator.report_to(&mut report, true).unwrap();
            assert!(String::from_utf8(report).unwrap().ends_with("Total : 0 bytes\n"));

            let address = allocator.allocate(5000).unwrap();
            assert_eq!(allocator.stats().zones, zones);
            allocator.release(address.as_ptr());
        }
    }

    #[test]
    fn report_lists_used_blocks() {
        let allocator = ZoneAllocator::with_default_config();

        let address = allocator.allocate(48).unwrap();
        unsafe { address.as_ptr().write_bytes(0x5A, 48) };

        let mut out = Vec::new();
        allocator.report_to(&mut out, true).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("ZONE "));
        assert!(text.contains(&format!("{:#x} : 48 bytes : used", address.as_ptr() as usize)));
        assert!(text.contains(&" 5a".repeat(16)));
        assert!(text.ends_with("Total : 48 bytes\n"));
    }

    /// Set in the child process spawned by
    /// `fail_fast_aborts_with_a_backtrace`.
    const FAIL_FAST_CHILD: &str = "ZONALLOC_FAIL_FAST_CHILD";

    /// Aborting takes the whole process down, so the test binary runs itself
    /// again filtered to this one test and the child is the one that dies.
    #[test]
    #[cfg_attr(miri, ignore)]
    fn fail_fast_aborts_with_a_backtrace() {
        let size = usize::MAX / 2;

        if std::env::var_os(FAIL_FAST_CHILD).is_some() {
            let allocator = ZoneAllocator::with_default_config();
            allocator.allocate(64).unwrap();
            allocator.fail_fast_allocate(size);
            unreachable!("fail_fast_allocate returned after exhaustion");
        }

        let output = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "allocator::tests::fail_fast_aborts_with_a_backtrace",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(FAIL_FAST_CHILD, "1")
            .output()
            .unwrap();

        let stderr = String::from_utf8_lossy(&output.stderr);

        assert!(!output.status.success());
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            assert_eq!(output.status.signal(), Some(libc::SIGABRT));
        }
        assert!(stderr.contains(&format!("cannot allocate {size} bytes")));
        assert!(stderr.contains(&AllocError::OutOfMemory { size }.to_string()));
        assert!(stderr.contains("Backtrace"));
        assert!(!stderr.contains("returned after exhaustion"));
    }

    #[test]
    fn global_alloc_interface() {
        let allocator = ZoneAllocator::with_default_config();

        unsafe {
            let layout = Layout::from_size_align(24, 16).unwrap();
            let address = allocator.alloc(layout);
            assert!(!address.is_null());
            assert_eq!(address as usize % 16, 0);
            address.write_bytes(1, 24);

            let zeroed = allocator.alloc_zeroed(Layout::array::<u64>(8).unwrap());
            for i in 0..64 {
                assert_eq!(*zeroed.add(i), 0);
            }

            let grown = allocator.realloc(address, layout, 4096);
            assert!(!grown.is_null());
            assert_eq!(*grown.add(23), 1);

            // Page alignment is not supported.
            assert!(allocator.alloc(Layout::from_size_align(64, 4096).unwrap()).is_null());

            allocator.dealloc(grown, Layout::from_size_align(4096, 16).unwrap());
            allocator.dealloc(zeroed, Layout::array::<u64>(8).unwrap());
            assert_eq!(allocator.stats().used_blocks, 0);
        }
    }

    /// We'll make all the threads do only allocs at the same time, then wait
    /// and do only deallocs at the same time.
    #[test]
    fn multiple_threads_synchronized_allocs_and_deallocs() {
        let allocator = ZoneAllocator::with_default_config();

        let num_threads = 8;

        let barrier = sync::Barrier::new(num_threads);

        thread::scope(|scope| {
            for _ in 0..num_threads {
                scope.spawn(|| unsafe {
                    let num_elements = 1024;
                    let size = num_elements * std::mem::size_of::<ThreadId>();
                    let addr = allocator.allocate(size).unwrap().cast::<ThreadId>();
                    let id = thread::current().id();

                    for i in 0..num_elements {
                        addr.as_ptr().add(i).write(id);
                    }

                    barrier.wait();

                    // Check memory corruption.
                    for i in 0..num_elements {
                        assert_eq!(*addr.as_ptr().add(i), id);
                    }

                    allocator.release(addr.as_ptr().cast());
                });
            }
        });

        allocator.verify().unwrap();
        assert_eq!(allocator.stats().used_blocks, 0);
    }

    /// Random allocs, reallocs and releases from many threads at once. Each
    /// thread keeps some of its blocks alive at the end, the heap must account
    /// for exactly those.
    #[test]
    fn multiple_threads_random_operations() {
        let allocator = ZoneAllocator::with_default_config();

        let num_threads = 8;
        let num_operations = if cfg!(miri) { 50 } else { 2000 };

        let barrier = sync::Barrier::new(num_threads);

        let survivors: Vec<Vec<(usize, usize)>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..num_threads)
                .map(|index| {
                    let allocator = &allocator;
                    let barrier = &barrier;
                    scope.spawn(move || unsafe {
                        // xorshift, seeded per thread.
                        let mut state = 0x9E37_79B9_7F4A_7C15u64 ^ (index as u64 + 1);
                        let mut next = move || {
                            state ^= state << 13;
                            state ^= state >> 7;
                            state ^= state << 17;
                            state as usize
                        };

                        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();
                        barrier.wait();

                        for _ in 0..num_operations {
                            match next() % 3 {
                                0 if !live.is_empty() => {
                                    let (address, size) = live.swap_remove(next() % live.len());
                                    check(address, size, index);
                                    allocator.release(address.as_ptr());
                                }
                                1 if !live.is_empty() => {
                                    let slot = next() % live.len();
                                    let (address, size) = live[slot];
                                    let new_size = next() % 16000 + 1;
                                    let new_address =
                                        allocator.reallocate(address.as_ptr(), new_size).unwrap();
                                    check(new_address, size.min(new_size), index);
                                    fill(new_address, new_size, index);
                                    live[slot] = (new_address, new_size);
                                }
                                _ => {
                                    let size = next() % 16000 + 1;
                                    let address = allocator.allocate(size).unwrap();
                                    fill(address, size, index);
                                    live.push((address, size));
                                }
                            }
                        }

                        for &(address, size) in &live {
                            check(address, size, index);
                        }

                        live.into_iter()
                            .map(|(address, size)| (address.as_ptr() as usize, size))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        allocator.verify().unwrap();

        let stats = allocator.stats();
        let live: Vec<_> = survivors.into_iter().flatten().collect();
        assert_eq!(stats.used_blocks, live.len());

        let expected: usize = live
            .iter()
            .map(|&(address, size)| {
                let usable = unsafe { allocator.usable_size(address as *mut u8) }.unwrap();
                assert!(usable >= size);
                usable
            })
            .sum();
        assert_eq!(stats.used_bytes, expected);

        allocator.reset_all();
        assert_eq!(allocator.stats().used_blocks, 0);
        allocator.verify().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Operation {
        Allocate(usize),
        Release(usize),
        Reallocate(usize, usize),
    }

    fn operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            (1..5000usize).prop_map(Operation::Allocate),
            any::<usize>().prop_map(Operation::Release),
            (any::<usize>(), 0..5000usize).prop_map(|(i, size)| Operation::Reallocate(i, size)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn random_sequences_keep_the_heap_consistent(
            operations in prop::collection::vec(operation(), 1..200)
        ) {
            let allocator = ZoneAllocator::with_config(Config {
                tiny_zone_pages: 1,
                small_zone_pages: 2,
                ..Config::DEFAULT
            });
            let mut live: Vec<(NonNull<u8>, usize, usize)> = Vec::new();

            unsafe {
                for (seed, operation) in operations.into_iter().enumerate() {
                    match operation {
                        Operation::Allocate(size) => {
                            let address = allocator.allocate(size).unwrap();
                            fill(address, size, seed);
                            live.push((address, size, seed));
                        }
                        Operation::Release(i) if !live.is_empty() => {
                            let (address, size, fill_seed) = live.swap_remove(i % live.len());
                            check(address, size, fill_seed);
                            allocator.release(address.as_ptr());
                        }
                        Operation::Reallocate(i, new_size) if !live.is_empty() => {
                            let index = i % live.len();
                            let (address, size, fill_seed) = live[index];
                            let new_address = allocator.reallocate(address.as_ptr(), new_size).unwrap();
                            check(new_address, size.min(new_size), fill_seed);
                            if new_size == 0 {
                                prop_assert_eq!(new_address, address);
                            } else {
                                fill(new_address, new_size, seed);
                                live[index] = (new_address, new_size, seed);
                            }
                        }
                        _ => {}
                    }

                    prop_assert_eq!(allocator.verify(), Ok(()));
                }

                let stats = allocator.stats();
                prop_assert_eq!(stats.used_blocks, live.len());
                for (address, size, fill_seed) in live {
                    check(address, size, fill_seed);
                }
            }
        }
    }
}
