use thiserror::Error;

/// Why an allocation request couldn't be served. None of these are fatal:
/// callers get them back as values (or as null pointers through the C-like
/// surface) and decide what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The kernel refused to map enough memory, or the request is so big that
    /// the zone length doesn't even fit in a `usize`.
    #[error("out of memory while allocating {size} bytes")]
    OutOfMemory { size: usize },

    /// `count * size` doesn't fit in a `usize`. Detected before allocating
    /// anything.
    #[error("{count} elements of {size} bytes overflow usize")]
    Overflow { count: usize, size: usize },

    /// The address is not the content address of a used block.
    #[error("{address:#x} was not allocated by this allocator")]
    UnknownPointer { address: usize },

    /// A thread panicked while holding the allocator lock.
    #[error("allocator lock is poisoned")]
    Poisoned,
}

/// Structural problems found by [`crate::ZoneAllocator::verify`]. Addresses
/// are block or zone header addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// Blocks of the zone don't add up to the zone size.
    #[error("blocks of zone {zone:#x} cover {covered} bytes out of {expected}")]
    ZoneCoverage {
        zone: usize,
        covered: usize,
        expected: usize,
    },

    /// A block doesn't start where the previous one ends, or lies outside of
    /// its zone.
    #[error("block {block:#x} is not where the previous block ends")]
    Discontiguous { block: usize },

    /// Two neighbouring blocks are both free, coalescing missed them.
    #[error("blocks {block:#x} and {next:#x} are both free")]
    AdjacentFree { block: usize, next: usize },

    /// The block count of a zone doesn't match its chain.
    #[error("zone {zone:#x} claims {expected} blocks but chains {found}")]
    BlockCount {
        zone: usize,
        expected: usize,
        found: usize,
    },
}
