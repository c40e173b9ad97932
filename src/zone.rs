use std::{fmt, mem, ptr::NonNull};

use crate::{
    align::{page_align, MIN_ALIGN},
    block::{Block, BLOCK_HEADER_SIZE},
    config::Config,
    error::AllocError,
    header::Header,
    list::LinkedList,
    platform::{self, page_size},
};

/// Zone header size in bytes. See [`Header<T>`] and [`Zone`].
pub(crate) const ZONE_HEADER_SIZE: usize = mem::size_of::<Header<Zone>>();

const _: () = assert!(ZONE_HEADER_SIZE % MIN_ALIGN == 0);

/// Zone specific data. All headers are also linked lists nodes, see
/// [`Header<T>`] and [`Block`]. In this case, a complete zone header would be
/// [`Header<Zone>`], written at the very beginning of the mapping.
///
/// We request zones from the kernel with `mmap` (or whatever the platform
/// offers) and we cannot assume that they are adjacent, so we keep them in a
/// linked list. Each zone also contains a linked list of blocks. This is the
/// high level overview:
///
/// ```text
/// +------+------------------------+      +------+-------------------------------------+
/// |      | +-------+    +-------+ |      |      | +-------+    +-------+    +-------+ |
/// | Zone | | Block | -> | Block | | ---> | Zone | | Block | -> | Block | -> | Block | |
/// |      | +-------+    +-------+ |      |      | +-------+    +-------+    +-------+ |
/// +------+------------------------+      +------+-------------------------------------+
/// ```
///
/// Zones are never returned to the kernel while the allocator is in use. Free
/// space inside them is recycled through the block chain instead.
#[derive(Clone, Copy)]
pub(crate) struct Zone {
    /// Blocks contained within this zone, in address order.
    pub blocks: LinkedList<Block>,
    /// Length of the mapping, header included. Multiple of the page size.
    pub length: usize,
}

impl Header<Zone> {
    /// Returns a pointer to the first block in this zone.
    ///
    /// # Safety
    ///
    /// There is **ALWAYS** at least one block in the zone.
    #[inline]
    pub unsafe fn first_block(&self) -> NonNull<Header<Block>> {
        self.data.blocks.first().unwrap_unchecked()
    }

    /// First address of the mapping.
    #[inline]
    pub fn start(&self) -> usize {
        self as *const Self as usize
    }

    /// One past the last address of the mapping.
    #[inline]
    pub fn end(&self) -> usize {
        self.start() + self.data.length
    }

    /// Zone length including [`ZONE_HEADER_SIZE`].
    #[inline]
    pub fn total_size(&self) -> usize {
        self.data.length
    }

    /// Bytes available for blocks (headers included).
    #[inline]
    pub fn size(&self) -> usize {
        self.data.length - ZONE_HEADER_SIZE
    }

    /// Number of blocks in this zone.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.data.blocks.len()
    }

    /// Whether `address` could be the content address of some block of this
    /// zone. Doesn't say anything about block boundaries.
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.start() + ZONE_HEADER_SIZE + BLOCK_HEADER_SIZE && address < self.end()
    }
}

/// Size classes only decide how big a new zone is. Blocks don't store their
/// class, it can be computed from their size whenever somebody wants to know.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    Tiny,
    Small,
    Large,
}

impl SizeClass {
    /// Class of a request of `size` bytes.
    pub fn of(size: usize, config: &Config) -> Self {
        if size <= config.tiny_limit {
            SizeClass::Tiny
        } else if size <= config.small_limit {
            SizeClass::Small
        } else {
            SizeClass::Large
        }
    }

    /// Number of pages reserved up front by zones created for this class.
    /// Large zones don't reserve anything beyond what they need.
    fn preallocated_pages(self, config: &Config) -> usize {
        match self {
            SizeClass::Tiny => config.tiny_zone_pages,
            SizeClass::Small => config.small_zone_pages,
            SizeClass::Large => 0,
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `pad` so that width and alignment flags work in reports.
        f.pad(match self {
            SizeClass::Tiny => "TINY",
            SizeClass::Small => "SMALL",
            SizeClass::Large => "LARGE",
        })
    }
}

/// Calculates the length in bytes that we should call `mmap` with if we
/// want to safely store at least `size` bytes.
///
/// ```text
/// +-----------------+
/// | Zone header     | <---+
/// +-----------------+     |
/// | Block header    |     | Minimum length, rounded up to the page size.
/// +-----------------+     |
/// | Content         | <---+
/// +-----------------+
/// | Preallocation   | <- Only tiny and small zones. Becomes a free block.
/// +-----------------+
/// ```
///
/// Returns `None` if the length doesn't fit in a [`usize`].
///
/// # Arguments
///
/// * `size` - Amount of bytes that need to be allocated without including
/// any header. This value must be **already aligned**.
pub(crate) fn determine_zone_length(size: usize, config: &Config) -> Option<usize> {
    let required = page_align(
        size.checked_add(ZONE_HEADER_SIZE + BLOCK_HEADER_SIZE)?,
    )?;

    let preallocated = SizeClass::of(size, config)
        .preallocated_pages(config)
        .checked_mul(page_size())?;

    Some(required.max(preallocated))
}

/// Maps a new zone where at least `size` bytes can be allocated and puts it
/// at the head of `zones`. The zone starts with one single free block that
/// spans across the entire zone.
///
/// # Arguments
///
/// * `size` - The number of bytes (must be aligned to [`MIN_ALIGN`]) that
/// need to be allocated **without including any headers**.
pub(crate) unsafe fn create_zone(
    zones: &mut LinkedList<Zone>,
    size: usize,
    config: &Config,
) -> Result<NonNull<Header<Zone>>, AllocError> {
    let length = determine_zone_length(size, config).ok_or(AllocError::OutOfMemory { size })?;

    let Some(address) = platform::request_memory(length) else {
        return Err(AllocError::OutOfMemory { size });
    };

    let mut zone = zones.push_front(
        Zone {
            blocks: LinkedList::new(),
            length,
        },
        address,
    );

    let block_size = zone.as_ref().size() - BLOCK_HEADER_SIZE;
    let content = Header::content_address_of(zone);

    zone.as_mut().data.blocks.push_front(
        Block {
            size: block_size,
            used: false,
        },
        content,
    );

    Ok(zone)
}

/// Returns the mapping of `zone` back to the kernel. The zone must not be
/// used afterwards.
pub(crate) unsafe fn destroy_zone(zone: NonNull<Header<Zone>>) {
    let length = zone.as_ref().total_size();
    platform::return_memory(zone.cast(), length);
}
