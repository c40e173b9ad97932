use std::ptr::NonNull;

use crate::{
    align::align,
    block::{merge_next_block, split_block_if_possible, Block, MIN_BLOCK_SIZE},
    config::Config,
    error::{AllocError, HeapError},
    header::Header,
    list::LinkedList,
    zone::{create_zone, destroy_zone, Zone, ZONE_HEADER_SIZE},
    AllocResult, Pointer,
};

/// All the state of one allocator: the zones we've mapped and the policy used
/// to map new ones. Every zone contains a chain of blocks:
///
/// ```text
///           +------+------------------------+      +------+-------------------------------------+
///           |      | +-------+    +-------+ |      |      | +-------+    +-------+    +-------+ |
/// zones ->  | Zone | | Used  | -> | Free  | | ---> | Zone | | Free  | -> | Used  | -> | Used  | |
///           |      | +-------+    +-------+ |      |      | +-------+    +-------+    +-------+ |
///           +------+------------------------+      +------+-------------------------------------+
/// ```
///
/// This struct is not thread safe and needs mutable borrows to operate, so
/// it's wrapped in a [`std::sync::Mutex`] by [`crate::ZoneAllocator`].
///
/// # Drop
///
/// Dropping the heap returns every zone to the kernel, so any pointer that
/// is still alive becomes dangling.
pub(crate) struct Heap {
    /// Zones in creation order, newest first.
    pub zones: LinkedList<Zone>,
    /// Zone creation policy.
    pub config: Config,
}

// Raw pointers are not `Send`, but the heap owns every zone it points to and
// it's only ever accessed behind a lock.
unsafe impl Send for Heap {}

/// Where a block lives. We need the zone to update its block chain and the
/// previous block to merge with it, since chains are singly linked.
#[derive(Clone, Copy)]
pub(crate) struct Location {
    pub zone: NonNull<Header<Zone>>,
    pub previous: Pointer<Header<Block>>,
    pub block: NonNull<Header<Block>>,
}

/// Snapshot of the heap. See [`crate::ZoneAllocator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of zones currently mapped.
    pub zones: usize,
    /// Sum of the lengths of all zones.
    pub mapped_bytes: usize,
    /// Number of blocks, free or not.
    pub blocks: usize,
    /// Number of blocks owned by users.
    pub used_blocks: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Sum of the sizes of all used blocks, headers excluded.
    pub used_bytes: usize,
}

impl Heap {
    pub const fn new(config: Config) -> Self {
        Self {
            zones: LinkedList::new(),
            config,
        }
    }

    /// Allocates a block that can fit at least `size` bytes. The size is
    /// rounded up to [`crate::align::MIN_ALIGN`] first, so the block might be
    /// slightly bigger than requested. Content is not initialized.
    pub unsafe fn allocate(&mut self, size: usize) -> AllocResult {
        let requested = size;
        let size = align(size)
            .ok_or(AllocError::OutOfMemory { size: requested })?
            .max(MIN_BLOCK_SIZE);

        let (mut zone, mut block) = match self.find_free_block(size) {
            Some(found) => found,
            None => {
                // Errors carry what the caller asked for, not the rounded size.
                let zone = create_zone(&mut self.zones, size, &self.config)
                    .map_err(|_| AllocError::OutOfMemory { size: requested })?;
                (zone, zone.as_ref().first_block())
            }
        };

        split_block_if_possible(&mut zone.as_mut().data.blocks, block, size);
        block.as_mut().data.used = true;

        Ok(Header::content_address_of(block))
    }

    /// First fit search. Zones are scanned in list order and blocks in
    /// address order, the first free block that can hold `size` bytes wins.
    unsafe fn find_free_block(
        &self,
        size: usize,
    ) -> Option<(NonNull<Header<Zone>>, NonNull<Header<Block>>)> {
        for zone in self.zones.iter() {
            for block in zone.as_ref().data.blocks.iter() {
                if block.as_ref().is_free() && block.as_ref().size() >= size {
                    return Some((zone, block));
                }
            }
        }

        None
    }

    /// Finds the block whose content starts exactly at `address`. Returns
    /// `None` if `address` is outside of every zone or doesn't land on a
    /// block boundary. The block might be free.
    pub unsafe fn locate(&self, address: NonNull<u8>) -> Option<Location> {
        let zone = self
            .zones
            .iter()
            .find(|zone| zone.as_ref().contains(address.as_ptr() as usize))?;

        // Only a candidate, nothing guarantees that there's a header there.
        let candidate = Header::<Block>::from_content_address(address);

        let mut previous = None;

        for block in zone.as_ref().data.blocks.iter() {
            if block == candidate {
                return Some(Location {
                    zone,
                    previous,
                    block,
                });
            }

            // Blocks are sorted by address, no point in looking further.
            if block > candidate {
                break;
            }

            previous = Some(block);
        }

        None
    }

    /// Releases the used block at `address`. Returns `false` and does nothing
    /// if `address` is not the content address of a used block, which covers
    /// double frees and pointers that we've never handed out.
    pub unsafe fn release(&mut self, address: NonNull<u8>) -> bool {
        match self.locate(address) {
            Some(location) if !location.block.as_ref().is_free() => {
                self.free_block(location);
                true
            }
            _ => false,
        }
    }

    /// Marks the block as free and merges it with its neighbours if they are
    /// free too. Returns the block that contains the released space after
    /// merging.
    ///
    /// **Before**:
    ///
    /// ```text
    ///                         +-->  +-----------+
    ///                         |     |   Header  | <- H bytes.
    /// Block A, Free           |     +-----------+
    ///                         |     |  Content  | <- A bytes.
    ///                         +-->  +-----------+
    ///                         |     |   Header  | <- H bytes.
    /// Block B, Recently freed |     +-----------+
    ///                         |     |  Content  | <- B bytes.
    ///                         +-->  +-----------+
    ///                         |     |   Header  | <- H bytes.
    /// Block C, Free           |     +-----------+
    ///                         |     |  Content  | <- C bytes.
    ///                         +-->  +-----------+
    /// ```
    ///
    /// **After**:
    ///
    /// ```text
    ///                         +-->  +-----------+
    ///                         |     |   Header  | <- H bytes.
    /// Block D, Bigger block   |     +-----------+
    ///                         |     |  Content  | <- A + B + C + 2H bytes.
    ///                         +-->  +-----------+
    /// ```
    ///
    /// Every release leaves no two adjacent free blocks behind, so looking at
    /// the direct neighbours is enough.
    unsafe fn free_block(&mut self, location: Location) -> NonNull<Header<Block>> {
        let Location {
            mut zone,
            previous,
            mut block,
        } = location;
        let blocks = &mut zone.as_mut().data.blocks;

        block.as_mut().data.used = false;

        if let Some(previous) = previous.filter(|previous| previous.as_ref().is_free()) {
            merge_next_block(blocks, previous);
            block = previous;
        }

        if block.as_ref().next.is_some_and(|next| next.as_ref().is_free()) {
            merge_next_block(blocks, block);
        }

        block
    }

    /// Releases every used block through the normal release path. Zones stay
    /// mapped, each one ends up with one single free block.
    pub unsafe fn release_all(&mut self) {
        for zone in self.zones.iter() {
            let mut previous = None;
            let mut current = zone.as_ref().data.blocks.first();

            while let Some(block) = current {
                let survivor = if block.as_ref().is_free() {
                    block
                } else {
                    self.free_block(Location {
                        zone,
                        previous,
                        block,
                    })
                };

                previous = Some(survivor);
                current = survivor.as_ref().next;
            }
        }
    }

    /// Returns every zone to the kernel. All pointers handed out so far
    /// become dangling.
    pub unsafe fn unmap_all(&mut self) {
        for zone in self.zones.iter() {
            destroy_zone(zone);
        }

        self.zones.clear();
    }

    /// Size of the used block at `address`, or `None` if there's no such
    /// block.
    pub unsafe fn usable_size(&self, address: NonNull<u8>) -> Option<usize> {
        let location = self.locate(address)?;
        let block = location.block.as_ref();

        (!block.is_free()).then(|| block.size())
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats::default();

        unsafe {
            for zone in self.zones.iter() {
                stats.zones += 1;
                stats.mapped_bytes += zone.as_ref().total_size();

                for block in zone.as_ref().data.blocks.iter() {
                    let block = block.as_ref();
                    stats.blocks += 1;
                    if block.is_free() {
                        stats.free_blocks += 1;
                    } else {
                        stats.used_blocks += 1;
                        stats.used_bytes += block.size();
                    }
                }
            }
        }

        stats
    }

    /// Walks every chain checking that blocks tile their zone exactly and
    /// that coalescing didn't miss any pair of free neighbours.
    pub fn verify(&self) -> Result<(), HeapError> {
        unsafe {
            for zone in self.zones.iter() {
                let zone = zone.as_ref();
                let mut expected_address = zone.start() + ZONE_HEADER_SIZE;
                let mut previous_free: Pointer<Header<Block>> = None;
                let mut found = 0;

                for block in zone.data.blocks.iter() {
                    let address = block.as_ptr() as usize;
                    let total_size = block.as_ref().total_size();

                    if address != expected_address || address + total_size > zone.end() {
                        return Err(HeapError::Discontiguous { block: address });
                    }

                    if block.as_ref().is_free() {
                        if let Some(previous) = previous_free {
                            return Err(HeapError::AdjacentFree {
                                block: previous.as_ptr() as usize,
                                next: address,
                            });
                        }
                        previous_free = Some(block);
                    } else {
                        previous_free = None;
                    }

                    expected_address += total_size;
                    found += 1;
                }

                if found != zone.num_blocks() {
                    return Err(HeapError::BlockCount {
                        zone: zone.start(),
                        expected: zone.num_blocks(),
                        found,
                    });
                }

                if expected_address != zone.end() {
                    return Err(HeapError::ZoneCoverage {
                        zone: zone.start(),
                        covered: expected_address - zone.start() - ZONE_HEADER_SIZE,
                        expected: zone.size(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        unsafe { self.unmap_all() }
    }
}
