use std::ptr::{self, NonNull};

use crate::{
    align::align,
    block::{merge_next_block, split_block_if_possible},
    error::AllocError,
    heap::Heap,
};

/// What the reallocation algorithm ended up doing. Only the address matters
/// to callers, the method is there for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReallocMethod {
    /// The block was already big enough.
    InPlace,
    /// The block absorbed its free successor, payload didn't move.
    Merged,
    /// New block, contents copied, old block released.
    Moved,
}

/// Result of [`Heap::reallocate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Realloc {
    /// Where the user contents live now.
    pub address: NonNull<u8>,
    pub method: ReallocMethod,
}

impl Heap {
    /// Reallocation algorithm. Given the used block at `address`:
    ///
    /// 1. If it can already hold `new_size` bytes, nothing changes. This also
    /// covers `new_size == 0`, the block stays allocated.
    ///
    /// 2. If the next block is free and both of them together can hold
    /// `new_size` bytes, the next block is merged into this one (and split
    /// again if too much space is left over). The address doesn't change:
    ///
    /// ```text
    /// +-----------------+-----------------------+
    /// |  Used, 32 bytes |     Free, 96 bytes    |
    /// +-----------------+-----------------------+
    ///                        |
    ///                        v
    /// +-----------------------------+-----------+
    /// |      Used, 64 bytes         |   Free    |
    /// +-----------------------------+-----------+
    /// ```
    ///
    /// 3. Otherwise a new block is allocated, the contents are copied and the
    /// old block is released, in that order.
    ///
    /// If the new block can't be allocated the old one is left untouched.
    pub unsafe fn reallocate(
        &mut self,
        address: NonNull<u8>,
        new_size: usize,
    ) -> Result<Realloc, AllocError> {
        let unknown = AllocError::UnknownPointer {
            address: address.as_ptr() as usize,
        };

        let location = self.locate(address).ok_or(unknown)?;
        let (mut zone, block) = (location.zone, location.block);

        if block.as_ref().is_free() {
            return Err(unknown);
        }

        let old_size = block.as_ref().size();

        if old_size >= new_size {
            return Ok(Realloc {
                address,
                method: ReallocMethod::InPlace,
            });
        }

        let aligned = align(new_size).ok_or(AllocError::OutOfMemory { size: new_size })?;

        if let Some(next) = block.as_ref().next {
            if next.as_ref().is_free() && old_size + next.as_ref().total_size() >= aligned {
                let blocks = &mut zone.as_mut().data.blocks;
                merge_next_block(blocks, block);
                split_block_if_possible(blocks, block, aligned);

                return Ok(Realloc {
                    address,
                    method: ReallocMethod::Merged,
                });
            }
        }

        let new_address = self.allocate(new_size)?;
        ptr::copy_nonoverlapping(address.as_ptr(), new_address.as_ptr(), old_size);

        // Allocating might have split the block before this one, so the
        // location we had is stale. Look it up again.
        self.release(address);

        Ok(Realloc {
            address: new_address,
            method: ReallocMethod::Moved,
        })
    }
}
