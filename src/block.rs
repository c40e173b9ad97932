use std::{mem, ptr::NonNull};

use crate::{align::MIN_ALIGN, header::Header, list::LinkedList};

/// Block header size in bytes. See [`Header<T>`] and [`Block`].
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<Header<Block>>();

/// Minimum payload size in bytes. A split only happens if the remainder can
/// hold a header plus at least this many bytes, otherwise we'd end up with
/// free fragments that nobody can use.
pub(crate) const MIN_BLOCK_SIZE: usize = MIN_ALIGN;

const _: () = assert!(BLOCK_HEADER_SIZE % MIN_ALIGN == 0);

/// Memory block specific data. All headers are also linked list nodes, see
/// [`Header<T>`]. In this case, a complete block header would be
/// [`crate::list::Node<Block>`], also known as [`Header<Block>`]. Here's a
/// graphical representation of how it looks like in memory:
///
/// ```text
/// +----------------------------+          <----------------------+
/// | pointer to next block      |   <------ Pointer<Node<Block>>  |
/// +----------------------------+                                 |
/// | block size                 |   <------+                      |
/// +----------------------------+          | Block                | Node<Block>
/// | used flag (1 byte)         |   <------+                      |
/// +----------------------------+                                 |
/// | padding (16 byte alignment)|                                 |
/// +----------------------------+          <----------------------+
/// |       Block content        |   <------+
/// |            ...             |          | Addressable content, `size` bytes.
/// |            ...             |   <------+
/// +----------------------------+
/// ```
///
/// The pointer handed to the user is always the first address of the block
/// content, which is how we find the header again on release.
///
/// Blocks of one zone are chained in address order and cover the zone with
/// no gaps: the next header starts exactly `size` bytes after the content of
/// the current one.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Block {
    /// Size of the block excluding [`Header<Block>`] size. Always a multiple
    /// of [`MIN_ALIGN`].
    pub size: usize,
    /// Whether the user owns this block.
    pub used: bool,
}

impl Header<Block> {
    /// Helper function to reduce boilerplate. Since the complete block header
    /// is [`Header<Block>`] all [`Block`] fields have to be accessed through
    /// `data`.
    #[inline]
    pub fn is_free(&self) -> bool {
        !self.data.used
    }

    /// Block size excluding [`BLOCK_HEADER_SIZE`].
    #[inline]
    pub fn size(&self) -> usize {
        self.data.size
    }

    /// Total block size including [`BLOCK_HEADER_SIZE`].
    #[inline]
    pub fn total_size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.data.size
    }
}

/// Block splitting algorithm. Let's say we have a free block that can hold 128
/// bytes and a request to allocate 32 bytes has been made. We'll split the
/// block in two different blocks, like so:
///
/// **Before**:
///
/// ```text
///         +-->  +-----------+
///         |     |   Header  | <- H bytes.
/// Block   |     +-----------+
///         |     |  Content  | <- 128 bytes.
///         +-->  +-----------+
/// ```
/// **After**:
///
/// ```text
///         +-->  +-----------+
///         |     |   Header  | <- H bytes.
/// Block 1 |     +-----------+
///         |     |  Content  | <- 32 bytes.
///         +-->  +-----------+
///         |     |   Header  | <- H bytes.
/// Block 2 |     +-----------+
///         |     |  Content  | <- 128 bytes - 32 bytes - H bytes. Free.
///         +-->  +-----------+
/// ```
///
/// Nothing happens if the remainder can't host a header and
/// [`MIN_BLOCK_SIZE`] bytes, the block keeps its whole size.
///
/// # Safety
///
/// `block` must be a valid block of the zone that owns `blocks` and `size`
/// must be aligned to [`MIN_ALIGN`].
pub(crate) unsafe fn split_block_if_possible(
    blocks: &mut LinkedList<Block>,
    mut block: NonNull<Header<Block>>,
    size: usize,
) -> bool {
    if block.as_ref().size() < size + BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE {
        return false;
    }

    let address = Header::content_address_of(block).as_ptr().add(size);

    blocks.insert_after(
        block,
        Block {
            size: block.as_ref().size() - size - BLOCK_HEADER_SIZE,
            used: false,
        },
        NonNull::new_unchecked(address),
    );

    block.as_mut().data.size = size;

    true
}

/// Merges the block that follows `block` into `block`. The next block header
/// stops being meaningful, its whole span (header included) now belongs to
/// `block`:
///
/// ```text
/// +----------------+---------------+
/// |    Block A     |   Block B     |
/// +----------------+---------------+
///        ^                 |
///        |                 |
///        +-----------------+
///           Merge B into A
/// ```
///
/// Returns `false` if there is no next block.
///
/// # Safety
///
/// `block` must be a valid block of the zone that owns `blocks`. Whether the
/// next block is free is up to the caller.
pub(crate) unsafe fn merge_next_block(
    blocks: &mut LinkedList<Block>,
    mut block: NonNull<Header<Block>>,
) -> bool {
    let Some(next) = block.as_ref().next else {
        return false;
    };

    block.as_mut().data.size += next.as_ref().total_size();
    blocks.remove_next(block);

    true
}
