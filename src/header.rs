use std::ptr::NonNull;

use crate::list::Node;

/// Since all the headers we store point to their next header we might as well
/// consider them linked list nodes. This is just a type alias that we use when
/// we want to refer to a block or zone header without thinking about linked
/// list nodes.
pub(crate) type Header<T> = Node<T>;

impl<T> Header<T> {
    /// Returns a pointer to a [`Header<T>`] given an address that points right
    /// after a valid [`Header<T>`].
    ///
    /// ```text
    /// +-------------+
    /// |  Header<T>  | <- Returned address points here.
    /// +-------------+
    /// |   Content   | <- Given address should point here.
    /// +-------------+
    /// |     ...     |
    /// +-------------+
    /// ```
    ///
    /// # Safety
    ///
    /// There must be at least one [`Header<T>`] worth of bytes of the same
    /// mapping before `address`. The result is only a valid header if
    /// `address` is the content address of one, [`crate::heap::Heap::locate`]
    /// compares it against the block chain before dereferencing anything.
    #[inline]
    pub unsafe fn from_content_address(address: NonNull<u8>) -> NonNull<Self> {
        NonNull::new_unchecked(address.as_ptr().cast::<Self>().offset(-1))
    }

    /// Returns the address after the header.
    ///
    /// ```text
    /// +-------------+
    /// |  Header<T>  | <- Header<T> struct.
    /// +-------------+
    /// |   Content   | <- Returned address points to the first cell after header.
    /// +-------------+
    /// |     ...     |
    /// +-------------+
    /// ```
    ///
    /// # Safety
    ///
    /// If `header` is a valid [`NonNull<Header<T>>`], the offset will return an
    /// address that points right after the header. That address is safe to use
    /// as long as no more than `size` bytes are written, where `size` is a
    /// field of [`crate::block::Block`] or [`crate::zone::Zone`].
    ///
    /// We are using this function as `Header::content_address_of(header)`
    /// instead of `header.content_address()` to avoid creating intermediary
    /// references to headers that live in raw memory.
    #[inline]
    pub unsafe fn content_address_of(header: NonNull<Self>) -> NonNull<u8> {
        NonNull::new_unchecked(header.as_ptr().offset(1)).cast()
    }
}
