use crate::platform::page_size;

/// Every payload address and every block size is a multiple of this value,
/// which is what C callers expect from `malloc` on 64 bit machines.
pub(crate) const MIN_ALIGN: usize = 16;

/// Rounds `to_be_aligned` up to the next multiple of [`MIN_ALIGN`]. Returns
/// `None` if the result doesn't fit in a [`usize`].
///
/// ```text
/// align(1)  == Some(16)
/// align(16) == Some(16)
/// align(17) == Some(32)
/// ```
#[inline]
pub(crate) fn align(to_be_aligned: usize) -> Option<usize> {
    round_up(to_be_aligned, MIN_ALIGN)
}

/// Rounds `length` up to the next multiple of the virtual memory page size.
#[inline]
pub(crate) fn page_align(length: usize) -> Option<usize> {
    round_up(length, page_size())
}

/// `multiple` must be a power of two.
#[inline]
fn round_up(value: usize, multiple: usize) -> Option<usize> {
    Some(value.checked_add(multiple - 1)? & !(multiple - 1))
}
