use std::{marker::PhantomData, ptr::NonNull};

use crate::{header::Header, Pointer};

/// Linked list node. See also [`Header<T>`]. Nodes are aligned to 16 bytes so
/// that the content right after any header written at an aligned address is
/// aligned as well.
#[repr(C, align(16))]
pub struct Node<T> {
    pub next: Pointer<Self>,
    pub data: T,
}

/// Singly linked intrusive list. Nodes live in memory owned by the allocator
/// (headers of zones and blocks) so the list never allocates, it just needs
/// to be told where each node should be written.
///
/// Only forward links are stored. Whoever needs the predecessor of a node
/// keeps track of it while walking the list, which is fine because every
/// operation that needs a predecessor has to walk the list anyway.
pub struct LinkedList<T> {
    pub head: Pointer<Node<T>>,
    pub len: usize,
    marker: PhantomData<T>,
}

impl<T> Clone for LinkedList<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for LinkedList<T> {}

impl<T> LinkedList<T> {
    /// Creates an empty linked list. No allocations happen because, well, we
    /// are the allocator.
    pub const fn new() -> Self {
        Self {
            head: None,
            len: 0,
            marker: PhantomData,
        }
    }

    /// Number of nodes in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First node of the list, if any.
    #[inline]
    pub fn first(&self) -> Pointer<Node<T>> {
        self.head
    }

    /// Writes a new node holding `data` at `address` and makes it the head of
    /// the list.
    ///
    /// # Safety
    ///
    /// Caller must guarantee that `address` is valid, aligned for
    /// [`Node<T>`] and that nothing else lives there.
    pub unsafe fn push_front(&mut self, data: T, address: NonNull<u8>) -> NonNull<Header<T>> {
        let node = address.cast::<Node<T>>();

        node.as_ptr().write(Node {
            next: self.head,
            data,
        });

        self.head = Some(node);
        self.len += 1;

        node
    }

    /// Inserts a new node with the given `data` right after the given `node`.
    /// New node will be written to `address`.
    ///
    /// # Safety
    ///
    /// Caller must guarantee that both `address` and `node` are valid and that
    /// `node` belongs to this list.
    pub unsafe fn insert_after(
        &mut self,
        mut node: NonNull<Node<T>>,
        data: T,
        address: NonNull<u8>,
    ) -> NonNull<Header<T>> {
        let new_node = address.cast::<Node<T>>();

        new_node.as_ptr().write(Node {
            next: node.as_ref().next,
            data,
        });

        node.as_mut().next = Some(new_node);
        self.len += 1;

        new_node
    }

    /// Unlinks the node that follows `node` and returns it. The unlinked node
    /// memory is left untouched.
    ///
    /// # Safety
    ///
    /// `node` must be valid and belong to this list.
    pub unsafe fn remove_next(&mut self, mut node: NonNull<Node<T>>) -> Pointer<Node<T>> {
        let next = node.as_ref().next?;
        node.as_mut().next = next.as_ref().next;
        self.len -= 1;

        Some(next)
    }

    /// Forgets every node. Used when the memory where the nodes live is about
    /// to disappear.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    /// Iterates over the nodes in list order.
    ///
    /// # Safety
    ///
    /// Every node must stay valid while the iterator is alive. The next link
    /// of a node is read before the node is yielded, so callers can modify the
    /// yielded node (or even unmap it) without breaking the iteration.
    pub unsafe fn iter(&self) -> Iter<T> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }
}

/// See [`LinkedList::iter`].
pub struct Iter<T> {
    current: Pointer<Node<T>>,
    marker: PhantomData<T>,
}

impl<T> Iterator for Iter<T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.current.map(|node| unsafe {
            self.current = node.as_ref().next;
            node
        })
    }
}
