#![no_std]

extern crate alloc;

use alloc::vec::Vec;

/// A trait for types that can allocate and deallocate `usize` IDs.
///
/// This trait is used to abstract over different ID allocation strategies.
pub trait IdAllocator {
    /// Allocate a new ID.
    ///
    /// Returns `Some(id)` if an ID was successfully allocated,
    /// or `None` if no more IDs are available.
    fn alloc(&mut self) -> Option<usize>;

    /// Deallocate an ID.
    ///
    /// This allows the ID to be reused in future calls to `alloc`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the ID was previously allocated
    /// and has not been deallocated yet.
    unsafe fn dealloc(&mut self, id: usize);

    /// Number of IDs currently handed out.
    fn in_use(&self) -> usize;
}

/// An ID allocator that recycles freed IDs before minting new ones.
///
/// Freed IDs are kept in a stack, so the most recently freed ID is reused
/// first. `high_water` tells how many distinct IDs were ever minted, which
/// is the length a table indexed by these IDs must have.
pub struct VecIdAllocator {
    start: usize,
    next: usize,
    end: usize,
    ids: Vec<usize>,
}

impl VecIdAllocator {
    /// Create a new `VecIdAllocator` that can allocate IDs in the range `from..to`.
    pub fn new(from: usize, to: usize) -> Self {
        debug_assert!(from < to);
        VecIdAllocator {
            start: from,
            next: from,
            end: to,
            ids: Vec::new(),
        }
    }

    /// One past the largest ID ever minted.
    pub fn high_water(&self) -> usize {
        self.next
    }

    /// Whether no further ID can be handed out.
    pub fn is_exhausted(&self) -> bool {
        self.ids.is_empty() && self.next == self.end
    }
}

impl IdAllocator for VecIdAllocator {
    fn alloc(&mut self) -> Option<usize> {
        match self.ids.pop() {
            Some(id) => Some(id),
            None => {
                let id = self.next;
                if id < self.end {
                    self.next += 1;
                    Some(id)
                } else {
                    None
                }
            }
        }
    }

    unsafe fn dealloc(&mut self, id: usize) {
        debug_assert!((self.start..self.next).contains(&id));
        debug_assert!(!self.ids.contains(&id), "id {id} freed twice");
        self.ids.push(id);
    }

    fn in_use(&self) -> usize {
        self.next - self.start - self.ids.len()
    }
}
