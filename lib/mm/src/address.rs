//! Address types of the file server.
//!
//! The same type names addresses in two spaces: client virtual addresses
//! delivered with page faults, and server addresses of cached page buffers
//! handed to the kernel when installing a mapping. Neither is checked
//! against a paging mode; the kernel owns that validation.

use core::{fmt, ops::Add};

use config::mm::{PAGE_MASK, PAGE_OFFSET_WIDTH, PAGE_SIZE};

/// A virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr {
    addr: usize,
}

impl VirtAddr {
    /// Creates a new `VirtAddr` from the given address.
    pub const fn new(addr: usize) -> Self {
        VirtAddr { addr }
    }

    /// Gets the inner `usize` address.
    pub const fn to_usize(self) -> usize {
        self.addr
    }

    /// Gets the offset within the page where the address resides.
    pub const fn page_offset(self) -> usize {
        self.addr & PAGE_MASK
    }

    /// Gets the page number where the address resides.
    pub const fn page_number(self) -> VirtPageNum {
        VirtPageNum {
            page_num: self.addr >> PAGE_OFFSET_WIDTH,
        }
    }

    /// Rounds the address down to the start of its page.
    pub const fn round_down(self) -> Self {
        VirtAddr {
            addr: self.addr & !PAGE_MASK,
        }
    }

    /// Rounds the address up to a page boundary, `None` on overflow.
    pub const fn round_up(self) -> Option<Self> {
        match self.addr.checked_add(PAGE_MASK) {
            Some(addr) => Some(VirtAddr {
                addr: addr & !PAGE_MASK,
            }),
            None => None,
        }
    }

    pub const fn is_aligned(self) -> bool {
        self.page_offset() == 0
    }

    pub fn checked_add(self, rhs: usize) -> Option<Self> {
        self.addr.checked_add(rhs).map(VirtAddr::new)
    }
}

impl Add<usize> for VirtAddr {
    type Output = VirtAddr;
    fn add(self, rhs: usize) -> VirtAddr {
        VirtAddr::new(self.addr + rhs)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA:{:#x}", self.addr)
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        VirtAddr::new(addr)
    }
}

/// A virtual page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum {
    page_num: usize,
}

impl VirtPageNum {
    /// Creates a new `VirtPageNum` from the given page number.
    pub const fn new(page_num: usize) -> Self {
        VirtPageNum { page_num }
    }

    /// Gets the inner `usize` page number.
    pub const fn to_usize(self) -> usize {
        self.page_num
    }

    /// Gets the starting address of the page.
    pub const fn address(self) -> VirtAddr {
        VirtAddr::new(self.page_num * PAGE_SIZE)
    }
}

impl From<VirtPageNum> for VirtAddr {
    fn from(vpn: VirtPageNum) -> VirtAddr {
        vpn.address()
    }
}

/// Rounds `len` up to a whole number of pages, `None` on overflow.
pub const fn page_round_up(len: usize) -> Option<usize> {
    match len.checked_add(PAGE_MASK) {
        Some(len) => Some(len & !PAGE_MASK),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        let va = VirtAddr::new(0x1500);
        assert_eq!(va.round_down(), VirtAddr::new(0x1000));
        assert_eq!(va.round_up(), Some(VirtAddr::new(0x2000)));
        assert_eq!(va.page_offset(), 0x500);
        assert_eq!(va.page_number().address(), VirtAddr::new(0x1000));
        assert_eq!(VirtAddr::new(usize::MAX).round_up(), None);
        assert_eq!(page_round_up(0), Some(0));
        assert_eq!(page_round_up(1), Some(PAGE_SIZE));
    }
}
