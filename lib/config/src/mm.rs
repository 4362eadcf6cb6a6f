//! Module defining constants related to memory management.

/// Page size
pub const PAGE_SIZE: usize = 4096;
/// Width of page offset
pub const PAGE_OFFSET_WIDTH: usize = 12;
/// Mask of the in-page offset bits
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
