//! Module defining constants of the file server base layer: the page cache
//! geometry, its queue bounds and the fault delivery ring.

use core::time::Duration;

use crate::mm::PAGE_SIZE;

/// Size of one cached page
pub const CACHED_PAGE_SIZE: usize = PAGE_SIZE;
/// Size of one dirty-tracked sub-block of a cached page
pub const CACHED_BLOCK_SIZE: usize = 512;
/// Number of sub-blocks in one cached page
pub const BLOCK_PER_PAGE: usize = CACHED_PAGE_SIZE / CACHED_BLOCK_SIZE;

/// Bound of the active (recently re-touched) queue
pub const ACTIVE_LIST_MAX: usize = 1 << 14;
/// Bound of the inactive (touched once) queue
pub const INACTIVE_LIST_MAX: usize = 1 << 14;
/// Bound of the pinned queue
pub const MAX_PINNED_PAGE: usize = 512;

/// Period of the write-back sweep
pub const WRITE_BACK_CYCLE: Duration = Duration::from_secs(300);

/// Capacity of the user fault message ring
pub const MAX_FAULT_MSG_NUM: usize = 100;

const _: () = assert!(CACHED_PAGE_SIZE % CACHED_BLOCK_SIZE == 0);
const _: () = assert!(BLOCK_PER_PAGE <= u8::BITS as usize);
