//! Memory side of the file server: the shared page cache and the
//! file-mapping fault pipeline built on top of it.

extern crate alloc;

pub mod address;
pub mod fmap;
pub mod page_cache;
