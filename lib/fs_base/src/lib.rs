//! Base layer of a file server.
//!
//! Sits between client requests and a concrete filesystem implementing
//! [`ServerOps`]: tracks open files as vnodes, serves reads and writes
//! through the shared page cache, and records file mappings whose pages
//! are provided on fault.

extern crate alloc;

mod base;
mod cache;
pub mod loopback;
pub mod memfs;
mod ops;
mod table;
mod vnode;

pub use base::{FmapRequest, FsBase};
pub use cache::{CacheAdapter, FsPageCache, VnodeCtx};
pub use ops::ServerOps;
pub use table::VnodeTable;
pub use vnode::{Vnode, VnodeId};
