//! File mappings and their demand paging.
//!
//! A client `fmap` request only records an [`FmapArea`]; nothing is mapped
//! until the client touches the range. The kernel then forwards the page
//! fault through a [`FaultSender`], and the [`FaultHandler`] thread resolves
//! it: it looks the address up in the [`FmapAreaTable`], asks the backing
//! [`FmapFile`] for the server page holding that part of the file, and has
//! the kernel install the page into the client.

mod area;
mod channel;
mod fault;
mod kernel;

pub use area::{FmapArea, FmapAreaTable, FmapFile, FmapHit};
pub use channel::{FaultReceiver, FaultSender, UserFaultMsg, fault_channel};
pub use fault::{FaultHandler, fault_perm, resolve_fault};
pub use kernel::{Badge, PmoCap, UserFaultKernel};
