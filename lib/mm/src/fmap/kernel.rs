use systype::{SysError, SysResult, memory_flags::MappingFlags};

use super::channel::FaultSender;
use crate::address::VirtAddr;

/// Identifies a client process to the file server.
pub type Badge = u64;

/// Capability of a kernel memory object backing a mapped file.
pub type PmoCap = usize;

/// Kernel services the fault pipeline relies on.
pub trait UserFaultKernel: Send + Sync {
    /// Hands the kernel the producing end of the fault channel. Called once.
    fn register_fault_channel(&self, sender: FaultSender) -> SysResult<()>;

    /// Installs the server page at `server_page` into `client` at `va`.
    /// With `copy` the kernel maps a private copy instead.
    fn map_page(
        &self,
        client: Badge,
        va: VirtAddr,
        server_page: VirtAddr,
        copy: bool,
        perm: MappingFlags,
    ) -> SysResult<()>;

    /// Tells the kernel the fault of `client` at `va` cannot be resolved.
    fn report_fault_failure(&self, client: Badge, va: VirtAddr, err: SysError);

    /// Creates a memory object of `size` bytes for a mapped file.
    fn create_pmo(&self, size: usize) -> SysResult<PmoCap>;

    /// Resizes the memory object of a file that grew.
    fn resize_pmo(&self, cap: PmoCap, size: usize) -> SysResult<()>;
}
