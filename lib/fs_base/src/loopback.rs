//! An in-process stand-in for the kernel side of the file server.
//!
//! It keeps the mappings installed for each client and turns a client
//! access to an unmapped page into a message on the fault channel, which
//! is enough to drive the fault pipeline on a hosted build.

use alloc::vec::Vec;

use hashbrown::HashMap;
use id_allocator::{IdAllocator, VecIdAllocator};
use mm::{
    address::VirtAddr,
    fmap::{Badge, FaultSender, PmoCap, UserFaultKernel, UserFaultMsg},
};
use mutex::SpinLock;
use systype::{SysError, SysResult, memory_flags::MappingFlags};

/// Memory object caps handed out by the loopback kernel start here.
const FIRST_PMO_CAP: PmoCap = 1;
const MAX_PMO_NUM: usize = 1024;

/// A page installed into a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub server_page: VirtAddr,
    pub copy: bool,
    pub perm: MappingFlags,
}

struct PmoTable {
    caps: VecIdAllocator,
    sizes: HashMap<PmoCap, usize>,
}

pub struct LoopbackKernel {
    sender: SpinLock<Option<FaultSender>>,
    mappings: SpinLock<HashMap<(Badge, VirtAddr), Mapping>>,
    failures: SpinLock<Vec<(Badge, VirtAddr, SysError)>>,
    pmos: SpinLock<PmoTable>,
}

impl LoopbackKernel {
    pub fn new() -> Self {
        Self {
            sender: SpinLock::new(None),
            mappings: SpinLock::new(HashMap::new()),
            failures: SpinLock::new(Vec::new()),
            pmos: SpinLock::new(PmoTable {
                caps: VecIdAllocator::new(FIRST_PMO_CAP, FIRST_PMO_CAP + MAX_PMO_NUM),
                sizes: HashMap::new(),
            }),
        }
    }

    /// A client accesses `va`. Returns `true` if the page was already
    /// mapped, otherwise forwards a fault.
    ///
    /// # Errors
    /// [`SysError::ENOSYS`] before a fault channel is registered,
    /// [`SysError::EAGAIN`] when the fault ring is full.
    pub fn touch(&self, client: Badge, va: VirtAddr) -> SysResult<bool> {
        if self.mapping(client, va).is_some() {
            return Ok(true);
        }
        let mut sender = self.sender.lock();
        let sender = sender.as_mut().ok_or(SysError::ENOSYS)?;
        sender
            .send(UserFaultMsg {
                client,
                fault_va: va,
            })
            .map_err(|_| SysError::EAGAIN)?;
        Ok(false)
    }

    /// The page installed for `client` at the page of `va`.
    pub fn mapping(&self, client: Badge, va: VirtAddr) -> Option<Mapping> {
        self.mappings.lock().get(&(client, va.round_down())).copied()
    }

    pub fn mapped_pages(&self, client: Badge) -> usize {
        self.mappings.lock().keys().filter(|(c, _)| *c == client).count()
    }

    /// Forgets the mappings of an exited client.
    pub fn unmap_client(&self, client: Badge) {
        self.mappings.lock().retain(|(c, _), _| *c != client);
    }

    pub fn failures(&self) -> Vec<(Badge, VirtAddr, SysError)> {
        self.failures.lock().clone()
    }

    pub fn pmo_size(&self, cap: PmoCap) -> Option<usize> {
        self.pmos.lock().sizes.get(&cap).copied()
    }

    /// Drops the sending end of the fault channel, which ends the handler
    /// once it has drained what is queued.
    pub fn close_fault_channel(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
    }
}

impl Default for LoopbackKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl UserFaultKernel for LoopbackKernel {
    fn register_fault_channel(&self, sender: FaultSender) -> SysResult<()> {
        let mut slot = self.sender.lock();
        if slot.is_some() {
            return Err(SysError::EBUSY);
        }
        *slot = Some(sender);
        Ok(())
    }

    fn map_page(
        &self,
        client: Badge,
        va: VirtAddr,
        server_page: VirtAddr,
        copy: bool,
        perm: MappingFlags,
    ) -> SysResult<()> {
        if !va.is_aligned() {
            return Err(SysError::EINVAL);
        }
        log::trace!("[loopback_map_page] client {} {:?} -> {:?}", client, va, server_page);
        self.mappings.lock().insert(
            (client, va),
            Mapping {
                server_page,
                copy,
                perm,
            },
        );
        Ok(())
    }

    fn report_fault_failure(&self, client: Badge, va: VirtAddr, err: SysError) {
        log::warn!("[loopback_fault_failure] client {} at {:?}: {}", client, va, err);
        self.failures.lock().push((client, va, err));
    }

    fn create_pmo(&self, size: usize) -> SysResult<PmoCap> {
        let mut pmos = self.pmos.lock();
        let cap = pmos.caps.alloc().ok_or(SysError::ENOSPC)?;
        pmos.sizes.insert(cap, size);
        Ok(cap)
    }

    fn resize_pmo(&self, cap: PmoCap, size: usize) -> SysResult<()> {
        let mut pmos = self.pmos.lock();
        let pmo = pmos.sizes.get_mut(&cap).ok_or(SysError::EINVAL)?;
        *pmo = size;
        Ok(())
    }
}
