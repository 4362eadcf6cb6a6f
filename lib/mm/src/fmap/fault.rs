//! Resolution of page faults on file mappings.

use alloc::sync::Arc;
use std::thread::{self, JoinHandle};

use systype::{
    SysError, SysResult,
    memory_flags::{MappingFlags, MmapFlags, MmapProt},
};

use super::{
    area::{FmapAreaTable, FmapFile},
    channel::{FaultReceiver, UserFaultMsg, fault_channel},
    kernel::{Badge, UserFaultKernel},
};
use crate::address::{VirtAddr, page_round_up};

/// Permission a resolved page is installed with.
///
/// Shared mappings get what they asked for. Private mappings share the
/// cached page read-only; the kernel copies it on the first write.
pub fn fault_perm(flags: MmapFlags, prot: MmapProt) -> MappingFlags {
    let requested = MappingFlags::from(prot);
    if flags.is_shared() {
        requested
    } else {
        MappingFlags::R | (requested & MappingFlags::X)
    }
}

/// Server page of file offset `offset`, or `None` past the end of file.
fn page_within_eof<F: FmapFile>(file: &F, offset: usize) -> SysResult<Option<VirtAddr>> {
    let eof = page_round_up(file.size()).ok_or(SysError::EFBIG)?;
    if offset >= eof {
        return Ok(None);
    }
    file.page_addr(offset).map(Some)
}

/// Resolves the fault of `client` at `fault_va` and installs the page.
///
/// A shared writable mapping touched past the end of its file grows the
/// file to the end of the mapped window first.
///
/// # Errors
/// - [`SysError::ENOENT`] if no area covers the address.
/// - [`SysError::EFAULT`] for any other access past the end of file.
/// - Errors of the file or of the kernel mapping call.
pub fn resolve_fault<F, K>(
    table: &FmapAreaTable<F>,
    kernel: &K,
    client: Badge,
    fault_va: VirtAddr,
) -> SysResult<()>
where
    F: FmapFile,
    K: UserFaultKernel + ?Sized,
{
    let va = fault_va.round_down();
    let hit = table.find(client, va)?;
    let offset = hit.file_offset + hit.area_offset;

    let server_page = match page_within_eof(&*hit.file, offset)? {
        Some(addr) => addr,
        None if hit.flags.is_shared() && hit.prot.contains(MmapProt::PROT_WRITE) => {
            let window_end = hit.file_offset + hit.area_length;
            log::debug!(
                "[resolve_fault] client {} at {:?}: growing file from {:#x} to {:#x}",
                client,
                fault_va,
                hit.file.size(),
                window_end
            );
            hit.file.grow_to(window_end)?;
            page_within_eof(&*hit.file, offset)?.ok_or(SysError::EFAULT)?
        }
        None => {
            log::warn!(
                "[resolve_fault] client {} at {:?}: offset {:#x} past end of file",
                client,
                fault_va,
                offset
            );
            return Err(SysError::EFAULT);
        }
    };

    let perm = fault_perm(hit.flags, hit.prot);
    log::trace!(
        "[resolve_fault] client {} va {:?} -> server page {:?}, perm {:?}",
        client,
        va,
        server_page,
        perm
    );
    kernel.map_page(client, va, server_page, false, perm)
}

/// Handles one message, reporting a failure back to the kernel.
fn handle_one_fault<F, K>(table: &FmapAreaTable<F>, kernel: &K, msg: UserFaultMsg)
where
    F: FmapFile,
    K: UserFaultKernel + ?Sized,
{
    if let Err(e) = resolve_fault(table, kernel, msg.client, msg.fault_va) {
        log::error!(
            "[handle_one_fault] client {} at {:?} unresolved: {:?}",
            msg.client,
            msg.fault_va,
            e
        );
        kernel.report_fault_failure(msg.client, msg.fault_va, e);
    }
}

/// The fault handling loop of the server.
pub struct FaultHandler<F: FmapFile, K: UserFaultKernel + ?Sized> {
    table: Arc<FmapAreaTable<F>>,
    kernel: Arc<K>,
    receiver: FaultReceiver,
}

impl<F, K> FaultHandler<F, K>
where
    F: FmapFile + 'static,
    K: UserFaultKernel + ?Sized + 'static,
{
    /// Creates the fault channel and registers its sending end with the
    /// kernel.
    pub fn register(table: Arc<FmapAreaTable<F>>, kernel: Arc<K>, capacity: usize) -> SysResult<Self> {
        let (sender, receiver) = fault_channel(capacity)?;
        kernel.register_fault_channel(sender)?;
        log::info!("[FaultHandler::register] fault ring of {} messages", capacity);
        Ok(Self {
            table,
            kernel,
            receiver,
        })
    }

    /// Resolves every queued fault. Returns how many were handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Some(msg) = self.receiver.try_recv() {
            handle_one_fault(&self.table, &*self.kernel, msg);
            handled += 1;
        }
        handled
    }

    /// Sleeps until faults arrive and drains them, until the kernel drops
    /// its end of the channel.
    pub fn run(mut self) {
        while self.receiver.wait() {
            self.drain();
        }
        log::debug!("[FaultHandler::run] fault channel closed");
    }

    /// Runs [`run`](Self::run) on a dedicated thread.
    pub fn spawn(self) -> SysResult<JoinHandle<()>> {
        thread::Builder::new()
            .name("fmap-fault".into())
            .spawn(move || self.run())
            .map_err(|_| SysError::EAGAIN)
    }
}
