//! A scripted client session against the in-memory filesystem.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use config::{fs::MAX_FAULT_MSG_NUM, mm::PAGE_SIZE};
use fs_base::{
    FmapRequest, FsBase,
    loopback::LoopbackKernel,
    memfs::{MemFile, MemFs},
};
use mm::{address::VirtAddr, fmap::FmapFile};
use systype::{
    SysError, SysResult,
    memory_flags::{MmapFlags, MmapProt},
};

use crate::env::ServerConfig;

const CLIENT: u64 = 1;
const MAP_BASE: usize = 0x4000_0000;
const FAULT_WAIT: Duration = Duration::from_secs(2);

/// Waits until the fault thread installed the page of `va`.
fn wait_mapped(kernel: &LoopbackKernel, va: VirtAddr) -> SysResult<()> {
    let deadline = Instant::now() + FAULT_WAIT;
    while kernel.mapping(CLIENT, va).is_none() {
        if Instant::now() >= deadline {
            log::error!("[wait_mapped] {:?} still unmapped", va);
            return Err(SysError::EAGAIN);
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

pub fn run(config: &ServerConfig) -> SysResult<()> {
    let kernel = Arc::new(LoopbackKernel::new());
    let fs = FsBase::new(MemFs::new(), kernel.clone(), config.cache.clone())?;
    let fault_thread = fs.fault_handler(MAX_FAULT_MSG_NUM)?.spawn()?;
    let write_back = fs.spawn_write_back()?;

    let vnode = fs.open(1, 0, MemFile::new());
    let data: Vec<u8> = (0..3 * PAGE_SIZE + 123).map(|i| (i % 253) as u8).collect();
    fs.write(&vnode, 0, &data)?;
    let mut back = vec![0u8; data.len()];
    if fs.read(&vnode, 0, &mut back)? != data.len() || back != data {
        log::error!("[selfcheck] read back differs from what was written");
        return Err(SysError::EIO);
    }
    log::info!("[selfcheck] wrote and read back {:#x} bytes", data.len());

    let req = FmapRequest {
        addr: VirtAddr::new(MAP_BASE),
        length: 6 * PAGE_SIZE,
        prot: (MmapProt::PROT_READ | MmapProt::PROT_WRITE).bits(),
        flags: MmapFlags::MAP_SHARED.bits(),
        offset: 0,
    };
    let cap = fs.fmap(CLIENT, &vnode, true, req)?;
    for page in [0, 2, 5] {
        let va = VirtAddr::new(MAP_BASE + page * PAGE_SIZE + 8);
        kernel.touch(CLIENT, va)?;
        wait_mapped(&kernel, va)?;
    }
    log::info!(
        "[selfcheck] pmo {} mapped {} pages, file grew to {:#x}",
        cap,
        kernel.mapped_pages(CLIENT),
        vnode.size()
    );
    if vnode.size() != 6 * PAGE_SIZE {
        return Err(SysError::EIO);
    }

    fs.ftruncate(&vnode, data.len())?;
    fs.sync()?;
    if vnode.private().content() != data {
        log::error!("[selfcheck] backing file differs after sync");
        return Err(SysError::EIO);
    }

    fs.client_exit(CLIENT);
    kernel.unmap_client(CLIENT);
    fs.close(&vnode)?;
    kernel.close_fault_channel();
    if fault_thread.join().is_err() {
        log::error!("[selfcheck] fault thread panicked");
    }
    if let Some(routine) = write_back {
        routine.stop();
    }
    if let Some(cache) = fs.cache() {
        let stats = cache.stats();
        log::info!(
            "[selfcheck] hit: {} miss: {} evict: {} write: {}",
            stats.hits,
            stats.misses,
            stats.evictions,
            stats.write_backs
        );
    }
    log::info!(
        "[selfcheck] page reads {}, block writes {}",
        fs.ops().page_reads(),
        fs.ops().block_writes()
    );
    if !kernel.failures().is_empty() {
        return Err(SysError::EFAULT);
    }
    Ok(())
}
