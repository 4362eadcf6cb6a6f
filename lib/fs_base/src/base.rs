use alloc::sync::Arc;

use config::{fs::CACHED_BLOCK_SIZE, mm::PAGE_SIZE};
use mm::{
    address::{VirtAddr, page_round_up},
    fmap::{Badge, FaultHandler, FmapAreaTable, FmapFile, PmoCap, UserFaultKernel},
    page_cache::{AccessMode, CacheStrategy, PageCache, PageCacheConfig, Span, WriteBackRoutine},
};
use systype::{
    SysError, SysResult,
    memory_flags::{MmapFlags, MmapProt},
};

use crate::{
    cache::{CacheAdapter, FsPageCache},
    ops::ServerOps,
    table::VnodeTable,
    vnode::{CachedVnode, Vnode, VnodeId},
};

/// Arguments of a client `fmap` request.
#[derive(Debug, Clone, Copy)]
pub struct FmapRequest {
    pub addr: VirtAddr,
    pub length: usize,
    /// Raw `PROT_*` bits.
    pub prot: i32,
    /// Raw `MAP_*` bits.
    pub flags: i32,
    pub offset: usize,
}

/// Handles client requests on top of one filesystem.
pub struct FsBase<S: ServerOps> {
    ops: Arc<S>,
    kernel: Arc<dyn UserFaultKernel>,
    cache: Option<Arc<FsPageCache<S>>>,
    vnodes: Arc<VnodeTable<S>>,
    areas: Arc<FmapAreaTable<Vnode<S>>>,
}

impl<S: ServerOps> FsBase<S> {
    /// Builds the layer. `cache` is `None` to serve everything straight
    /// from the filesystem.
    pub fn new(
        ops: S,
        kernel: Arc<dyn UserFaultKernel>,
        cache: Option<PageCacheConfig>,
    ) -> SysResult<Self> {
        let ops = Arc::new(ops);
        let vnodes = Arc::new(VnodeTable::new());
        let cache = match cache {
            Some(config) => Some(PageCache::new(
                CacheAdapter::new(ops.clone(), Arc::downgrade(&vnodes)),
                config,
            )?),
            None => None,
        };
        log::info!(
            "[FsBase::new] page cache {}",
            if cache.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            ops,
            kernel,
            cache,
            vnodes,
            areas: Arc::new(FmapAreaTable::new()),
        })
    }

    pub fn ops(&self) -> &S {
        &self.ops
    }

    pub fn cache(&self) -> Option<&Arc<FsPageCache<S>>> {
        self.cache.as_ref()
    }

    pub fn vnodes(&self) -> &Arc<VnodeTable<S>> {
        &self.vnodes
    }

    pub fn areas(&self) -> &Arc<FmapAreaTable<Vnode<S>>> {
        &self.areas
    }

    /// Takes a handle on vnode `id`. `size` and `private` are only used
    /// when the vnode is not live yet.
    pub fn open(&self, id: VnodeId, size: usize, private: S::Private) -> Arc<Vnode<S>> {
        self.vnodes.get_or_insert_with(id, || {
            Vnode::new(
                id,
                size,
                private,
                self.ops.clone(),
                self.kernel.clone(),
                self.cache.clone(),
                Arc::downgrade(&self.vnodes),
            )
        })
    }

    pub fn close(&self, vnode: &Vnode<S>) -> SysResult<()> {
        self.vnodes.dec_ref(vnode.id()).map(|_| ())
    }

    /// Reads from `offset`, stopping at the end of file. Returns the byte
    /// count.
    pub fn read(&self, vnode: &Vnode<S>, offset: usize, buf: &mut [u8]) -> SysResult<usize> {
        let size = vnode.size();
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min(size - offset);
        let Some(CachedVnode { cache, pce }) = &vnode.cached else {
            return vnode.ops().read(vnode.private(), offset, &mut buf[..len]);
        };

        let mut done = 0;
        while done < len {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let count = (PAGE_SIZE - in_page).min(len - done);
            let guard = cache.get(pce, pos / PAGE_SIZE, Span::Page, AccessMode::Read)?;
            buf[done..done + count].copy_from_slice(&guard.bytes()[in_page..in_page + count]);
            cache.put(guard)?;
            done += count;
        }
        log::trace!("[FsBase::read] vnode {} {:#x}+{:#x}", vnode.id(), offset, len);
        Ok(len)
    }

    /// Writes at `offset`, growing the file first when the write ends past
    /// it. Returns the byte count.
    pub fn write(&self, vnode: &Vnode<S>, offset: usize, buf: &[u8]) -> SysResult<usize> {
        let end = offset.checked_add(buf.len()).ok_or(SysError::EFBIG)?;
        let Some(CachedVnode { cache, pce }) = &vnode.cached else {
            let written = vnode.ops().write(vnode.private(), offset, buf)?;
            vnode.grow_to(offset + written)?;
            return Ok(written);
        };
        if buf.is_empty() {
            return Ok(0);
        }
        vnode.grow_to(end)?;

        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let block = in_page / CACHED_BLOCK_SIZE;
            let in_block = in_page % CACHED_BLOCK_SIZE;
            let count = (CACHED_BLOCK_SIZE - in_block).min(buf.len() - done);
            let mut guard = cache.get(pce, pos / PAGE_SIZE, Span::Block(block), AccessMode::Write)?;
            if let Some(bytes) = guard.bytes_mut() {
                bytes[in_block..in_block + count].copy_from_slice(&buf[done..done + count]);
            }
            cache.put(guard)?;
            done += count;
        }
        log::trace!("[FsBase::write] vnode {} {:#x}+{:#x}", vnode.id(), offset, buf.len());
        Ok(buf.len())
    }

    /// Sets the file size. Cached pages past the new end of file are
    /// dropped; the page holding the new end is written out first.
    pub fn ftruncate(&self, vnode: &Vnode<S>, len: usize) -> SysResult<()> {
        if let Some(CachedVnode { cache, pce }) = &vnode.cached {
            let first_dead = page_round_up(len).ok_or(SysError::EFBIG)? / PAGE_SIZE;
            for page_idx in cache.cached_pages(pce) {
                if page_idx >= first_dead {
                    cache.delete(pce, page_idx)?;
                }
            }
            if len % PAGE_SIZE != 0 {
                match cache.evict(pce, len / PAGE_SIZE) {
                    Ok(()) | Err(SysError::ENOENT) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        log::debug!("[FsBase::ftruncate] vnode {} to {:#x}", vnode.id(), len);
        vnode.set_size(len)
    }

    /// Drops the cached pages of a removed file without writing them.
    pub fn unlink(&self, vnode: &Vnode<S>) {
        if let Some(CachedVnode { cache, pce }) = &vnode.cached {
            cache.delete_all_of(pce);
        }
    }

    pub fn fsync(&self, vnode: &Vnode<S>) -> SysResult<()> {
        match &vnode.cached {
            Some(CachedVnode { cache, pce }) => cache.flush_all_of(pce),
            None => Ok(()),
        }
    }

    pub fn sync(&self) -> SysResult<()> {
        match &self.cache {
            Some(cache) => cache.flush_all(),
            None => Ok(()),
        }
    }

    /// Switches the write policy of the cache.
    pub fn set_strategy(&self, strategy: CacheStrategy) -> SysResult<()> {
        match &self.cache {
            Some(cache) => cache.switch_strategy(strategy),
            None => Err(SysError::EINVAL),
        }
    }

    /// Records a mapping of `vnode` for `client` and returns the memory
    /// object the client maps. Pages are only provided on fault.
    ///
    /// # Errors
    /// - [`SysError::EINVAL`] when neither the cache nor the filesystem can
    ///   provide pages, for unknown `prot` or `flags` bits, anonymous
    ///   mappings, an address or file offset off a page boundary, and empty
    ///   ranges.
    /// - [`SysError::EACCES`] for a shared writable mapping of a handle
    ///   opened without write access.
    /// - [`SysError::EEXIST`] if the range overlaps a mapping of the client.
    pub fn fmap(
        &self,
        client: Badge,
        vnode: &Arc<Vnode<S>>,
        writable: bool,
        req: FmapRequest,
    ) -> SysResult<PmoCap> {
        if self.cache.is_none() && !S::FMAP_DIRECT {
            log::error!("[FsBase::fmap] no page provider for vnode {}", vnode.id());
            return Err(SysError::EINVAL);
        }
        let shared = req.flags & MmapFlags::MAP_SHARED.bits() != 0;
        if shared && req.prot & MmapProt::PROT_WRITE.bits() != 0 && !writable {
            return Err(SysError::EACCES);
        }
        let prot = MmapProt::from_bits(req.prot).ok_or(SysError::EINVAL)?;
        let flags = MmapFlags::from_bits(req.flags).ok_or(SysError::EINVAL)?;
        let supported = MmapFlags::MAP_SHARED | MmapFlags::MAP_PRIVATE | MmapFlags::MAP_FIXED_NOREPLACE;
        if flags.contains(MmapFlags::MAP_ANONYMOUS) || !supported.contains(flags) {
            log::debug!("[FsBase::fmap] unsupported flags {:#x}", req.flags);
            return Err(SysError::EINVAL);
        }
        if !req.addr.is_aligned() || req.offset % PAGE_SIZE != 0 {
            log::debug!("[FsBase::fmap] unaligned {:?} offset {:#x}", req.addr, req.offset);
            return Err(SysError::EINVAL);
        }
        let length = page_round_up(req.length).ok_or(SysError::EINVAL)?;

        self.areas
            .insert(client, req.addr, length, vnode.clone(), req.offset, flags, prot)?;
        match vnode.pmo_or_create() {
            Ok((cap, _)) => Ok(cap),
            Err(e) => {
                log::warn!("[FsBase::fmap] cannot create pmo for vnode {}: {:?}", vnode.id(), e);
                self.areas.remove(client, req.addr, length)?;
                Err(e)
            }
        }
    }

    pub fn funmap(&self, client: Badge, addr: VirtAddr, length: usize) -> SysResult<()> {
        let length = page_round_up(length).ok_or(SysError::EINVAL)?;
        self.areas.remove(client, addr, length)
    }

    /// Forgets every mapping of a client that exited.
    pub fn client_exit(&self, client: Badge) -> usize {
        self.areas.recycle(client)
    }

    /// Registers the fault channel with the kernel. The handler still has
    /// to be run or spawned.
    pub fn fault_handler(&self, capacity: usize) -> SysResult<FaultHandler<Vnode<S>, dyn UserFaultKernel>> {
        FaultHandler::register(self.areas.clone(), self.kernel.clone(), capacity)
    }

    /// Starts the periodic write-back sweep, if there is a cache.
    pub fn spawn_write_back(&self) -> SysResult<Option<WriteBackRoutine>> {
        self.cache.as_ref().map(WriteBackRoutine::spawn).transpose()
    }
}
