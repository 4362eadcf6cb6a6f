use alloc::sync::{Arc, Weak};

use config::mm::PAGE_SIZE;
use mm::{
    address::VirtAddr,
    fmap::{FmapFile, PmoCap, UserFaultKernel},
    page_cache::{AccessMode, PageCacheEntity, Span},
};
use mutex::SpinLock;
use systype::{SysError, SysResult};

use crate::{
    cache::{FsPageCache, VnodeCtx},
    ops::ServerOps,
    table::VnodeTable,
};

pub type VnodeId = u64;

pub(crate) struct CachedVnode<S: ServerOps> {
    pub cache: Arc<FsPageCache<S>>,
    pub pce: Arc<PageCacheEntity<VnodeCtx<S>>>,
}

/// A file as the base layer tracks it: its size, the filesystem's private
/// state, and its page directory in the cache when caching is on.
pub struct Vnode<S: ServerOps> {
    id: VnodeId,
    size: SpinLock<usize>,
    private: Arc<S::Private>,
    ops: Arc<S>,
    kernel: Arc<dyn UserFaultKernel>,
    pub(crate) cached: Option<CachedVnode<S>>,
    pmo_cap: SpinLock<Option<PmoCap>>,
    table: Weak<VnodeTable<S>>,
}

impl<S: ServerOps> Vnode<S> {
    pub(crate) fn new(
        id: VnodeId,
        size: usize,
        private: S::Private,
        ops: Arc<S>,
        kernel: Arc<dyn UserFaultKernel>,
        cache: Option<Arc<FsPageCache<S>>>,
        table: Weak<VnodeTable<S>>,
    ) -> Arc<Self> {
        let private = Arc::new(private);
        let cached = cache.map(|cache| CachedVnode {
            pce: PageCacheEntity::new(
                id,
                VnodeCtx {
                    vnode_id: id,
                    private: private.clone(),
                },
            ),
            cache,
        });
        Arc::new(Self {
            id,
            size: SpinLock::new(size),
            private,
            ops,
            kernel,
            cached,
            pmo_cap: SpinLock::new(None),
            table,
        })
    }

    pub fn id(&self) -> VnodeId {
        self.id
    }

    pub fn private(&self) -> &S::Private {
        &self.private
    }

    pub fn pmo_cap(&self) -> Option<PmoCap> {
        *self.pmo_cap.lock()
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    pub(crate) fn ops(&self) -> &S {
        &self.ops
    }

    /// Truncates or extends the file and records the new size.
    pub(crate) fn set_size(&self, len: usize) -> SysResult<()> {
        {
            let mut size = self.size.lock();
            self.ops.ftruncate(&self.private, len)?;
            *size = len;
        }
        self.resize_pmo(len)
    }

    /// Returns the memory object of the file, creating it on first use.
    /// The flag tells whether it was created by this call.
    pub(crate) fn pmo_or_create(&self) -> SysResult<(PmoCap, bool)> {
        let mut pmo_cap = self.pmo_cap.lock();
        if let Some(cap) = *pmo_cap {
            return Ok((cap, false));
        }
        let cap = self.kernel.create_pmo(self.size())?;
        log::debug!("[Vnode::pmo_or_create] vnode {}: pmo {}", self.id, cap);
        *pmo_cap = Some(cap);
        Ok((cap, true))
    }

    fn resize_pmo(&self, len: usize) -> SysResult<()> {
        let cap = self.pmo_cap();
        match cap {
            Some(cap) => self.kernel.resize_pmo(cap, len),
            None => Ok(()),
        }
    }
}

impl<S: ServerOps> FmapFile for Vnode<S> {
    fn size(&self) -> usize {
        *self.size.lock()
    }

    fn page_addr(&self, offset: usize) -> SysResult<VirtAddr> {
        match &self.cached {
            Some(CachedVnode { cache, pce }) => {
                let guard = cache.get(pce, offset / PAGE_SIZE, Span::Page, AccessMode::Read)?;
                let addr = guard.addr();
                cache.put(guard)?;
                Ok(addr)
            }
            None if S::FMAP_DIRECT => self.ops.fmap_get_page_addr(&self.private, offset),
            None => Err(SysError::EINVAL),
        }
    }

    fn grow_to(&self, size: usize) -> SysResult<()> {
        {
            let mut cur = self.size.lock();
            if size <= *cur {
                return Ok(());
            }
            log::debug!("[Vnode::grow_to] vnode {}: {:#x} -> {:#x}", self.id, *cur, size);
            self.ops.ftruncate(&self.private, size)?;
            *cur = size;
        }
        self.resize_pmo(size)
    }

    fn get_ref(&self) {
        if let Some(table) = self.table.upgrade() {
            if let Err(e) = table.inc_ref(self.id) {
                log::warn!("[Vnode::get_ref] vnode {}: {:?}", self.id, e);
            }
        }
    }

    fn put_ref(&self) {
        if let Some(table) = self.table.upgrade() {
            if let Err(e) = table.dec_ref(self.id) {
                log::warn!("[Vnode::put_ref] vnode {}: {:?}", self.id, e);
            }
        }
    }
}

impl<S: ServerOps> core::fmt::Debug for Vnode<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vnode")
            .field("id", &self.id)
            .field("size", &self.size())
            .field("cached", &self.is_cached())
            .finish_non_exhaustive()
    }
}
