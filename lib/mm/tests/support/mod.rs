#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering},
    },
};

use config::mm::PAGE_SIZE;
use mm::{
    address::VirtAddr,
    fmap::{Badge, FaultSender, FmapFile, PmoCap, UserFaultKernel},
    page_cache::{
        CacheStrategy, EntityEvent, PageCache, PageCacheBackend, PageCacheConfig, PageIdx, Span,
    },
};
use systype::{SysError, SysResult, memory_flags::MappingFlags};

/// Files kept in memory, with every backend call recorded.
#[derive(Default)]
pub struct MemBackend {
    pub files: Mutex<HashMap<u64, Vec<u8>>>,
    pub writes: Mutex<Vec<(u64, PageIdx, Span)>>,
    pub events: Mutex<Vec<(u64, EntityEvent)>>,
    pub reads: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MemBackend {
    pub fn content(&self, file: u64) -> Vec<u8> {
        self.files.lock().unwrap().get(&file).cloned().unwrap_or_default()
    }

    pub fn set_content(&self, file: u64, data: &[u8]) {
        self.files.lock().unwrap().insert(file, data.to_vec());
    }

    pub fn writes(&self) -> Vec<(u64, PageIdx, Span)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<(u64, EntityEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl PageCacheBackend for MemBackend {
    type Context = u64;

    fn read_page(&self, ctx: &u64, page_idx: PageIdx, buf: &mut [u8]) -> SysResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SysError::EIO);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        buf.fill(0);
        let files = self.files.lock().unwrap();
        if let Some(data) = files.get(ctx) {
            let start = (page_idx * PAGE_SIZE).min(data.len());
            let end = (start + PAGE_SIZE).min(data.len());
            buf[..end - start].copy_from_slice(&data[start..end]);
        }
        Ok(())
    }

    fn write_block(&self, ctx: &u64, page_idx: PageIdx, span: Span, buf: &[u8]) -> SysResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SysError::EIO);
        }
        let mut files = self.files.lock().unwrap();
        let data = files.entry(*ctx).or_default();
        let start = page_idx * PAGE_SIZE + span.range().start;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.writes.lock().unwrap().push((*ctx, page_idx, span));
        Ok(())
    }

    fn on_entity_event(&self, ctx: &u64, event: EntityEvent) {
        self.events.lock().unwrap().push((*ctx, event));
    }
}

pub fn small_config(strategy: CacheStrategy, active: usize, inactive: usize, pinned: usize) -> PageCacheConfig {
    PageCacheConfig {
        strategy,
        active_max: active,
        inactive_max: inactive,
        pinned_max: pinned,
        ..PageCacheConfig::default()
    }
}

pub fn new_cache(config: PageCacheConfig) -> Arc<PageCache<MemBackend>> {
    PageCache::new(MemBackend::default(), config).unwrap()
}

/// A mapped file whose pages sit at fixed fake server addresses.
pub struct MockFile {
    pub size: Mutex<usize>,
    pub base: usize,
    pub refs: AtomicIsize,
    pub fail: AtomicBool,
}

impl MockFile {
    pub fn new(size: usize, base: usize) -> Arc<Self> {
        Arc::new(Self {
            size: Mutex::new(size),
            base,
            refs: AtomicIsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    pub fn refs(&self) -> isize {
        self.refs.load(Ordering::SeqCst)
    }
}

impl FmapFile for MockFile {
    fn size(&self) -> usize {
        *self.size.lock().unwrap()
    }

    fn page_addr(&self, offset: usize) -> SysResult<VirtAddr> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SysError::EIO);
        }
        Ok(VirtAddr::new(self.base + offset))
    }

    fn grow_to(&self, size: usize) -> SysResult<()> {
        let mut cur = self.size.lock().unwrap();
        *cur = (*cur).max(size);
        Ok(())
    }

    fn get_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn put_ref(&self) {
        self.refs.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    pub client: Badge,
    pub va: VirtAddr,
    pub server_page: VirtAddr,
    pub copy: bool,
    pub perm: MappingFlags,
}

/// Records what the pipeline asks of the kernel.
#[derive(Default)]
pub struct MockKernel {
    pub sender: Mutex<Option<FaultSender>>,
    pub installed: Mutex<Vec<Installed>>,
    pub failures: Mutex<Vec<(Badge, VirtAddr, SysError)>>,
    pub pmos: Mutex<Vec<usize>>,
}

impl MockKernel {
    /// Plays the kernel side: queues one fault.
    pub fn post_fault(&self, client: Badge, va: usize) {
        let mut sender = self.sender.lock().unwrap();
        let sender = sender.as_mut().expect("fault channel not registered");
        sender
            .send(mm::fmap::UserFaultMsg {
                client,
                fault_va: VirtAddr::new(va),
            })
            .expect("fault ring full");
    }

    pub fn close_channel(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn installed(&self) -> Vec<Installed> {
        self.installed.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<(Badge, VirtAddr, SysError)> {
        self.failures.lock().unwrap().clone()
    }
}

impl UserFaultKernel for MockKernel {
    fn register_fault_channel(&self, sender: FaultSender) -> SysResult<()> {
        let mut slot = self.sender.lock().unwrap();
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
        self.installed.lock().unwrap().push(Installed {
            client,
            va,
            server_page,
            copy,
            perm,
        });
        Ok(())
    }

    fn report_fault_failure(&self, client: Badge, va: VirtAddr, err: SysError) {
        self.failures.lock().unwrap().push((client, va, err));
    }

    fn create_pmo(&self, size: usize) -> SysResult<PmoCap> {
        let mut pmos = self.pmos.lock().unwrap();
        pmos.push(size);
        Ok(pmos.len())
    }

    fn resize_pmo(&self, cap: PmoCap, size: usize) -> SysResult<()> {
        let mut pmos = self.pmos.lock().unwrap();
        let pmo = pmos.get_mut(cap - 1).ok_or(SysError::EINVAL)?;
        *pmo = size;
        Ok(())
    }
}
