//! Shared page cache of the file server.
//!
//! Pages of every open file live in one arena and sit in exactly one of
//! three shared queues:
//! - `inactive`: pages touched once. A miss appends here, evicting the
//!   queue head first when the queue is full.
//! - `active`: pages touched again. A hit on an inactive page moves it
//!   here; overflow demotes the active head back to the inactive tail,
//!   and overflow of the inactive queue then evicts its head.
//! - `pinned`: pages kept resident until unpinned. Hits do not move them.
//!
//! Each page is also reachable from the [`PageCacheEntity`] of its file.
//! All queue and entity bookkeeping happens under one cache lock; page
//! bytes are guarded by a per-page rwlock taken after the cache lock is
//! released. Eviction takes a page's write lock while holding the cache
//! lock, so a thread holding a [`PageGuard`] must `put` it before calling
//! any operation that may evict pages.

mod backend;
mod entity;
mod guard;
mod page;
mod slots;
mod writeback;

use alloc::{sync::Arc, vec::Vec};
use core::{
    sync::atomic::{AtomicU8, AtomicUsize, Ordering},
    time::Duration,
};

use config::fs::{ACTIVE_LIST_MAX, INACTIVE_LIST_MAX, MAX_PINNED_PAGE, WRITE_BACK_CYCLE};
use mutex::{SpinLock, SpinRwLock};
use strum::{Display, EnumString};
use systype::{SysError, SysResult};

pub use backend::PageCacheBackend;
pub use entity::{EntityEvent, PageCacheEntity};
pub use guard::{AccessMode, PageGuard};
use guard::Locked;
pub use page::{CachedPage, DirtyBlocks, PageIdx, Span};
use slots::{LinkKind, PageId, PageList, PageSlots, Slot};
pub use slots::QueueKind;
pub use writeback::WriteBackRoutine;

/// When dirty bytes reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum CacheStrategy {
    /// Write on `put` and drop the page right away.
    Direct = 0,
    /// Write on `put`, keep the page.
    WriteThrough = 1,
    /// Only mark dirty; the periodic sweep writes.
    WriteBack = 2,
}

impl CacheStrategy {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CacheStrategy::Direct,
            1 => CacheStrategy::WriteThrough,
            _ => CacheStrategy::WriteBack,
        }
    }
}

/// Start-up parameters of a [`PageCache`].
#[derive(Debug, Clone)]
pub struct PageCacheConfig {
    pub strategy: CacheStrategy,
    pub active_max: usize,
    pub inactive_max: usize,
    pub pinned_max: usize,
    pub write_back_cycle: Duration,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::WriteBack,
            active_max: ACTIVE_LIST_MAX,
            inactive_max: INACTIVE_LIST_MAX,
            pinned_max: MAX_PINNED_PAGE,
            write_back_cycle: WRITE_BACK_CYCLE,
        }
    }
}

/// Counters since the cache was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageCacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Pages flushed and freed, whatever triggered it.
    pub evictions: usize,
    /// Calls to [`PageCacheBackend::write_block`].
    pub write_backs: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    evictions: AtomicUsize,
    write_backs: AtomicUsize,
}

struct CacheInner<C> {
    slots: PageSlots<C>,
    queues: [PageList; 3],
}

type PageRef = Arc<SpinRwLock<CachedPage>>;
type EntityRef<B> = Arc<PageCacheEntity<<B as PageCacheBackend>::Context>>;

pub struct PageCache<B: PageCacheBackend> {
    backend: B,
    config: PageCacheConfig,
    strategy: AtomicU8,
    inner: SpinLock<CacheInner<B::Context>>,
    counters: Counters,
}

impl<B: PageCacheBackend> PageCache<B> {
    /// Creates a cache on top of `backend`.
    ///
    /// # Errors
    /// Returns [`SysError::EINVAL`] if a queue bound is zero.
    pub fn new(backend: B, config: PageCacheConfig) -> SysResult<Arc<Self>> {
        if config.active_max == 0 || config.inactive_max == 0 || config.pinned_max == 0 {
            return Err(SysError::EINVAL);
        }
        log::info!(
            "[PageCache::new] {} cache, bounds {}/{}/{}",
            config.strategy,
            config.active_max,
            config.inactive_max,
            config.pinned_max
        );
        Ok(Arc::new(Self {
            backend,
            strategy: AtomicU8::new(config.strategy as u8),
            config,
            inner: SpinLock::new(CacheInner {
                slots: PageSlots::new(),
                queues: Default::default(),
            }),
            counters: Counters::default(),
        }))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &PageCacheConfig {
        &self.config
    }

    pub fn strategy(&self) -> CacheStrategy {
        CacheStrategy::from_u8(self.strategy.load(Ordering::SeqCst))
    }

    /// Changes the write policy. Leaving write-back flushes every dirty page.
    pub fn switch_strategy(&self, strategy: CacheStrategy) -> SysResult<()> {
        let old = CacheStrategy::from_u8(self.strategy.swap(strategy as u8, Ordering::SeqCst));
        log::info!("[PageCache::switch_strategy] {} -> {}", old, strategy);
        if old == CacheStrategy::WriteBack && strategy != CacheStrategy::WriteBack {
            self.flush_all()?;
        }
        Ok(())
    }

    /// Locks `span` of page `page_idx`, reading the page in on a miss.
    ///
    /// # Errors
    /// - [`SysError::EINVAL`] for a sub-block past the page end.
    /// - [`SysError::ENOMEM`] if a new page cannot be allocated.
    /// - The backend error if reading the page in or evicting a victim fails.
    pub fn get(
        &self,
        pce: &EntityRef<B>,
        page_idx: PageIdx,
        span: Span,
        mode: AccessMode,
    ) -> SysResult<PageGuard<B::Context>> {
        let span = span.check()?;
        loop {
            let page = self.find_or_new_page(pce, page_idx, true)?;
            let locked = match mode {
                AccessMode::Read => Locked::Read(page.read_arc()),
                AccessMode::Write => Locked::Write(page.write_arc()),
            };
            if locked.page().detached {
                log::trace!(
                    "[PageCache::get] page {} of file {} dropped while waiting, retry",
                    page_idx,
                    pce.host_idx()
                );
                continue;
            }
            return Ok(PageGuard {
                locked: Some(locked),
                pce: pce.clone(),
                page_idx,
                span,
            });
        }
    }

    /// Unlocks a page taken by [`get`](Self::get) and applies the write
    /// policy to a write guard.
    pub fn put(&self, mut guard: PageGuard<B::Context>) -> SysResult<()> {
        if guard.mode() == AccessMode::Read {
            return Ok(());
        }
        let strategy = self.strategy();
        guard.mark_dirty();
        let written = match strategy {
            CacheStrategy::WriteBack => Ok(()),
            _ => self.write_out(guard.pce.ctx(), guard.page(), guard.span.blocks()),
        };
        // Dirty flags are settled, unlock without marking again.
        guard.unlock();
        written?;
        if strategy == CacheStrategy::Direct {
            match self.evict(&guard.pce, guard.page_idx) {
                Ok(()) | Err(SysError::ENOENT) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Writes the dirty blocks of `span` of a resident page.
    pub fn flush(&self, pce: &EntityRef<B>, page_idx: PageIdx, span: Span) -> SysResult<()> {
        let span = span.check()?;
        let page = {
            let inner = self.inner.lock();
            let found = pce.index().lookup(page_idx);
            match found {
                Some(id) => inner.slots[id].page.clone(),
                None => return Err(SysError::ENOENT),
            }
        };
        let locked = page.read();
        if locked.detached {
            return Ok(());
        }
        self.write_out(pce.ctx(), &locked, span.blocks())
    }

    /// Writes every dirty page of one file. Keeps going past a failing page
    /// and returns the first error.
    pub fn flush_all_of(&self, pce: &EntityRef<B>) -> SysResult<()> {
        let pages: Vec<_> = {
            let inner = self.inner.lock();
            let ids = pce.index().ids(&inner.slots);
            ids.into_iter()
                .map(|id| (pce.clone(), inner.slots[id].page.clone()))
                .collect()
        };
        self.flush_pages(pages)
    }

    /// Writes every dirty page of the active, inactive and pinned queues.
    pub fn flush_all(&self) -> SysResult<()> {
        let pages: Vec<_> = {
            let inner = self.inner.lock();
            QueueKind::ALL
                .iter()
                .flat_map(|kind| inner.slots.collect(&inner.queues[kind.index()], LinkKind::Queue))
                .map(|id| (inner.slots[id].owner.clone(), inner.slots[id].page.clone()))
                .collect()
        };
        self.flush_pages(pages)
    }

    /// One pass of the periodic sweep: under write-back, writes every dirty
    /// page without evicting any.
    pub fn write_back_once(&self) -> SysResult<()> {
        if self.strategy() != CacheStrategy::WriteBack {
            return Ok(());
        }
        log::debug!("[write_back_once] sweeping {} pages", self.resident_pages());
        self.flush_all()
    }

    /// Moves a page, reading it in if needed, to the pinned queue.
    ///
    /// # Errors
    /// Returns [`SysError::ENOSPC`] when the pinned queue is full, plus the
    /// errors of [`get`](Self::get) for a page that is not resident.
    pub fn pin(&self, pce: &EntityRef<B>, page_idx: PageIdx) -> SysResult<()> {
        loop {
            {
                let mut inner = self.inner.lock();
                let found = pce.index().lookup(page_idx);
                let pinned = inner.queues[QueueKind::Pinned.index()].len();
                match found {
                    Some(id) if inner.slots[id].queue == QueueKind::Pinned => return Ok(()),
                    _ if pinned >= self.config.pinned_max => {
                        log::warn!("[PageCache::pin] pinned queue full ({} pages)", pinned);
                        return Err(SysError::ENOSPC);
                    }
                    Some(id) => {
                        move_queue(&mut *inner, id, QueueKind::Pinned);
                        log::trace!("[PageCache::pin] page {} of file {}", page_idx, pce.host_idx());
                        return Ok(());
                    }
                    None => {}
                }
            }
            self.find_or_new_page(pce, page_idx, false)?;
        }
    }

    /// Pins `count` consecutive pages, stopping at the first failure.
    /// A range running past the largest page index is [`SysError::EINVAL`].
    pub fn pin_range(&self, pce: &EntityRef<B>, page_idx: PageIdx, count: usize) -> SysResult<()> {
        let end = page_idx.checked_add(count).ok_or(SysError::EINVAL)?;
        (page_idx..end).try_for_each(|idx| self.pin(pce, idx))
    }

    /// Flushes and frees a pinned page.
    ///
    /// # Errors
    /// [`SysError::ENOENT`] if the page is not resident, [`SysError::EINVAL`]
    /// if it is not pinned, or the backend error of the flush.
    pub fn unpin(&self, pce: &EntityRef<B>, page_idx: PageIdx) -> SysResult<()> {
        let mut inner = self.inner.lock();
        let id = pce.index().lookup(page_idx).ok_or(SysError::ENOENT)?;
        if inner.slots[id].queue != QueueKind::Pinned {
            return Err(SysError::EINVAL);
        }
        self.flush_and_free(&mut *inner, id)
    }

    /// Unpins `count` consecutive pages, stopping at the first failure.
    pub fn unpin_range(&self, pce: &EntityRef<B>, page_idx: PageIdx, count: usize) -> SysResult<()> {
        let end = page_idx.checked_add(count).ok_or(SysError::EINVAL)?;
        (page_idx..end).try_for_each(|idx| self.unpin(pce, idx))
    }

    /// Flushes and frees a page whatever queue it is in. A failing flush
    /// leaves the page resident.
    pub fn evict(&self, pce: &EntityRef<B>, page_idx: PageIdx) -> SysResult<()> {
        let mut inner = self.inner.lock();
        let id = pce.index().lookup(page_idx).ok_or(SysError::ENOENT)?;
        self.flush_and_free(&mut *inner, id)
    }

    /// Flushes and frees every page of one file, stopping at the first
    /// failing flush.
    pub fn evict_all_of(&self, pce: &EntityRef<B>) -> SysResult<()> {
        let mut inner = self.inner.lock();
        let ids = pce.index().ids(&inner.slots);
        ids.into_iter()
            .try_for_each(|id| self.flush_and_free(&mut *inner, id))
    }

    /// Frees a page without writing its dirty blocks.
    pub fn delete(&self, pce: &EntityRef<B>, page_idx: PageIdx) -> SysResult<()> {
        let mut inner = self.inner.lock();
        let id = pce.index().lookup(page_idx).ok_or(SysError::ENOENT)?;
        self.drop_page(&mut *inner, id);
        Ok(())
    }

    /// Frees every page of one file without writing anything.
    pub fn delete_all_of(&self, pce: &EntityRef<B>) {
        let mut inner = self.inner.lock();
        let ids = pce.index().ids(&inner.slots);
        log::debug!("[PageCache::delete_all_of] file {}, {} pages", pce.host_idx(), ids.len());
        for id in ids {
            self.drop_page(&mut *inner, id);
        }
    }

    /// Whether page `page_idx` of the file is resident.
    pub fn check_page(&self, pce: &EntityRef<B>, page_idx: PageIdx) -> bool {
        let _inner = self.inner.lock();
        pce.index().lookup(page_idx).is_some()
    }

    /// Resident page indices of one file, ascending.
    pub fn cached_pages(&self, pce: &EntityRef<B>) -> Vec<PageIdx> {
        let _inner = self.inner.lock();
        pce.index().page_indices()
    }

    /// The queue a resident page sits in.
    pub fn queue_of(&self, pce: &EntityRef<B>, page_idx: PageIdx) -> Option<QueueKind> {
        let inner = self.inner.lock();
        let found = pce.index().lookup(page_idx);
        found.map(|id| inner.slots[id].queue)
    }

    pub fn queue_len(&self, kind: QueueKind) -> usize {
        self.inner.lock().queues[kind.index()].len()
    }

    pub fn resident_pages(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn stats(&self) -> PageCacheStats {
        PageCacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            write_backs: self.counters.write_backs.load(Ordering::Relaxed),
        }
    }

    /// Resolves page `page_idx`, reading it in on a miss. The returned page
    /// is filled but not locked.
    fn find_or_new_page(&self, pce: &EntityRef<B>, page_idx: PageIdx, touch: bool) -> SysResult<PageRef> {
        let mut inner = self.inner.lock();
        let found = pce.index().lookup(page_idx);
        if let Some(id) = found {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            let page = inner.slots[id].page.clone();
            if touch {
                self.touch(&mut *inner, id)?;
            }
            return Ok(page);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let page = Arc::new(SpinRwLock::new(CachedPage::try_new(page_idx)?));
        if inner.queues[QueueKind::Inactive.index()].len() >= self.config.inactive_max {
            self.evict_head(&mut *inner, QueueKind::Inactive)?;
        }
        let id = inner
            .slots
            .insert(Slot::new(page.clone(), pce.clone(), page_idx, QueueKind::Inactive))?;
        {
            let CacheInner { slots, queues } = &mut *inner;
            slots.push_back(&mut queues[QueueKind::Inactive.index()], id, LinkKind::Queue);
            let event = pce.index().attach(slots, page_idx, id);
            self.dispatch(pce, event);
        }
        log::trace!("[find_or_new_page] miss on page {} of file {}", page_idx, pce.host_idx());

        // Nobody else can reach the page before the cache lock is dropped,
        // so the fill lock is free.
        let mut filling = page.write_arc();
        drop(inner);
        if let Err(e) = self.backend.read_page(pce.ctx(), page_idx, filling.content_mut()) {
            log::warn!(
                "[find_or_new_page] reading page {} of file {} failed: {:?}",
                page_idx,
                pce.host_idx(),
                e
            );
            filling.detached = true;
            drop(filling);
            self.discard(pce, page_idx, &page);
            return Err(e);
        }
        Ok(page)
    }

    /// Records a hit on a resident page.
    fn touch(&self, inner: &mut CacheInner<B::Context>, id: PageId) -> SysResult<()> {
        match inner.slots[id].queue {
            QueueKind::Pinned => Ok(()),
            QueueKind::Active => {
                let CacheInner { slots, queues } = inner;
                slots.move_to_back(&mut queues[QueueKind::Active.index()], id, LinkKind::Queue);
                Ok(())
            }
            QueueKind::Inactive => {
                move_queue(inner, id, QueueKind::Active);
                if inner.queues[QueueKind::Active.index()].len() > self.config.active_max {
                    if let Some(cold) = inner.queues[QueueKind::Active.index()].head() {
                        move_queue(inner, cold, QueueKind::Inactive);
                    }
                    if inner.queues[QueueKind::Inactive.index()].len() > self.config.inactive_max {
                        self.evict_head(inner, QueueKind::Inactive)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn evict_head(&self, inner: &mut CacheInner<B::Context>, kind: QueueKind) -> SysResult<()> {
        match inner.queues[kind.index()].head() {
            Some(id) => self.flush_and_free(inner, id).inspect_err(|e| {
                log::error!("[evict_head] cannot evict from {:?} queue: {:?}", kind, e);
            }),
            None => Ok(()),
        }
    }

    /// Writes the page out and frees it, waiting for its users first.
    fn flush_and_free(&self, inner: &mut CacheInner<B::Context>, id: PageId) -> SysResult<()> {
        let page = inner.slots[id].page.clone();
        let owner = inner.slots[id].owner.clone();
        let mut locked = page.write();
        self.write_out(owner.ctx(), &locked, DirtyBlocks::all())?;
        locked.detached = true;
        drop(locked);
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        self.free_slot(inner, id);
        Ok(())
    }

    /// Frees the page, dropping whatever is dirty in it.
    fn drop_page(&self, inner: &mut CacheInner<B::Context>, id: PageId) {
        let page = inner.slots[id].page.clone();
        let mut locked = page.write();
        let lost = locked.take_dirty(DirtyBlocks::all());
        if !lost.is_empty() {
            log::debug!(
                "[drop_page] page {} dropped with dirty blocks {:?}",
                locked.file_page_idx(),
                lost
            );
        }
        locked.detached = true;
        drop(locked);
        self.free_slot(inner, id);
    }

    /// Unlinks the page from its entity, then from its queue, and releases
    /// the slot.
    fn free_slot(&self, inner: &mut CacheInner<B::Context>, id: PageId) {
        let CacheInner { slots, queues } = inner;
        let owner = slots[id].owner.clone();
        let page_idx = slots[id].file_page_idx;
        let queue = slots[id].queue;
        let event = owner.index().detach(slots, page_idx, id);
        slots.unlink(&mut queues[queue.index()], id, LinkKind::Queue);
        slots.remove(id);
        self.dispatch(&owner, event);
    }

    /// Frees a page whose fill failed, unless it is already gone.
    fn discard(&self, pce: &EntityRef<B>, page_idx: PageIdx, page: &PageRef) {
        let mut inner = self.inner.lock();
        let found = pce.index().lookup(page_idx);
        if let Some(id) = found {
            if Arc::ptr_eq(&inner.slots[id].page, page) {
                self.free_slot(&mut *inner, id);
            }
        }
    }

    fn dispatch(&self, pce: &EntityRef<B>, event: Option<EntityEvent>) {
        if let Some(event) = event {
            log::debug!("[PageCache] file {} {:?}", pce.host_idx(), event);
            self.backend.on_entity_event(pce.ctx(), event);
        }
    }

    fn flush_pages(&self, pages: Vec<(EntityRef<B>, PageRef)>) -> SysResult<()> {
        let mut first_err = None;
        for (owner, page) in pages {
            let locked = page.read();
            if locked.detached {
                continue;
            }
            if let Err(e) = self.write_out(owner.ctx(), &locked, DirtyBlocks::all()) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Writes the dirty ones among `blocks` to the backend: the whole page
    /// in one call when every block is dirty, block by block otherwise.
    /// Blocks not written stay dirty.
    fn write_out(&self, ctx: &B::Context, page: &CachedPage, blocks: DirtyBlocks) -> SysResult<()> {
        let dirty = page.take_dirty(blocks);
        if dirty.is_empty() {
            return Ok(());
        }
        let page_idx = page.file_page_idx();
        if dirty == DirtyBlocks::all() {
            self.counters.write_backs.fetch_add(1, Ordering::Relaxed);
            return self
                .backend
                .write_block(ctx, page_idx, Span::Page, page.bytes(Span::Page))
                .inspect_err(|_| page.mark_dirty(dirty));
        }
        let mut left = dirty;
        for block in dirty.blocks() {
            let span = Span::Block(block);
            self.counters.write_backs.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.backend.write_block(ctx, page_idx, span, page.bytes(span)) {
                log::error!("[write_out] page {} block {}: {:?}", page_idx, block, e);
                page.mark_dirty(left);
                return Err(e);
            }
            left.remove(DirtyBlocks::block(block));
        }
        Ok(())
    }
}

impl<B: PageCacheBackend> Drop for PageCache<B> {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            log::error!("[PageCache::drop] pages lost on shutdown: {:?}", e);
        }
    }
}

/// Moves a resident page to the tail of another queue.
fn move_queue<C>(inner: &mut CacheInner<C>, id: PageId, to: QueueKind) {
    let CacheInner { slots, queues } = inner;
    let from = slots[id].queue;
    slots.unlink(&mut queues[from.index()], id, LinkKind::Queue);
    slots[id].queue = to;
    slots.push_back(&mut queues[to.index()], id, LinkKind::Queue);
}
