//! Per-file page directory of the cache.

use alloc::{sync::Arc, vec::Vec};

use hashbrown::HashMap;
use mutex::SpinLock;

use super::{
    page::PageIdx,
    slots::{LinkKind, PageId, PageList, PageSlots},
};

/// Reported to the backend when an entity gains its first resident page or
/// loses its last one.
///
/// The backend typically holds a reference on its file object between the
/// two events, so the file stays alive exactly as long as cached content
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityEvent {
    TurnsNonEmpty,
    TurnsEmpty,
}

/// The page directory of one cached file.
///
/// Holds the backend context handed back on every backend call for pages of
/// this file. The directory itself is only touched by the cache while the
/// cache lock is held.
pub struct PageCacheEntity<C> {
    host_idx: u64,
    ctx: C,
    index: SpinLock<EntityIndex>,
}

#[derive(Default)]
pub(crate) struct EntityIndex {
    pages: HashMap<PageIdx, PageId>,
    list: PageList,
    count: usize,
}

impl<C> PageCacheEntity<C> {
    pub fn new(host_idx: u64, ctx: C) -> Arc<Self> {
        Arc::new(Self {
            host_idx,
            ctx,
            index: SpinLock::new(EntityIndex::default()),
        })
    }

    /// Identity of the file on its host filesystem.
    pub fn host_idx(&self) -> u64 {
        self.host_idx
    }

    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    /// Number of pages of this file resident in the cache.
    pub fn page_count(&self) -> usize {
        self.index.lock().count()
    }

    pub(crate) fn index(&self) -> impl core::ops::DerefMut<Target = EntityIndex> + '_ {
        self.index.lock()
    }
}

impl<C> core::fmt::Debug for PageCacheEntity<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageCacheEntity")
            .field("host_idx", &self.host_idx)
            .finish_non_exhaustive()
    }
}

impl EntityIndex {
    pub fn lookup(&self, idx: PageIdx) -> Option<PageId> {
        self.pages.get(&idx).copied()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Records a newly linked page.
    pub fn attach<C>(&mut self, slots: &mut PageSlots<C>, idx: PageIdx, id: PageId) -> Option<EntityEvent> {
        debug_assert!(!self.pages.contains_key(&idx));
        self.pages.insert(idx, id);
        slots.push_back(&mut self.list, id, LinkKind::Entity);
        self.count += 1;
        self.check();
        (self.count == 1).then_some(EntityEvent::TurnsNonEmpty)
    }

    /// Forgets a page that is about to be freed.
    pub fn detach<C>(&mut self, slots: &mut PageSlots<C>, idx: PageIdx, id: PageId) -> Option<EntityEvent> {
        let removed = self.pages.remove(&idx);
        debug_assert_eq!(removed, Some(id));
        slots.unlink(&mut self.list, id, LinkKind::Entity);
        self.count -= 1;
        self.check();
        (self.count == 0).then_some(EntityEvent::TurnsEmpty)
    }

    /// Pages in the order they were cached.
    pub fn ids<C>(&self, slots: &PageSlots<C>) -> Vec<PageId> {
        slots.collect(&self.list, LinkKind::Entity)
    }

    pub fn page_indices(&self) -> Vec<PageIdx> {
        let mut indices: Vec<_> = self.pages.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    fn check(&self) {
        debug_assert_eq!(self.count, self.pages.len());
        debug_assert_eq!(self.count, self.list.len());
    }
}
