use alloc::sync::Arc;

use mutex::{ArcReadGuard, ArcWriteGuard};

use super::{
    entity::PageCacheEntity,
    page::{CachedPage, PageIdx, Span},
};
use crate::address::VirtAddr;

/// How a page is locked between `get` and `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

pub(crate) enum Locked {
    Read(ArcReadGuard<CachedPage>),
    Write(ArcWriteGuard<CachedPage>),
}

impl Locked {
    pub fn page(&self) -> &CachedPage {
        match self {
            Locked::Read(g) => &**g,
            Locked::Write(g) => &**g,
        }
    }
}

/// A locked span of a cached page, returned by
/// [`PageCache::get`](super::PageCache::get) and handed back to
/// [`PageCache::put`](super::PageCache::put).
///
/// Dropping a write guard without `put` still marks the span dirty, but
/// skips the write policy.
pub struct PageGuard<C> {
    pub(crate) locked: Option<Locked>,
    pub(crate) pce: Arc<PageCacheEntity<C>>,
    pub(crate) page_idx: PageIdx,
    pub(crate) span: Span,
}

impl<C> PageGuard<C> {
    pub(crate) fn page(&self) -> &CachedPage {
        match &self.locked {
            Some(locked) => locked.page(),
            None => unreachable!("page guard used after release"),
        }
    }

    pub fn mode(&self) -> AccessMode {
        match self.locked {
            Some(Locked::Write(_)) => AccessMode::Write,
            _ => AccessMode::Read,
        }
    }

    pub fn entity(&self) -> &Arc<PageCacheEntity<C>> {
        &self.pce
    }

    pub fn page_idx(&self) -> PageIdx {
        self.page_idx
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn bytes(&self) -> &[u8] {
        self.page().bytes(self.span)
    }

    /// Writable bytes of the span, `None` for a read guard.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        let span = self.span;
        match &mut self.locked {
            Some(Locked::Write(g)) => Some(g.bytes_mut(span)),
            _ => None,
        }
    }

    /// Server address of the span, valid while the page stays resident.
    pub fn addr(&self) -> VirtAddr {
        self.page().addr(self.span)
    }

    pub(crate) fn mark_dirty(&self) {
        if let Some(Locked::Write(g)) = &self.locked {
            g.mark_dirty(self.span.blocks());
        }
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = None;
    }

    /// Unlocks the page.
    pub(crate) fn release(&mut self) {
        self.mark_dirty();
        self.locked = None;
    }
}

impl<C> Drop for PageGuard<C> {
    fn drop(&mut self) {
        self.release();
    }
}
