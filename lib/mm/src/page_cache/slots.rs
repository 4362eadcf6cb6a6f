//! Page arena of the cache.
//!
//! Every resident page lives in one slot and is named by its [`PageId`].
//! A slot carries two links: one for the shared queue the page sits in and
//! one for the page list of its owning entity. Lists store ids only, so
//! unlinking never chases a freed page.

use alloc::{sync::Arc, vec::Vec};
use core::ops::{Index, IndexMut};

use id_allocator::{IdAllocator, VecIdAllocator};
use mutex::SpinRwLock;
use systype::{SysError, SysResult};

use super::{
    entity::PageCacheEntity,
    page::{CachedPage, PageIdx},
};

/// Stable handle of a resident page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(usize);

/// The shared queue a resident page sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Active,
    Inactive,
    Pinned,
}

impl QueueKind {
    pub(crate) const ALL: [QueueKind; 3] = [QueueKind::Active, QueueKind::Inactive, QueueKind::Pinned];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Which of the two links of a slot a list threads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    Queue,
    Entity,
}

#[derive(Debug, Default, Clone, Copy)]
struct Link {
    prev: Option<PageId>,
    next: Option<PageId>,
}

/// A doubly linked list of page ids, head being the oldest entry.
#[derive(Debug, Default)]
pub(crate) struct PageList {
    head: Option<PageId>,
    tail: Option<PageId>,
    len: usize,
}

impl PageList {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn head(&self) -> Option<PageId> {
        self.head
    }
}

pub(crate) struct Slot<C> {
    pub page: Arc<SpinRwLock<CachedPage>>,
    pub owner: Arc<PageCacheEntity<C>>,
    pub file_page_idx: PageIdx,
    pub queue: QueueKind,
    queue_link: Link,
    entity_link: Link,
}

impl<C> Slot<C> {
    pub fn new(
        page: Arc<SpinRwLock<CachedPage>>,
        owner: Arc<PageCacheEntity<C>>,
        file_page_idx: PageIdx,
        queue: QueueKind,
    ) -> Self {
        Self {
            page,
            owner,
            file_page_idx,
            queue,
            queue_link: Link::default(),
            entity_link: Link::default(),
        }
    }

    fn link(&mut self, kind: LinkKind) -> &mut Link {
        match kind {
            LinkKind::Queue => &mut self.queue_link,
            LinkKind::Entity => &mut self.entity_link,
        }
    }

    fn link_ref(&self, kind: LinkKind) -> &Link {
        match kind {
            LinkKind::Queue => &self.queue_link,
            LinkKind::Entity => &self.entity_link,
        }
    }
}

pub(crate) struct PageSlots<C> {
    slots: Vec<Option<Slot<C>>>,
    ids: VecIdAllocator,
}

impl<C> PageSlots<C> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            ids: VecIdAllocator::new(0, usize::MAX),
        }
    }

    /// Stores `slot` and returns its id. The slot is not linked anywhere yet.
    pub fn insert(&mut self, slot: Slot<C>) -> SysResult<PageId> {
        let id = self.ids.alloc().ok_or(SysError::ENOMEM)?;
        if id == self.slots.len() {
            if self.slots.try_reserve(1).is_err() {
                unsafe { self.ids.dealloc(id) };
                return Err(SysError::ENOMEM);
            }
            self.slots.push(None);
        }
        debug_assert!(self.slots[id].is_none());
        self.slots[id] = Some(slot);
        Ok(PageId(id))
    }

    /// Takes the slot out of the arena. Both links must already be cut.
    pub fn remove(&mut self, id: PageId) -> Slot<C> {
        let slot = match self.slots.get_mut(id.0).and_then(Option::take) {
            Some(slot) => slot,
            None => panic!("removing a free page slot {:?}", id),
        };
        debug_assert!(slot.queue_link.prev.is_none() && slot.queue_link.next.is_none());
        debug_assert!(slot.entity_link.prev.is_none() && slot.entity_link.next.is_none());
        unsafe { self.ids.dealloc(id.0) };
        slot
    }

    pub fn len(&self) -> usize {
        self.ids.in_use()
    }

    /// Appends `id` at the tail of `list`.
    pub fn push_back(&mut self, list: &mut PageList, id: PageId, kind: LinkKind) {
        let old_tail = list.tail;
        {
            let link = self[id].link(kind);
            link.prev = old_tail;
            link.next = None;
        }
        match old_tail {
            Some(tail) => self[tail].link(kind).next = Some(id),
            None => list.head = Some(id),
        }
        list.tail = Some(id);
        list.len += 1;
    }

    /// Cuts `id` out of `list`.
    pub fn unlink(&mut self, list: &mut PageList, id: PageId, kind: LinkKind) {
        let Link { prev, next } = *self[id].link_ref(kind);
        match prev {
            Some(prev) => self[prev].link(kind).next = next,
            None => list.head = next,
        }
        match next {
            Some(next) => self[next].link(kind).prev = prev,
            None => list.tail = prev,
        }
        *self[id].link(kind) = Link::default();
        list.len -= 1;
    }

    /// Moves `id` to the tail of `list`, which must already hold it.
    pub fn move_to_back(&mut self, list: &mut PageList, id: PageId, kind: LinkKind) {
        if list.tail != Some(id) {
            self.unlink(list, id, kind);
            self.push_back(list, id, kind);
        }
    }

    /// Ids of `list` from head to tail.
    pub fn collect(&self, list: &PageList, kind: LinkKind) -> Vec<PageId> {
        let mut ids = Vec::with_capacity(list.len);
        let mut cur = list.head;
        while let Some(id) = cur {
            ids.push(id);
            cur = self[id].link_ref(kind).next;
        }
        ids
    }
}

impl<C> Index<PageId> for PageSlots<C> {
    type Output = Slot<C>;
    fn index(&self, id: PageId) -> &Slot<C> {
        match self.slots.get(id.0) {
            Some(Some(slot)) => slot,
            _ => panic!("stale page id {:?}", id),
        }
    }
}

impl<C> IndexMut<PageId> for PageSlots<C> {
    fn index_mut(&mut self, id: PageId) -> &mut Slot<C> {
        match self.slots.get_mut(id.0) {
            Some(Some(slot)) => slot,
            _ => panic!("stale page id {:?}", id),
        }
    }
}
