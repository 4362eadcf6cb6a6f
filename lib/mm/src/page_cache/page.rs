//! A cached file page and the ranges of it that operations address.

use alloc::{boxed::Box, vec::Vec};
use core::{ops::Range, sync::atomic::Ordering};

use bitflags::bitflags;
use common::atomic_bitflags;
use config::fs::{BLOCK_PER_PAGE, CACHED_BLOCK_SIZE, CACHED_PAGE_SIZE};
use systype::{SysError, SysResult};

use crate::address::VirtAddr;

/// Index of a page inside its file (file offset / page size).
pub type PageIdx = usize;

bitflags! {
    /// One bit per sub-block of a cached page.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyBlocks: u8 {
        const B0 = 1 << 0;
        const B1 = 1 << 1;
        const B2 = 1 << 2;
        const B3 = 1 << 3;
        const B4 = 1 << 4;
        const B5 = 1 << 5;
        const B6 = 1 << 6;
        const B7 = 1 << 7;
    }
}

atomic_bitflags!(DirtyBlocks, AtomicU8);

impl DirtyBlocks {
    /// The flag of sub-block `block`.
    pub fn block(block: usize) -> Self {
        debug_assert!(block < BLOCK_PER_PAGE);
        Self::from_bits_truncate(1 << block)
    }

    /// Sub-block indices whose flag is set, in ascending order.
    pub fn blocks(self) -> impl Iterator<Item = usize> {
        (0..BLOCK_PER_PAGE).filter(move |b| self.contains(Self::block(*b)))
    }
}

/// The part of a page an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// The whole page.
    Page,
    /// One sub-block, `0..BLOCK_PER_PAGE`.
    Block(usize),
}

impl Span {
    /// Rejects sub-block indices past the end of a page.
    pub fn check(self) -> SysResult<Self> {
        match self {
            Span::Block(b) if b >= BLOCK_PER_PAGE => Err(SysError::EINVAL),
            span => Ok(span),
        }
    }

    /// Byte range of the span inside the page buffer.
    pub fn range(self) -> Range<usize> {
        match self {
            Span::Page => 0..CACHED_PAGE_SIZE,
            Span::Block(b) => b * CACHED_BLOCK_SIZE..(b + 1) * CACHED_BLOCK_SIZE,
        }
    }

    /// Dirty flags covered by the span.
    pub fn blocks(self) -> DirtyBlocks {
        match self {
            Span::Page => DirtyBlocks::all(),
            Span::Block(b) => DirtyBlocks::block(b),
        }
    }
}

/// Content of one resident page, guarded by the page's rwlock.
pub struct CachedPage {
    file_page_idx: PageIdx,
    dirty: AtomicDirtyBlocks,
    content: Box<[u8]>,
    /// Set once the page has been dropped from the cache. A thread that
    /// waited for the lock of a detached page must look it up again.
    pub(crate) detached: bool,
}

impl CachedPage {
    /// Allocates a zeroed page buffer.
    ///
    /// # Errors
    /// Returns [`SysError::ENOMEM`] if the buffer cannot be allocated.
    pub(crate) fn try_new(file_page_idx: PageIdx) -> SysResult<Self> {
        let mut content = Vec::new();
        content
            .try_reserve_exact(CACHED_PAGE_SIZE)
            .map_err(|_| SysError::ENOMEM)?;
        content.resize(CACHED_PAGE_SIZE, 0);
        Ok(Self {
            file_page_idx,
            dirty: AtomicDirtyBlocks::default(),
            content: content.into_boxed_slice(),
            detached: false,
        })
    }

    pub fn file_page_idx(&self) -> PageIdx {
        self.file_page_idx
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_blocks().is_empty()
    }

    pub fn dirty_blocks(&self) -> DirtyBlocks {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dirty(&self, blocks: DirtyBlocks) {
        self.dirty.fetch_or(blocks, Ordering::AcqRel);
    }

    /// Clears `blocks` and returns which of them were set. A concurrent
    /// flusher of the same blocks therefore sees them clean.
    pub(crate) fn take_dirty(&self, blocks: DirtyBlocks) -> DirtyBlocks {
        self.dirty.fetch_remove(blocks, Ordering::AcqRel) & blocks
    }

    pub fn bytes(&self, span: Span) -> &[u8] {
        &self.content[span.range()]
    }

    pub(crate) fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        &mut self.content[span.range()]
    }

    pub(crate) fn content_mut(&mut self) -> &mut [u8] {
        &mut self.content
    }

    /// Server address of the first byte of `span`.
    pub fn addr(&self, span: Span) -> VirtAddr {
        VirtAddr::new(self.content.as_ptr() as usize + span.range().start)
    }
}

impl core::fmt::Debug for CachedPage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CachedPage")
            .field("file_page_idx", &self.file_page_idx)
            .field("dirty", &self.dirty_blocks())
            .field("detached", &self.detached)
            .finish()
    }
}
