//! A filesystem kept entirely in server memory.
//!
//! Each file is a list of page buffers that never move while allocated, so
//! their addresses can be handed out for mappings served without the page
//! cache.

use alloc::{boxed::Box, vec, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use config::mm::PAGE_SIZE;
use mm::{
    address::{VirtAddr, page_round_up},
    page_cache::{PageIdx, Span},
};
use mutex::SpinLock;
use systype::{SysError, SysResult};

use crate::ops::ServerOps;

/// Largest file the in-memory filesystem accepts.
pub const MEMFS_MAX_FILE_SIZE: usize = 1 << 30;

#[derive(Default)]
struct MemFileInner {
    pages: Vec<Option<Box<[u8]>>>,
    size: usize,
}

impl MemFileInner {
    fn page_mut(&mut self, page_idx: PageIdx) -> &mut [u8] {
        if self.pages.len() <= page_idx {
            self.pages.resize_with(page_idx + 1, || None);
        }
        self.pages[page_idx].get_or_insert_with(|| vec![0u8; PAGE_SIZE].into_boxed_slice())
    }

    fn page(&self, page_idx: PageIdx) -> Option<&[u8]> {
        self.pages.get(page_idx).and_then(|page| page.as_deref())
    }

    /// Zeroes the bytes past the end of file in the last page.
    fn zero_tail(&mut self) {
        let tail = self.size % PAGE_SIZE;
        if tail == 0 {
            return;
        }
        if let Some(Some(page)) = self.pages.get_mut(self.size / PAGE_SIZE) {
            page[tail..].fill(0);
        }
    }

    fn set_size(&mut self, len: usize) {
        if len < self.size {
            self.pages.truncate(len.div_ceil(PAGE_SIZE));
            self.size = len;
            self.zero_tail();
        } else {
            self.zero_tail();
            self.size = len;
        }
    }
}

/// Private state of one in-memory file.
#[derive(Default)]
pub struct MemFile {
    inner: SpinLock<MemFileInner>,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(data: &[u8]) -> Self {
        let file = Self::new();
        {
            let mut inner = file.inner.lock();
            for (page_idx, chunk) in data.chunks(PAGE_SIZE).enumerate() {
                inner.page_mut(page_idx)[..chunk.len()].copy_from_slice(chunk);
            }
            inner.size = data.len();
        }
        file
    }

    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// The whole file content.
    pub fn content(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut data = vec![0u8; inner.size];
        for (page_idx, chunk) in data.chunks_mut(PAGE_SIZE).enumerate() {
            if let Some(page) = inner.page(page_idx) {
                chunk.copy_from_slice(&page[..chunk.len()]);
            }
        }
        data
    }
}

/// Operations of the in-memory filesystem, with counters of the calls the
/// page cache makes.
#[derive(Debug, Default)]
pub struct MemFs {
    page_reads: AtomicUsize,
    block_writes: AtomicUsize,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_reads(&self) -> usize {
        self.page_reads.load(Ordering::Relaxed)
    }

    pub fn block_writes(&self) -> usize {
        self.block_writes.load(Ordering::Relaxed)
    }
}

impl ServerOps for MemFs {
    type Private = MemFile;

    const FMAP_DIRECT: bool = true;

    fn read_page(&self, file: &MemFile, page_idx: PageIdx, buf: &mut [u8]) -> SysResult<()> {
        self.page_reads.fetch_add(1, Ordering::Relaxed);
        let inner = file.inner.lock();
        match inner.page(page_idx) {
            Some(page) => buf.copy_from_slice(page),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, file: &MemFile, page_idx: PageIdx, span: Span, buf: &[u8]) -> SysResult<()> {
        self.block_writes.fetch_add(1, Ordering::Relaxed);
        let mut inner = file.inner.lock();
        // Blocks wholly past the end of file are stale.
        if page_idx * PAGE_SIZE + span.range().start >= inner.size {
            return Ok(());
        }
        inner.page_mut(page_idx)[span.range()].copy_from_slice(buf);
        Ok(())
    }

    fn read(&self, file: &MemFile, offset: usize, buf: &mut [u8]) -> SysResult<usize> {
        let inner = file.inner.lock();
        if offset >= inner.size {
            return Ok(0);
        }
        let len = buf.len().min(inner.size - offset);
        let mut done = 0;
        while done < len {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let count = (PAGE_SIZE - in_page).min(len - done);
            let dst = &mut buf[done..done + count];
            match inner.page(pos / PAGE_SIZE) {
                Some(page) => dst.copy_from_slice(&page[in_page..in_page + count]),
                None => dst.fill(0),
            }
            done += count;
        }
        Ok(len)
    }

    fn write(&self, file: &MemFile, offset: usize, buf: &[u8]) -> SysResult<usize> {
        let end = offset.checked_add(buf.len()).ok_or(SysError::EFBIG)?;
        if end > MEMFS_MAX_FILE_SIZE {
            return Err(SysError::EFBIG);
        }
        let mut inner = file.inner.lock();
        if end > inner.size {
            inner.set_size(end);
        }
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let count = (PAGE_SIZE - in_page).min(buf.len() - done);
            inner.page_mut(pos / PAGE_SIZE)[in_page..in_page + count]
                .copy_from_slice(&buf[done..done + count]);
            done += count;
        }
        Ok(buf.len())
    }

    fn ftruncate(&self, file: &MemFile, len: usize) -> SysResult<()> {
        if len > MEMFS_MAX_FILE_SIZE {
            return Err(SysError::EFBIG);
        }
        file.inner.lock().set_size(len);
        Ok(())
    }

    fn fmap_get_page_addr(&self, file: &MemFile, offset: usize) -> SysResult<VirtAddr> {
        let mut inner = file.inner.lock();
        let eof = page_round_up(inner.size).ok_or(SysError::EFBIG)?;
        if offset >= eof {
            return Err(SysError::EFAULT);
        }
        let page = inner.page_mut(offset / PAGE_SIZE);
        Ok(VirtAddr::new(page.as_ptr() as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrinking_zeroes_the_tail() {
        let ops = MemFs::new();
        let file = MemFile::with_content(&[7u8; PAGE_SIZE + 100]);
        ops.ftruncate(&file, 10).unwrap();
        ops.ftruncate(&file, PAGE_SIZE * 2).unwrap();
        let content = file.content();
        assert_eq!(&content[..10], &[7u8; 10]);
        assert!(content[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn stale_blocks_are_ignored() {
        let ops = MemFs::new();
        let file = MemFile::with_content(&[1u8; 600]);
        ops.write_block(&file, 0, Span::Block(1), &[2u8; 512]).unwrap();
        ops.write_block(&file, 0, Span::Block(2), &[3u8; 512]).unwrap();
        let content = file.content();
        assert_eq!(content.len(), 600);
        assert!(content[512..].iter().all(|b| *b == 2));
        let mut page = vec![0u8; PAGE_SIZE];
        ops.read_page(&file, 0, &mut page).unwrap();
        assert!(page[1024..].iter().all(|b| *b == 0));
        assert_eq!(ops.block_writes(), 2);

        // Growing again does not expose what the block left past the end.
        ops.ftruncate(&file, 1024).unwrap();
        assert!(file.content()[600..].iter().all(|b| *b == 0));
    }

    #[test]
    fn direct_page_addresses_are_stable() {
        let ops = MemFs::new();
        let file = MemFile::with_content(&[0u8; 10]);
        let first = ops.fmap_get_page_addr(&file, 0).unwrap();
        ops.write(&file, PAGE_SIZE * 8, b"x").unwrap();
        assert_eq!(ops.fmap_get_page_addr(&file, 0).unwrap(), first);
        assert_eq!(ops.fmap_get_page_addr(&file, PAGE_SIZE * 9), Err(SysError::EFAULT));
    }
}
