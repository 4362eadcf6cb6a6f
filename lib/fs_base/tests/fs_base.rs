use std::sync::Arc;

use config::mm::PAGE_SIZE;
use fs_base::{
    FmapRequest, FsBase, ServerOps,
    loopback::LoopbackKernel,
    memfs::{MemFile, MemFs},
};
use mm::{
    address::VirtAddr,
    fmap::FmapFile,
    page_cache::{CacheStrategy, PageCacheConfig, PageIdx, Span},
};
use systype::{
    SysError, SysResult,
    memory_flags::{MappingFlags, MmapFlags, MmapProt},
};

fn cached(strategy: CacheStrategy) -> (FsBase<MemFs>, Arc<LoopbackKernel>) {
    let kernel = Arc::new(LoopbackKernel::new());
    let config = PageCacheConfig {
        strategy,
        ..PageCacheConfig::default()
    };
    let fs = FsBase::new(MemFs::new(), kernel.clone(), Some(config)).unwrap();
    (fs, kernel)
}

fn uncached() -> (FsBase<MemFs>, Arc<LoopbackKernel>) {
    let kernel = Arc::new(LoopbackKernel::new());
    let fs = FsBase::new(MemFs::new(), kernel.clone(), None).unwrap();
    (fs, kernel)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn shared_rw(addr: usize, length: usize) -> FmapRequest {
    FmapRequest {
        addr: VirtAddr::new(addr),
        length,
        prot: (MmapProt::PROT_READ | MmapProt::PROT_WRITE).bits(),
        flags: MmapFlags::MAP_SHARED.bits(),
        offset: 0,
    }
}

#[test]
fn unaligned_write_reads_back_under_every_strategy() {
    for strategy in [CacheStrategy::Direct, CacheStrategy::WriteThrough, CacheStrategy::WriteBack] {
        let (fs, _kernel) = cached(strategy);
        let vnode = fs.open(1, 0, MemFile::new());
        let data = pattern(3 * PAGE_SIZE);
        assert_eq!(fs.write(&vnode, 700, &data).unwrap(), data.len());
        assert_eq!(vnode.size(), 700 + data.len());

        let mut buf = vec![0xffu8; data.len() + 100];
        assert_eq!(fs.read(&vnode, 700, &mut buf).unwrap(), data.len());
        assert_eq!(&buf[..data.len()], &data[..], "{strategy}");

        fs.sync().unwrap();
        let content = vnode.private().content();
        assert!(content[..700].iter().all(|b| *b == 0));
        assert_eq!(&content[700..], &data[..]);
    }
}

#[test]
fn write_back_keeps_data_until_fsync() {
    let (fs, _kernel) = cached(CacheStrategy::WriteBack);
    let vnode = fs.open(1, 5, MemFile::with_content(b"hello"));
    fs.write(&vnode, 0, b"J").unwrap();
    assert_eq!(vnode.private().content(), b"hello");

    let mut buf = [0u8; 5];
    fs.read(&vnode, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"Jello");

    fs.fsync(&vnode).unwrap();
    assert_eq!(vnode.private().content(), b"Jello");
    assert_eq!(fs.ops().page_reads(), 1);
}

#[test]
fn reads_stop_at_end_of_file() {
    let (fs, _kernel) = cached(CacheStrategy::WriteThrough);
    let vnode = fs.open(1, 10, MemFile::with_content(b"0123456789"));
    let mut buf = [0u8; 8];
    assert_eq!(fs.read(&vnode, 6, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"6789");
    assert_eq!(fs.read(&vnode, 10, &mut buf).unwrap(), 0);
}

#[test]
fn truncate_drops_pages_past_the_end() {
    let (fs, _kernel) = cached(CacheStrategy::WriteBack);
    let vnode = fs.open(1, 0, MemFile::new());
    let data = pattern(2 * PAGE_SIZE);
    fs.write(&vnode, 0, &data).unwrap();

    fs.ftruncate(&vnode, 100).unwrap();
    assert_eq!(vnode.size(), 100);
    assert_eq!(vnode.private().content(), &data[..100]);

    fs.ftruncate(&vnode, 2 * PAGE_SIZE).unwrap();
    let mut buf = vec![0xffu8; 2 * PAGE_SIZE];
    assert_eq!(fs.read(&vnode, 0, &mut buf).unwrap(), 2 * PAGE_SIZE);
    assert_eq!(&buf[..100], &data[..100]);
    assert!(buf[100..].iter().all(|b| *b == 0));
}

#[test]
fn unlink_discards_dirty_pages() {
    let (fs, _kernel) = cached(CacheStrategy::WriteBack);
    let vnode = fs.open(1, 4, MemFile::with_content(b"keep"));
    fs.write(&vnode, 0, b"lost").unwrap();
    fs.unlink(&vnode);
    fs.sync().unwrap();
    assert_eq!(vnode.private().content(), b"keep");
}

#[test]
fn cached_pages_hold_the_vnode() {
    let (fs, _kernel) = cached(CacheStrategy::WriteBack);
    let vnode = fs.open(9, 0, MemFile::new());
    assert_eq!(fs.vnodes().refcnt(9), Some(1));
    let again = fs.open(9, 0, MemFile::new());
    assert!(Arc::ptr_eq(&vnode, &again));
    assert_eq!(fs.vnodes().refcnt(9), Some(2));
    fs.close(&again).unwrap();

    fs.write(&vnode, 0, b"abc").unwrap();
    assert_eq!(fs.vnodes().refcnt(9), Some(2));
    fs.close(&vnode).unwrap();
    assert!(fs.vnodes().get(9).is_some());

    fs.fsync(&vnode).unwrap();
    fs.unlink(&vnode);
    assert!(fs.vnodes().get(9).is_none());
    assert_eq!(fs.close(&vnode), Err(SysError::ENOENT));
}

#[test]
fn fmap_request_validation() {
    let (fs, _kernel) = cached(CacheStrategy::WriteBack);
    let vnode = fs.open(1, PAGE_SIZE, MemFile::with_content(&pattern(PAGE_SIZE)));

    assert_eq!(fs.fmap(1, &vnode, false, shared_rw(0x10000, PAGE_SIZE)), Err(SysError::EACCES));
    let private_rw = FmapRequest {
        flags: MmapFlags::MAP_PRIVATE.bits(),
        ..shared_rw(0x10000, PAGE_SIZE)
    };
    assert!(fs.fmap(1, &vnode, false, private_rw).is_ok());
    fs.funmap(1, VirtAddr::new(0x10000), PAGE_SIZE).unwrap();

    let bad_prot = FmapRequest {
        prot: 0x8,
        ..shared_rw(0x10000, PAGE_SIZE)
    };
    assert_eq!(fs.fmap(1, &vnode, true, bad_prot), Err(SysError::EINVAL));
    let anonymous = FmapRequest {
        flags: (MmapFlags::MAP_PRIVATE | MmapFlags::MAP_ANONYMOUS).bits(),
        ..shared_rw(0x10000, PAGE_SIZE)
    };
    assert_eq!(fs.fmap(1, &vnode, true, anonymous), Err(SysError::EINVAL));
    let fixed = FmapRequest {
        flags: (MmapFlags::MAP_SHARED | MmapFlags::MAP_FIXED).bits(),
        ..shared_rw(0x10000, PAGE_SIZE)
    };
    assert_eq!(fs.fmap(1, &vnode, true, fixed), Err(SysError::EINVAL));
    assert_eq!(fs.fmap(1, &vnode, true, shared_rw(0x10000, 0)), Err(SysError::EINVAL));
    assert_eq!(fs.areas().count_of(1), 0);
}

#[test]
fn fmap_rejects_ranges_off_page_boundaries() {
    let (fs, kernel) = cached(CacheStrategy::WriteBack);
    let mut handler = fs.fault_handler(4).unwrap();
    let vnode = fs.open(1, 0x2000, MemFile::with_content(&pattern(0x2000)));

    let shifted = FmapRequest {
        offset: 0x10,
        ..shared_rw(0x10000, PAGE_SIZE)
    };
    assert_eq!(fs.fmap(1, &vnode, true, shifted), Err(SysError::EINVAL));
    assert_eq!(fs.fmap(1, &vnode, true, shared_rw(0x10010, PAGE_SIZE)), Err(SysError::EINVAL));
    assert_eq!(fs.areas().count_of(1), 0);
    assert_eq!(vnode.pmo_cap(), None);

    // A page-aligned offset maps the page starting exactly there.
    let second_page = FmapRequest {
        offset: PAGE_SIZE,
        ..shared_rw(0x10000, PAGE_SIZE)
    };
    fs.fmap(1, &vnode, true, second_page).unwrap();
    assert!(!kernel.touch(1, VirtAddr::new(0x10010)).unwrap());
    assert_eq!(handler.drain(), 1);
    assert!(kernel.failures().is_empty());
    let mapping = kernel.mapping(1, VirtAddr::new(0x10000)).unwrap();
    // Write-back keeps the page resident, so its buffer is still live.
    let client_view = unsafe {
        core::slice::from_raw_parts(mapping.server_page.to_usize() as *const u8, PAGE_SIZE)
    };
    assert_eq!(client_view, &pattern(0x2000)[PAGE_SIZE..]);
}

#[test]
fn fmap_rounds_length_and_creates_one_pmo() {
    let (fs, kernel) = cached(CacheStrategy::WriteBack);
    let vnode = fs.open(1, 0x1800, MemFile::with_content(&pattern(0x1800)));
    let cap = fs.fmap(1, &vnode, true, shared_rw(0x10000, 100)).unwrap();
    assert_eq!(kernel.pmo_size(cap), Some(0x1800));
    assert_eq!(fs.fmap(2, &vnode, true, shared_rw(0x10000, 100)), Ok(cap));
    assert_eq!(fs.vnodes().refcnt(1), Some(3));

    // The area covers the whole page.
    assert_eq!(fs.areas().find(1, VirtAddr::new(0x10ff8)).unwrap().area_length, PAGE_SIZE);
    assert_eq!(fs.fmap(1, &vnode, true, shared_rw(0x10000, 100)), Err(SysError::EEXIST));
    fs.funmap(1, VirtAddr::new(0x10000), 100).unwrap();
    assert_eq!(fs.client_exit(2), 1);
    assert_eq!(fs.vnodes().refcnt(1), Some(1));
}

#[test]
fn faults_resolve_through_the_cache() {
    let (fs, kernel) = cached(CacheStrategy::WriteBack);
    let mut handler = fs.fault_handler(16).unwrap();
    let vnode = fs.open(1, 0x1800, MemFile::with_content(&pattern(0x1800)));
    let cap = fs.fmap(7, &vnode, true, shared_rw(0x40000, 0x3000)).unwrap();

    assert!(!kernel.touch(7, VirtAddr::new(0x40010)).unwrap());
    assert!(!kernel.touch(7, VirtAddr::new(0x41fff)).unwrap());
    assert_eq!(handler.drain(), 2);
    let mapping = kernel.mapping(7, VirtAddr::new(0x40000)).unwrap();
    assert_eq!(mapping.perm, MappingFlags::R | MappingFlags::W);
    assert!(!mapping.copy);
    assert!(kernel.touch(7, VirtAddr::new(0x40020)).unwrap());

    // Third page lies past the end of file: the file grows to the window.
    assert!(!kernel.touch(7, VirtAddr::new(0x42000)).unwrap());
    assert_eq!(handler.drain(), 1);
    assert_eq!(vnode.size(), 0x3000);
    assert_eq!(kernel.pmo_size(cap), Some(0x3000));
    assert_eq!(kernel.mapped_pages(7), 3);

    assert!(!kernel.touch(7, VirtAddr::new(0x50000)).unwrap());
    assert_eq!(handler.drain(), 1);
    assert_eq!(
        kernel.failures(),
        [(7, VirtAddr::new(0x50000), SysError::ENOENT)]
    );
    assert!(fs.cache().unwrap().stats().misses >= 3);
}

#[test]
fn direct_mappings_use_filesystem_pages() {
    let (fs, kernel) = uncached();
    let mut handler = fs.fault_handler(4).unwrap();
    let vnode = fs.open(3, 0x2000, MemFile::with_content(&pattern(0x2000)));
    let req = FmapRequest {
        prot: MmapProt::PROT_READ.bits(),
        flags: MmapFlags::MAP_PRIVATE.bits(),
        offset: PAGE_SIZE,
        ..shared_rw(0x8000, PAGE_SIZE)
    };
    fs.fmap(1, &vnode, false, req).unwrap();
    kernel.touch(1, VirtAddr::new(0x8abc)).unwrap();
    assert_eq!(handler.drain(), 1);

    let expected = fs.ops().fmap_get_page_addr(vnode.private(), PAGE_SIZE).unwrap();
    let mapping = kernel.mapping(1, VirtAddr::new(0x8000)).unwrap();
    assert_eq!(mapping.server_page, expected);
    assert_eq!(mapping.perm, MappingFlags::R);
}

#[test]
fn uncached_io_goes_to_the_filesystem() {
    let (fs, _kernel) = uncached();
    let vnode = fs.open(1, 0, MemFile::new());
    fs.write(&vnode, 10, b"direct").unwrap();
    assert_eq!(vnode.size(), 16);
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(&vnode, 0, &mut buf).unwrap(), 16);
    assert_eq!(&buf[10..], b"direct");
    assert_eq!(fs.ops().page_reads(), 0);
    assert_eq!(fs.set_strategy(CacheStrategy::Direct), Err(SysError::EINVAL));
}

#[test]
fn mapping_keeps_vnode_after_close() {
    let (fs, _kernel) = uncached();
    let vnode = fs.open(4, PAGE_SIZE, MemFile::with_content(&pattern(PAGE_SIZE)));
    fs.fmap(1, &vnode, true, shared_rw(0x1000, PAGE_SIZE)).unwrap();
    fs.close(&vnode).unwrap();
    assert_eq!(fs.vnodes().refcnt(4), Some(1));
    fs.funmap(1, VirtAddr::new(0x1000), PAGE_SIZE).unwrap();
    assert!(fs.vnodes().is_empty());
}

/// A filesystem that can only be reached through the page cache.
struct UnmappableFs(MemFs);

impl ServerOps for UnmappableFs {
    type Private = MemFile;

    fn read_page(&self, file: &MemFile, page_idx: PageIdx, buf: &mut [u8]) -> SysResult<()> {
        self.0.read_page(file, page_idx, buf)
    }

    fn write_block(&self, file: &MemFile, page_idx: PageIdx, span: Span, buf: &[u8]) -> SysResult<()> {
        self.0.write_block(file, page_idx, span, buf)
    }

    fn read(&self, file: &MemFile, offset: usize, buf: &mut [u8]) -> SysResult<usize> {
        self.0.read(file, offset, buf)
    }

    fn write(&self, file: &MemFile, offset: usize, buf: &[u8]) -> SysResult<usize> {
        self.0.write(file, offset, buf)
    }

    fn ftruncate(&self, file: &MemFile, len: usize) -> SysResult<()> {
        self.0.ftruncate(file, len)
    }
}

#[test]
fn fmap_needs_a_page_provider() {
    let kernel = Arc::new(LoopbackKernel::new());
    let fs = FsBase::new(UnmappableFs(MemFs::new()), kernel.clone(), None).unwrap();
    let vnode = fs.open(1, PAGE_SIZE, MemFile::new());
    assert_eq!(fs.fmap(1, &vnode, true, shared_rw(0x1000, PAGE_SIZE)), Err(SysError::EINVAL));

    let fs = FsBase::new(UnmappableFs(MemFs::new()), kernel, Some(PageCacheConfig::default())).unwrap();
    let vnode = fs.open(1, PAGE_SIZE, MemFile::new());
    assert!(fs.fmap(1, &vnode, true, shared_rw(0x1000, PAGE_SIZE)).is_ok());
}

#[test]
fn fault_thread_stops_with_the_channel() {
    let (fs, kernel) = cached(CacheStrategy::WriteThrough);
    let handler = fs.fault_handler(8).unwrap();
    let thread = handler.spawn().unwrap();
    let vnode = fs.open(1, PAGE_SIZE, MemFile::with_content(&pattern(PAGE_SIZE)));
    fs.fmap(2, &vnode, true, shared_rw(0x1000, PAGE_SIZE)).unwrap();
    kernel.touch(2, VirtAddr::new(0x1000)).unwrap();
    kernel.close_fault_channel();
    thread.join().unwrap();
    assert!(kernel.mapping(2, VirtAddr::new(0x1000)).is_some());
}
