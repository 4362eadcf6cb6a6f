use mm::{
    address::VirtAddr,
    page_cache::{PageIdx, Span},
};
use systype::{SysError, SysResult};

/// What a concrete filesystem provides to the base layer.
///
/// `Private` is the per-file state of the filesystem, shared by every
/// handle on the same vnode.
pub trait ServerOps: Send + Sync + 'static {
    type Private: Send + Sync + 'static;

    /// Whether [`fmap_get_page_addr`](Self::fmap_get_page_addr) is
    /// implemented, which lets files be mapped without the page cache.
    const FMAP_DIRECT: bool = false;

    /// Fills `buf` with page `page_idx` of the file, zeroing what lies past
    /// the end of file. `buf` is always one whole page.
    fn read_page(&self, private: &Self::Private, page_idx: PageIdx, buf: &mut [u8]) -> SysResult<()>;

    /// Stores `buf` at `span` of page `page_idx`. Does not change the file
    /// size.
    fn write_block(
        &self,
        private: &Self::Private,
        page_idx: PageIdx,
        span: Span,
        buf: &[u8],
    ) -> SysResult<()>;

    /// Uncached read, clipped at the end of file.
    fn read(&self, private: &Self::Private, offset: usize, buf: &mut [u8]) -> SysResult<usize>;

    /// Uncached write, extending the file as needed.
    fn write(&self, private: &Self::Private, offset: usize, buf: &[u8]) -> SysResult<usize>;

    /// Sets the file size, zero-filling a grown range.
    fn ftruncate(&self, private: &Self::Private, len: usize) -> SysResult<()>;

    /// Server address of the page holding `offset`, for mappings served
    /// without the page cache.
    fn fmap_get_page_addr(&self, _private: &Self::Private, _offset: usize) -> SysResult<VirtAddr> {
        Err(SysError::ENOSYS)
    }
}
