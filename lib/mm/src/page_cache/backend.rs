use systype::SysResult;

use super::{
    entity::EntityEvent,
    page::{PageIdx, Span},
};

/// The filesystem under the cache.
///
/// `Context` is the per-file state the backend needs to reach its storage;
/// the cache stores one in every [`PageCacheEntity`](super::PageCacheEntity)
/// and passes it back untouched.
pub trait PageCacheBackend: Send + Sync + 'static {
    type Context: Send + Sync + 'static;

    /// Fills `buf`, exactly one page, with the content of page `page_idx`.
    /// Bytes past the end of the file must be zeroed.
    fn read_page(&self, ctx: &Self::Context, page_idx: PageIdx, buf: &mut [u8]) -> SysResult<()>;

    /// Writes `buf`, the bytes of `span` inside page `page_idx`, to storage.
    fn write_block(
        &self,
        ctx: &Self::Context,
        page_idx: PageIdx,
        span: Span,
        buf: &[u8],
    ) -> SysResult<()>;

    /// Called with the cache lock held; must not call back into the cache.
    fn on_entity_event(&self, _ctx: &Self::Context, _event: EntityEvent) {}
}
