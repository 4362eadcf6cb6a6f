//! Glue between the page cache and a [`ServerOps`] filesystem.

use alloc::sync::{Arc, Weak};

use mm::page_cache::{EntityEvent, PageCache, PageCacheBackend, PageIdx, Span};
use systype::SysResult;

use crate::{ops::ServerOps, table::VnodeTable, vnode::VnodeId};

pub type FsPageCache<S> = PageCache<CacheAdapter<S>>;

/// Per-file context the cache hands back on every backend call.
pub struct VnodeCtx<S: ServerOps> {
    pub vnode_id: VnodeId,
    pub private: Arc<S::Private>,
}

/// Routes cache callbacks to the filesystem, and keeps a vnode counted
/// while it has resident pages.
pub struct CacheAdapter<S: ServerOps> {
    ops: Arc<S>,
    vnodes: Weak<VnodeTable<S>>,
}

impl<S: ServerOps> CacheAdapter<S> {
    pub(crate) fn new(ops: Arc<S>, vnodes: Weak<VnodeTable<S>>) -> Self {
        Self { ops, vnodes }
    }
}

impl<S: ServerOps> PageCacheBackend for CacheAdapter<S> {
    type Context = VnodeCtx<S>;

    fn read_page(&self, ctx: &VnodeCtx<S>, page_idx: PageIdx, buf: &mut [u8]) -> SysResult<()> {
        self.ops.read_page(&ctx.private, page_idx, buf)
    }

    fn write_block(&self, ctx: &VnodeCtx<S>, page_idx: PageIdx, span: Span, buf: &[u8]) -> SysResult<()> {
        self.ops.write_block(&ctx.private, page_idx, span, buf)
    }

    fn on_entity_event(&self, ctx: &VnodeCtx<S>, event: EntityEvent) {
        let Some(vnodes) = self.vnodes.upgrade() else {
            return;
        };
        let result = match event {
            EntityEvent::TurnsNonEmpty => vnodes.inc_ref(ctx.vnode_id),
            EntityEvent::TurnsEmpty => vnodes.dec_ref(ctx.vnode_id),
        };
        if let Err(e) = result {
            log::warn!(
                "[on_entity_event] vnode {} {:?}: {:?}",
                ctx.vnode_id,
                event,
                e
            );
        }
    }
}
