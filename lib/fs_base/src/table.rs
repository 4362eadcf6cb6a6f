use alloc::sync::Arc;

use hashbrown::HashMap;
use mutex::SpinLock;
use systype::{SysError, SysResult};

use crate::{
    ops::ServerOps,
    vnode::{Vnode, VnodeId},
};

struct VnodeEntry<S: ServerOps> {
    vnode: Arc<Vnode<S>>,
    refcnt: usize,
}

/// Live vnodes by id.
///
/// A vnode is counted once per open handle, once per mapping area, and
/// once while it has pages in the cache. It leaves the table when the
/// count drops to zero.
pub struct VnodeTable<S: ServerOps> {
    vnodes: SpinLock<HashMap<VnodeId, VnodeEntry<S>>>,
}

impl<S: ServerOps> VnodeTable<S> {
    pub fn new() -> Self {
        Self {
            vnodes: SpinLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: VnodeId) -> Option<Arc<Vnode<S>>> {
        self.vnodes.lock().get(&id).map(|entry| entry.vnode.clone())
    }

    /// Takes a reference on vnode `id`, creating it with `make` if absent.
    pub(crate) fn get_or_insert_with(
        &self,
        id: VnodeId,
        make: impl FnOnce() -> Arc<Vnode<S>>,
    ) -> Arc<Vnode<S>> {
        let mut vnodes = self.vnodes.lock();
        let entry = vnodes.entry(id).or_insert_with(|| {
            log::debug!("[VnodeTable] new vnode {}", id);
            VnodeEntry {
                vnode: make(),
                refcnt: 0,
            }
        });
        entry.refcnt += 1;
        entry.vnode.clone()
    }

    /// Returns the new count.
    pub fn inc_ref(&self, id: VnodeId) -> SysResult<usize> {
        let mut vnodes = self.vnodes.lock();
        let entry = vnodes.get_mut(&id).ok_or(SysError::ENOENT)?;
        entry.refcnt += 1;
        Ok(entry.refcnt)
    }

    /// Returns the new count. The vnode is dropped from the table at zero.
    pub fn dec_ref(&self, id: VnodeId) -> SysResult<usize> {
        let removed = {
            let mut vnodes = self.vnodes.lock();
            let entry = vnodes.get_mut(&id).ok_or(SysError::ENOENT)?;
            entry.refcnt -= 1;
            if entry.refcnt > 0 {
                return Ok(entry.refcnt);
            }
            vnodes.remove(&id)
        };
        log::debug!("[VnodeTable] vnode {} released", id);
        drop(removed);
        Ok(0)
    }

    pub fn refcnt(&self, id: VnodeId) -> Option<usize> {
        self.vnodes.lock().get(&id).map(|entry| entry.refcnt)
    }

    pub fn len(&self) -> usize {
        self.vnodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: ServerOps> Default for VnodeTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
