//! Table of file mappings, keyed by client and start address.

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

use mutex::SpinRwLock;
use systype::{
    SysError, SysResult,
    memory_flags::{MmapFlags, MmapProt},
};

use super::kernel::Badge;
use crate::address::VirtAddr;

/// A file as seen by the fault pipeline.
pub trait FmapFile: Send + Sync {
    /// Current size of the file in bytes.
    fn size(&self) -> usize;

    /// Server address of the page holding file offset `offset`, which is
    /// page aligned and below the page-rounded file size.
    fn page_addr(&self, offset: usize) -> SysResult<VirtAddr>;

    /// Extends the file to at least `size` bytes.
    fn grow_to(&self, size: usize) -> SysResult<()>;

    /// Called when a mapping starts referring to the file.
    fn get_ref(&self) {}

    /// Called when a mapping stops referring to the file.
    fn put_ref(&self) {}
}

/// One mapped range of a client.
pub struct FmapArea<F: FmapFile> {
    pub client: Badge,
    pub va_start: VirtAddr,
    pub length: usize,
    pub file: Arc<F>,
    pub file_offset: usize,
    pub flags: MmapFlags,
    pub prot: MmapProt,
}

impl<F: FmapFile> FmapArea<F> {
    pub fn va_end(&self) -> usize {
        self.va_start.to_usize() + self.length
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        (self.va_start.to_usize()..self.va_end()).contains(&va.to_usize())
    }
}

impl<F: FmapFile> core::fmt::Debug for FmapArea<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FmapArea")
            .field("client", &self.client)
            .field("va_start", &self.va_start)
            .field("length", &self.length)
            .field("file_offset", &self.file_offset)
            .field("flags", &self.flags)
            .field("prot", &self.prot)
            .finish()
    }
}

/// Result of a lookup: where in which file a client address points.
pub struct FmapHit<F: FmapFile> {
    /// Offset of the looked-up address from the area start.
    pub area_offset: usize,
    pub area_length: usize,
    pub file: Arc<F>,
    /// File offset of the area start.
    pub file_offset: usize,
    pub flags: MmapFlags,
    pub prot: MmapProt,
}

/// All file mappings of all clients.
///
/// Guarded by its own rwlock: lookups from the fault handler only take it
/// shared.
pub struct FmapAreaTable<F: FmapFile> {
    areas: SpinRwLock<BTreeMap<(Badge, usize), FmapArea<F>>>,
}

impl<F: FmapFile> FmapAreaTable<F> {
    pub fn new() -> Self {
        Self {
            areas: SpinRwLock::new(BTreeMap::new()),
        }
    }

    /// Records a mapping and takes a reference on its file.
    ///
    /// # Errors
    /// - [`SysError::EINVAL`] for an empty or wrapping range.
    /// - [`SysError::EEXIST`] if the range overlaps another area of the
    ///   same client.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &self,
        client: Badge,
        va_start: VirtAddr,
        length: usize,
        file: Arc<F>,
        file_offset: usize,
        flags: MmapFlags,
        prot: MmapProt,
    ) -> SysResult<()> {
        let start = va_start.to_usize();
        let end = start.checked_add(length).ok_or(SysError::EINVAL)?;
        if length == 0 {
            return Err(SysError::EINVAL);
        }
        let mut areas = self.areas.write();
        let before = areas.range((client, 0)..=(client, start)).next_back();
        if before.is_some_and(|(_, area)| area.va_end() > start) {
            return Err(SysError::EEXIST);
        }
        let after = areas.range((client, start)..(client, end)).next();
        if after.is_some() {
            return Err(SysError::EEXIST);
        }
        file.get_ref();
        let area = FmapArea {
            client,
            va_start,
            length,
            file,
            file_offset,
            flags,
            prot,
        };
        log::debug!("[fmap_area_insert] {:?}", area);
        areas.insert((client, start), area);
        Ok(())
    }

    /// Looks up the area of `client` containing `va`.
    pub fn find(&self, client: Badge, va: VirtAddr) -> SysResult<FmapHit<F>> {
        let areas = self.areas.read();
        let (_, area) = areas
            .range((client, 0)..=(client, va.to_usize()))
            .next_back()
            .filter(|(_, area)| area.contains(va))
            .ok_or(SysError::ENOENT)?;
        Ok(FmapHit {
            area_offset: va.to_usize() - area.va_start.to_usize(),
            area_length: area.length,
            file: area.file.clone(),
            file_offset: area.file_offset,
            flags: area.flags,
            prot: area.prot,
        })
    }

    /// Removes the area of `client` spanning exactly `[va_start, va_start + length)`.
    pub fn remove(&self, client: Badge, va_start: VirtAddr, length: usize) -> SysResult<()> {
        let key = (client, va_start.to_usize());
        let area = {
            let mut areas = self.areas.write();
            let exact = areas.get(&key).is_some_and(|area| area.length == length);
            if exact { areas.remove(&key) } else { None }
        };
        let area = area.ok_or(SysError::ENOENT)?;
        log::debug!("[fmap_area_remove] {:?}", area);
        area.file.put_ref();
        Ok(())
    }

    /// Removes every area of a client that went away. Returns how many.
    pub fn recycle(&self, client: Badge) -> usize {
        let removed: Vec<_> = {
            let mut areas = self.areas.write();
            let keys: Vec<_> = areas
                .range((client, 0)..=(client, usize::MAX))
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| areas.remove(key)).collect()
        };
        for area in &removed {
            area.file.put_ref();
        }
        log::debug!("[fmap_area_recycle] client {}: {} areas", client, removed.len());
        removed.len()
    }

    /// Number of areas of `client`.
    pub fn count_of(&self, client: Badge) -> usize {
        self.areas
            .read()
            .range((client, 0)..=(client, usize::MAX))
            .count()
    }
}

impl<F: FmapFile> Default for FmapAreaTable<F> {
    fn default() -> Self {
        Self::new()
    }
}
