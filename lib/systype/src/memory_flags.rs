//! Module for abstracting memory permissions.

use bitflags::bitflags;

bitflags! {
    /// Permission of a mapping installed into a client address space.
    ///
    /// For types of memory accesses and memory protection, these bits can be ORed
    /// together:
    /// - `R`: Read
    /// - `W`: Write
    /// - `X`: Execute
    ///
    /// Do not set any unknown bits.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MappingFlags: u64 {
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;

        // Mask for R, W, and X bits.
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

bitflags! {
    /// Memory protection/access flags for system calls like `mmap`.
    ///
    /// Note that `MappingFlags` is an interior representation of general memory access
    /// permissions, while `MmapProt` is used as an interface for Linux-compatible
    /// system calls.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MmapProt: i32 {
        /// No access.
        const PROT_NONE = 0x0;
        /// Page can be read.
        const PROT_READ = 0x1;
        /// Page can be written.
        const PROT_WRITE = 0x2;
        /// Page can be executed.
        const PROT_EXEC = 0x4;
    }
}

bitflags! {
    /// Flags for `mmap` system call that specify how the memory should be mapped.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MmapFlags: i32 {
        // Sharing types (must choose one and only one of these).
        /// Share changes.
        const MAP_SHARED = 0x01;
        /// Changes are private.
        const MAP_PRIVATE = 0x02;
        /// Share changes and validate
        const MAP_SHARED_VALIDATE = 0x03;
        const MAP_TYPE_MASK = 0x03;

        // Other flags
        /// Interpret addr exactly.
        const MAP_FIXED = 0x10;
        /// Don't use a file.
        const MAP_ANONYMOUS = 0x20;
        /// Don't check for reservations.
        const MAP_NORESERVE = 0x04000;
        /// Like `MAP_FIXED` but never clobbers an existing mapping.
        const MAP_FIXED_NOREPLACE = 0x100000;
    }
}

impl MmapFlags {
    /// Whether the sharing type is `MAP_SHARED` (or its validating variant).
    pub fn is_shared(self) -> bool {
        matches!(
            self.intersection(MmapFlags::MAP_TYPE_MASK),
            MmapFlags::MAP_SHARED | MmapFlags::MAP_SHARED_VALIDATE
        )
    }

    /// Whether the sharing type is exactly `MAP_PRIVATE`.
    pub fn is_private(self) -> bool {
        self.intersection(MmapFlags::MAP_TYPE_MASK) == MmapFlags::MAP_PRIVATE
    }
}

impl From<MmapProt> for MappingFlags {
    /// Creates a set of `MappingFlags` from a set of `MmapProt`. `RWX` bits are set
    /// according to the `MmapProt` bits.
    fn from(prot: MmapProt) -> Self {
        let mut ret = MappingFlags::empty();
        if prot.contains(MmapProt::PROT_READ) {
            ret |= Self::R;
        }
        if prot.contains(MmapProt::PROT_WRITE) {
            ret |= Self::W;
        }
        if prot.contains(MmapProt::PROT_EXEC) {
            ret |= Self::X;
        }
        ret
    }
}

impl From<MappingFlags> for MmapProt {
    /// Creates a set of `MmapProt` from a set of `MappingFlags`. Only `R`, `W`, and `X`
    /// bits in `flags` are considered, and the rest are ignored.
    fn from(flags: MappingFlags) -> Self {
        let mut ret = MmapProt::PROT_NONE;
        if flags.contains(MappingFlags::R) {
            ret |= MmapProt::PROT_READ;
        }
        if flags.contains(MappingFlags::W) {
            ret |= MmapProt::PROT_WRITE;
        }
        if flags.contains(MappingFlags::X) {
            ret |= MmapProt::PROT_EXEC;
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharing_type_is_read_from_the_type_mask() {
        assert!(MmapFlags::MAP_SHARED.is_shared());
        assert!(MmapFlags::MAP_SHARED_VALIDATE.is_shared());
        assert!(!MmapFlags::MAP_SHARED_VALIDATE.is_private());
        assert!((MmapFlags::MAP_PRIVATE | MmapFlags::MAP_FIXED).is_private());
    }

    #[test]
    fn prot_converts_to_mapping_flags() {
        let flags = MappingFlags::from(MmapProt::PROT_READ | MmapProt::PROT_EXEC);
        assert_eq!(flags, MappingFlags::R | MappingFlags::X);
        assert_eq!(MmapProt::from(MappingFlags::RWX).bits(), 0x7);
    }
}
