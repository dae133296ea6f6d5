use bitflags::bitflags;

use crate::common::types::{FrameId, VirtAddr};

bitflags! {
    /// Permission and state bits of one page-table entry. COW is a
    /// software-defined bit marking a frame shared until first write.
    pub struct PteFlags: u8 {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const USER = 1 << 3;
        const COW = 1 << 7;
    }
}

/// One leaf page-table entry: permission bits plus the mapped frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub flags: PteFlags,
    pub frame: FrameId,
}

impl PageTableEntry {
    pub fn new(frame: FrameId, flags: PteFlags) -> Self {
        Self { flags, frame }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::WRITE)
    }

    pub fn is_cow(&self) -> bool {
        self.flags.contains(PteFlags::COW)
    }
}

/// Page-table walking, supplied by the paging layer: resolve a virtual
/// address to its leaf entry.
pub trait AddressSpace {
    fn translate(&mut self, va: VirtAddr) -> Option<&mut PageTableEntry>;
}
