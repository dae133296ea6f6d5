/// Disk block size in bytes
pub const BLOCK_SIZE: usize = 1024;

/// Physical page frame size in bytes
pub const PAGE_SIZE: usize = 4096;

/// Block device identifier
pub type DeviceId = u32;

/// Block number within a device
pub type BlockNo = u32;

/// Index of a buffer slot in the cache arena
pub type SlotId = usize;

/// Index of a physical page frame
pub type FrameId = usize;

/// Processor core identifier
pub type CoreId = usize;

/// Virtual address
pub type VirtAddr = usize;

/// Payload of one cached disk block
pub type BlockData = [u8; BLOCK_SIZE];

/// Payload of one page frame
pub type PageData = [u8; PAGE_SIZE];
