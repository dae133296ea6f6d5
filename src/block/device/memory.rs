use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::block::device::driver::{BlockDevice, DeviceError, Direction};
use crate::common::types::{BlockData, BlockNo, DeviceId};

/// In-memory block store serving any device id.
///
/// Blocks that were never written read as zeroes, like a fresh volume
/// image. Transfer counters make cache behavior observable in tests and
/// benches.
#[derive(Default)]
pub struct MemDisk {
    blocks: Mutex<HashMap<(DeviceId, BlockNo), Box<BlockData>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemDisk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read transfers served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Write transfers served so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BlockDevice for MemDisk {
    fn transfer(
        &self,
        dev: DeviceId,
        blockno: BlockNo,
        data: &mut BlockData,
        dir: Direction,
    ) -> Result<(), DeviceError> {
        match dir {
            Direction::Read => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                match self.blocks.lock().get(&(dev, blockno)) {
                    Some(stored) => data.copy_from_slice(&stored[..]),
                    None => data.fill(0),
                }
            }
            Direction::Write => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                self.blocks.lock().insert((dev, blockno), Box::new(*data));
            }
        }
        Ok(())
    }
}
