use std::ops::{Deref, DerefMut};

use parking_lot::MutexGuard;

use crate::block::cache::error::CacheError;
use crate::block::cache::manager::BufferCache;
use crate::block::device::BlockDevice;
use crate::common::types::{BlockData, BlockNo, DeviceId, SlotId};

/// Exclusive handle on one cached block.
///
/// Owns the block's content lock for its whole lifetime; dropping the
/// handle unlocks the content and gives the reference back, so a released
/// handle cannot be used or released twice.
pub struct BlockGuard<'a, D: BlockDevice> {
    cache: &'a BufferCache<D>,
    slot: SlotId,
    dev: DeviceId,
    blockno: BlockNo,
    data: Option<MutexGuard<'a, BlockData>>,
}

impl<'a, D: BlockDevice> BlockGuard<'a, D> {
    pub(crate) fn new(
        cache: &'a BufferCache<D>,
        slot: SlotId,
        dev: DeviceId,
        blockno: BlockNo,
        data: MutexGuard<'a, BlockData>,
    ) -> Self {
        Self {
            cache,
            slot,
            dev,
            blockno,
            data: Some(data),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.dev
    }

    pub fn blockno(&self) -> BlockNo {
        self.blockno
    }

    /// Write the payload through to the device.
    pub fn commit(&mut self) -> Result<(), CacheError> {
        let cache = self.cache;
        let dev = self.dev;
        let blockno = self.blockno;
        cache.write_through(dev, blockno, self.payload_mut())
    }

    /// Keep the block resident after this handle is gone. The pin holds a
    /// reference without the content lock; give it back with
    /// [`BufferCache::unpin`].
    pub fn pin(&self) -> PinnedBlock {
        self.cache.pin_slot(self.slot, self.blockno);
        PinnedBlock {
            slot: self.slot,
            dev: self.dev,
            blockno: self.blockno,
        }
    }

    fn payload(&self) -> &BlockData {
        self.data.as_deref().expect("content lock held until drop")
    }

    fn payload_mut(&mut self) -> &mut BlockData {
        self.data.as_deref_mut().expect("content lock held until drop")
    }
}

impl<D: BlockDevice> Deref for BlockGuard<'_, D> {
    type Target = BlockData;

    fn deref(&self) -> &BlockData {
        self.payload()
    }
}

impl<D: BlockDevice> DerefMut for BlockGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut BlockData {
        self.payload_mut()
    }
}

impl<D: BlockDevice> Drop for BlockGuard<'_, D> {
    fn drop(&mut self) {
        // Unlock the content before giving up the reference, so a recycler
        // never sees an unreferenced slot whose payload is still borrowed.
        self.data.take();
        self.cache.release_slot(self.slot, self.blockno);
    }
}

/// Residency token: a reference on a cached block held without its content
/// lock, keeping the slot from being recycled (journal blocks use this).
#[derive(Debug)]
pub struct PinnedBlock {
    pub(crate) slot: SlotId,
    pub(crate) dev: DeviceId,
    pub(crate) blockno: BlockNo,
}

impl PinnedBlock {
    pub fn device(&self) -> DeviceId {
        self.dev
    }

    pub fn blockno(&self) -> BlockNo {
        self.blockno
    }
}

impl<D: BlockDevice> BufferCache<D> {
    /// Release a residency pin taken with [`BlockGuard::pin`].
    pub fn unpin(&self, pinned: PinnedBlock) {
        self.release_slot(pinned.slot, pinned.blockno);
    }
}
