use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};

use crate::block::cache::error::CacheError;
use crate::block::cache::handle::BlockGuard;
use crate::block::device::{BlockDevice, Direction};
use crate::common::types::{BlockData, BlockNo, DeviceId, SlotId, BLOCK_SIZE};

/// Bookkeeping for one cached block. Identity, refcount and list links only
/// change under the owning bucket's lock; the valid flag is settled while
/// the slot's content lock is held.
pub(crate) struct SlotMeta {
    /// (device, block number) this slot caches; `None` until first bound.
    pub(crate) ident: Option<(DeviceId, BlockNo)>,
    /// Whether the payload reflects the on-device block.
    pub(crate) valid: bool,
    /// Active holders: content-lock handles plus residency pins.
    pub(crate) refcnt: u32,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

pub(crate) struct BufferSlot {
    pub(crate) meta: Mutex<SlotMeta>,
    /// Content lock. Blocking; held across device transfers.
    pub(crate) block: Mutex<BlockData>,
}

/// One hash partition of the slot pool: a recency-ordered intrusive list of
/// the slots whose block number maps here. `head` is the most recently
/// released slot, `tail` the least.
struct Bucket {
    head: Option<SlotId>,
    tail: Option<SlotId>,
}

/// Fixed-size cache of disk blocks, sharded into hash buckets.
///
/// Slots are pre-allocated at construction and only ever recycled: a slot's
/// block identity is reassigned when it is evicted for another block. Each
/// bucket has its own structural lock; a single eviction coordinator lock
/// serializes cross-bucket migration.
pub struct BufferCache<D: BlockDevice> {
    device: D,
    slots: Box<[BufferSlot]>,
    buckets: Box<[Mutex<Bucket>]>,
    /// Cross-bucket migration coordinator. Never acquired while a bucket
    /// lock is held.
    eviction: Mutex<()>,
}

impl<D: BlockDevice> BufferCache<D> {
    pub fn new(device: D, slot_count: usize, bucket_count: usize) -> Self {
        assert!(slot_count > 0, "buffer cache needs at least one slot");
        assert!(bucket_count > 0, "buffer cache needs at least one bucket");

        let mut slots: Vec<BufferSlot> = Vec::with_capacity(slot_count);
        let mut heads: Vec<Option<SlotId>> = vec![None; bucket_count];
        let mut tails: Vec<Option<SlotId>> = vec![None; bucket_count];

        for i in 0..slot_count {
            let b = i % bucket_count;
            slots.push(BufferSlot {
                meta: Mutex::new(SlotMeta {
                    ident: None,
                    valid: false,
                    refcnt: 0,
                    prev: None,
                    next: heads[b],
                }),
                block: Mutex::new([0u8; BLOCK_SIZE]),
            });
            if let Some(h) = heads[b] {
                slots[h].meta.get_mut().prev = Some(i);
            } else {
                tails[b] = Some(i);
            }
            heads[b] = Some(i);
        }

        let buckets = heads
            .into_iter()
            .zip(tails)
            .map(|(head, tail)| Mutex::new(Bucket { head, tail }))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        info!(
            "buffer cache: {} slots across {} buckets",
            slot_count, bucket_count
        );

        Self {
            device,
            slots: slots.into_boxed_slice(),
            buckets,
            eviction: Mutex::new(()),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Return a handle on the cached block, loading the payload from the
    /// device if the cached copy is not valid. The handle owns the block's
    /// content lock until dropped.
    pub fn read(&self, dev: DeviceId, blockno: BlockNo) -> Result<BlockGuard<'_, D>, CacheError> {
        let id = self.acquire_slot(dev, blockno);
        let mut data = self.slots[id].block.lock();

        let valid = self.slots[id].meta.lock().valid;
        if !valid {
            if let Err(e) = self.device.transfer(dev, blockno, &mut data, Direction::Read) {
                // Give the reference back before surfacing the failure.
                drop(data);
                self.release_slot(id, blockno);
                return Err(e.into());
            }
            self.slots[id].meta.lock().valid = true;
        }

        Ok(BlockGuard::new(self, id, dev, blockno, data))
    }

    /// Current reference count of a cached block, if present.
    pub fn reference_count(&self, dev: DeviceId, blockno: BlockNo) -> Option<u32> {
        let bucket = self.buckets[self.bucket_index(blockno)].lock();
        let id = self.lookup(&bucket, dev, blockno)?;
        let refcnt = self.slots[id].meta.lock().refcnt;
        Some(refcnt)
    }

    fn bucket_index(&self, blockno: BlockNo) -> usize {
        blockno as usize % self.buckets.len()
    }

    /// Find or recycle a slot for (dev, blockno) and take a reference on it.
    /// Returns with no locks held; the caller acquires the content lock.
    ///
    /// Fast paths run under the home bucket's lock alone: a cache hit, or
    /// recycling the least recently released unreferenced slot of the same
    /// bucket. When the home bucket is saturated the lock is dropped and the
    /// eviction coordinator taken; every bucket is then scanned in index
    /// order for a donor slot, keeping at most the home and donor bucket
    /// locks. The home bucket is re-checked before migrating, since other
    /// cores may have loaded the block or freed a local slot in the gap.
    fn acquire_slot(&self, dev: DeviceId, blockno: BlockNo) -> SlotId {
        let target = self.bucket_index(blockno);

        {
            let mut bucket = self.buckets[target].lock();
            if let Some(id) = self.lookup(&bucket, dev, blockno) {
                self.slots[id].meta.lock().refcnt += 1;
                return id;
            }
            if let Some(id) = self.free_slot(&bucket) {
                self.rebind(&mut bucket, id, dev, blockno);
                return id;
            }
        }

        let _eviction = self.eviction.lock();
        debug!(
            "bcache: bucket {} saturated, scanning for a donor (dev {} block {})",
            target, dev, blockno
        );

        // Fixed-order scan. The target bucket's lock is kept once reached so
        // the re-check below stays consistent; any other bucket is unlocked
        // again unless it turns out to be the donor.
        let mut target_guard: Option<MutexGuard<Bucket>> = None;
        let mut donor: Option<(usize, MutexGuard<Bucket>, SlotId)> = None;
        for i in 0..self.buckets.len() {
            let guard = self.buckets[i].lock();
            let free = self.free_slot(&guard);
            if i == target {
                target_guard = Some(guard);
                if free.is_some() {
                    break;
                }
            } else if let Some(id) = free {
                donor = Some((i, guard, id));
                break;
            }
        }

        // Re-lock the original target bucket if the scan stopped before
        // reaching it. Index order is preserved: a donor found first always
        // has a smaller index than the target.
        let mut target_guard = target_guard.unwrap_or_else(|| self.buckets[target].lock());

        // Another core may have loaded the block while no lock was held.
        if let Some(id) = self.lookup(&target_guard, dev, blockno) {
            self.slots[id].meta.lock().refcnt += 1;
            return id;
        }
        // Or released a slot of the home bucket, sparing the migration.
        if let Some(id) = self.free_slot(&target_guard) {
            self.rebind(&mut target_guard, id, dev, blockno);
            return id;
        }

        let Some((from, mut donor_guard, id)) = donor else {
            panic!("bcache: out of buffers (dev {}, block {})", dev, blockno);
        };

        // Migrate the donor slot into the target bucket under both locks.
        self.unlink(&mut donor_guard, id);
        self.push_front(&mut target_guard, id);
        self.rebind(&mut target_guard, id, dev, blockno);
        debug!("bcache: migrated slot {} from bucket {} to bucket {}", id, from, target);
        id
    }

    /// Reassign an unreferenced slot to a new block identity and take the
    /// first reference. Caller holds the owning bucket's lock.
    fn rebind(&self, _bucket: &mut Bucket, id: SlotId, dev: DeviceId, blockno: BlockNo) {
        let mut meta = self.slots[id].meta.lock();
        debug_assert_eq!(meta.refcnt, 0);
        meta.ident = Some((dev, blockno));
        meta.valid = false;
        meta.refcnt = 1;
    }

    /// Drop one reference to a slot. At zero the slot moves to its bucket's
    /// most-recently-released position.
    pub(crate) fn release_slot(&self, id: SlotId, blockno: BlockNo) {
        let mut bucket = self.buckets[self.bucket_index(blockno)].lock();
        let remaining = {
            let mut meta = self.slots[id].meta.lock();
            if meta.refcnt == 0 {
                panic!("bcache: release of unreferenced slot {} (block {})", id, blockno);
            }
            meta.refcnt -= 1;
            meta.refcnt
        };
        if remaining == 0 {
            self.unlink(&mut bucket, id);
            self.push_front(&mut bucket, id);
        }
    }

    /// Take an extra reference without the content lock.
    pub(crate) fn pin_slot(&self, id: SlotId, blockno: BlockNo) {
        let _bucket = self.buckets[self.bucket_index(blockno)].lock();
        self.slots[id].meta.lock().refcnt += 1;
    }

    pub(crate) fn write_through(
        &self,
        dev: DeviceId,
        blockno: BlockNo,
        data: &mut BlockData,
    ) -> Result<(), CacheError> {
        self.device.transfer(dev, blockno, data, Direction::Write)?;
        Ok(())
    }

    fn lookup(&self, bucket: &Bucket, dev: DeviceId, blockno: BlockNo) -> Option<SlotId> {
        let mut cur = bucket.head;
        while let Some(id) = cur {
            let meta = self.slots[id].meta.lock();
            if meta.ident == Some((dev, blockno)) {
                return Some(id);
            }
            cur = meta.next;
        }
        None
    }

    /// Least recently released slot with no holders, scanning from the tail.
    fn free_slot(&self, bucket: &Bucket) -> Option<SlotId> {
        let mut cur = bucket.tail;
        while let Some(id) = cur {
            let meta = self.slots[id].meta.lock();
            if meta.refcnt == 0 {
                return Some(id);
            }
            cur = meta.prev;
        }
        None
    }

    fn unlink(&self, bucket: &mut Bucket, id: SlotId) {
        let (prev, next) = {
            let mut meta = self.slots[id].meta.lock();
            let links = (meta.prev, meta.next);
            meta.prev = None;
            meta.next = None;
            links
        };
        match prev {
            Some(p) => self.slots[p].meta.lock().next = next,
            None => bucket.head = next,
        }
        match next {
            Some(n) => self.slots[n].meta.lock().prev = prev,
            None => bucket.tail = prev,
        }
    }

    fn push_front(&self, bucket: &mut Bucket, id: SlotId) {
        {
            let mut meta = self.slots[id].meta.lock();
            meta.prev = None;
            meta.next = bucket.head;
        }
        match bucket.head {
            Some(h) => self.slots[h].meta.lock().prev = Some(id),
            None => bucket.tail = Some(id),
        }
        bucket.head = Some(id);
    }

    /// Quiescent-state consistency check: every slot on exactly one bucket
    /// list, bound slots in the bucket their block number hashes to, links
    /// intact.
    #[cfg(test)]
    pub(crate) fn validate(&self) {
        let mut seen = vec![false; self.slots.len()];
        for (b, bucket) in self.buckets.iter().enumerate() {
            let bucket = bucket.lock();
            let mut cur = bucket.head;
            let mut prev = None;
            while let Some(id) = cur {
                assert!(!seen[id], "slot {} on two bucket lists", id);
                seen[id] = true;
                let meta = self.slots[id].meta.lock();
                if let Some((_, blockno)) = meta.ident {
                    assert_eq!(self.bucket_index(blockno), b, "slot {} in the wrong bucket", id);
                }
                assert_eq!(meta.prev, prev, "broken back-link at slot {}", id);
                prev = cur;
                cur = meta.next;
            }
            assert_eq!(bucket.tail, prev, "bucket {} tail out of sync", b);
        }
        assert!(seen.iter().all(|&s| s), "slot missing from every bucket list");
    }
}
