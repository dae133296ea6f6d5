use crossbeam::utils::CachePadded;
use log::{debug, info};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::common::types::{CoreId, FrameId, PageData, PAGE_SIZE};
use crate::mem::frame::error::AllocError;

/// Free-frame list owned by one core. The top of the list is the most
/// recently freed frame.
struct Shard {
    free: Vec<FrameId>,
}

/// Pool of physical page frames, sharded per core.
///
/// Frames and the reference-count table are pre-allocated at construction;
/// "free" only ever means membership in some shard's free list. Each shard
/// is padded to its own cache line so cores do not false-share the lock
/// words.
pub struct FrameAllocator {
    shards: Box<[CachePadded<Mutex<Shard>>]>,
    /// Live-mapping counts, indexed by frame. Guarded by its own lock and
    /// never held together with a shard lock.
    refs: Mutex<Box<[u32]>>,
    pages: Box<[RwLock<PageData>]>,
}

impl FrameAllocator {
    /// Build the frame pool, spreading the free frames evenly across the
    /// per-core shards.
    pub fn new(frame_count: usize, core_count: usize) -> Self {
        assert!(frame_count > 0, "frame pool needs at least one frame");
        assert!(core_count > 0, "frame pool needs at least one core");

        let mut shards: Vec<CachePadded<Mutex<Shard>>> = (0..core_count)
            .map(|_| {
                CachePadded::new(Mutex::new(Shard {
                    free: Vec::with_capacity(frame_count / core_count + 1),
                }))
            })
            .collect();
        for frame in 0..frame_count {
            shards[frame % core_count].get_mut().free.push(frame);
        }

        let pages = (0..frame_count)
            .map(|_| RwLock::new([0u8; PAGE_SIZE]))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        info!("frame pool: {} frames across {} cores", frame_count, core_count);

        Self {
            shards: shards.into_boxed_slice(),
            refs: Mutex::new(vec![0u32; frame_count].into_boxed_slice()),
            pages,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.pages.len()
    }

    pub fn core_count(&self) -> usize {
        self.shards.len()
    }

    /// Bind allocator operations to `core`'s shard. The handle fixes the
    /// shard identity for the whole of each operation; callers must not
    /// migrate work between cores while one is live.
    pub fn core(&self, core: CoreId) -> CoreHandle<'_> {
        assert!(core < self.shards.len(), "core {} out of range", core);
        CoreHandle { pool: self, core }
    }

    /// Free frames currently held by one core's shard.
    pub fn free_count(&self, core: CoreId) -> usize {
        self.shards[core].lock().free.len()
    }

    /// Free frames across every shard.
    pub fn total_free(&self) -> usize {
        (0..self.shards.len()).map(|core| self.free_count(core)).sum()
    }

    /// Live-mapping count of a frame. Zero means the frame is free.
    pub fn reference_count(&self, frame: FrameId) -> u32 {
        self.refs.lock()[frame]
    }

    /// Record one more live mapping of `frame`, e.g. when fork duplicates a
    /// read-only mapping instead of copying the frame.
    pub fn add_reference(&self, frame: FrameId) {
        let mut refs = self.refs.lock();
        if refs[frame] == 0 {
            panic!("frame {}: reference added to a free frame", frame);
        }
        refs[frame] += 1;
    }

    /// Payload of one frame.
    pub fn page(&self, frame: FrameId) -> &RwLock<PageData> {
        &self.pages[frame]
    }
}

/// Allocator operations bound to one core's shard.
pub struct CoreHandle<'a> {
    pool: &'a FrameAllocator,
    core: CoreId,
}

impl CoreHandle<'_> {
    pub fn id(&self) -> CoreId {
        self.core
    }

    pub(crate) fn pool(&self) -> &FrameAllocator {
        self.pool
    }

    /// Allocate one frame, stealing from another core's shard when the
    /// local one is empty. The returned frame starts with one reference.
    pub fn allocate(&self) -> Result<FrameId, AllocError> {
        let pool = self.pool;

        let mut local = pool.shards[self.core].lock();
        if local.free.is_empty() {
            drop(local);
            local = self.refill()?;
        }
        let frame = local.free.pop().ok_or(AllocError::Exhausted)?;
        drop(local);

        pool.refs.lock()[frame] = 1;
        Ok(frame)
    }

    /// Drop one reference to `frame`. The last reference wipes the payload
    /// and returns the frame to this core's free list.
    pub fn free(&self, frame: FrameId) {
        let pool = self.pool;
        assert!(frame < pool.pages.len(), "frame {} out of range", frame);

        let last = {
            let mut refs = pool.refs.lock();
            if refs[frame] == 0 {
                panic!("frame {}: double free", frame);
            }
            refs[frame] -= 1;
            refs[frame] == 0
        };

        if last {
            pool.pages[frame].write().fill(0);
            pool.shards[self.core].lock().free.push(frame);
        }
    }

    /// Fixed-order scan of the shards for a donor with spare frames. On
    /// success half of the donor's list (rounded up) has been moved into
    /// the local shard, whose re-acquired lock is returned.
    ///
    /// The local lock is dropped before the scan starts, so shard locks are
    /// only ever taken in ascending index order; the local shard is locked
    /// when the scan reaches it, or after the scan when a donor with a
    /// smaller index ended it early.
    fn refill(&self) -> Result<MutexGuard<'_, Shard>, AllocError> {
        let pool = self.pool;

        let mut local: Option<MutexGuard<Shard>> = None;
        let mut donor: Option<(CoreId, MutexGuard<Shard>)> = None;
        for i in 0..pool.shards.len() {
            if i == self.core {
                local = Some(pool.shards[i].lock());
                continue;
            }
            let guard = pool.shards[i].lock();
            if !guard.free.is_empty() {
                donor = Some((i, guard));
                break;
            }
        }
        let mut local = local.unwrap_or_else(|| pool.shards[self.core].lock());

        let Some((from, mut donor)) = donor else {
            return Err(AllocError::Exhausted);
        };

        let keep = donor.free.len() / 2;
        let stolen = donor.free.split_off(keep);
        drop(donor);

        debug!("core {} stole {} frames from core {}", self.core, stolen.len(), from);
        local.free.extend(stolen);
        Ok(local)
    }
}
