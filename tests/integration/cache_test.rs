// Buffer cache integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;

use anyhow::Result;

use gamayun_mm::{BufferCache, FileDisk, MemDisk};

fn mem_cache(slots: usize, buckets: usize) -> (Arc<MemDisk>, BufferCache<Arc<MemDisk>>) {
    let disk = Arc::new(MemDisk::new());
    let cache = BufferCache::new(disk.clone(), slots, buckets);
    (disk, cache)
}

#[test]
fn committed_blocks_survive_eviction() -> Result<()> {
    let (disk, cache) = mem_cache(2, 1);

    {
        let mut block = cache.read(0, 3)?;
        block[..5].copy_from_slice(b"hello");
        block.commit()?;
    }
    assert_eq!(disk.writes(), 1);

    // Push block 3 out of the pool, then read it back from the device.
    drop(cache.read(0, 10)?);
    drop(cache.read(0, 11)?);

    let block = cache.read(0, 3)?;
    assert_eq!(&block[..5], b"hello");
    Ok(())
}

#[test]
fn uncommitted_changes_never_reach_the_device() -> Result<()> {
    let (disk, cache) = mem_cache(2, 1);

    {
        let mut block = cache.read(0, 3)?;
        block[0] = 0xFF;
        // dropped without commit
    }
    drop(cache.read(0, 10)?);
    drop(cache.read(0, 11)?);

    let block = cache.read(0, 3)?;
    assert_eq!(block[0], 0);
    assert_eq!(disk.writes(), 0);
    Ok(())
}

/// Two cores loading the same block share one buffer and one transfer. The
/// second reader holds a reference while it waits on the content lock, so
/// the count reaches two before either handle is released.
#[test]
fn concurrent_loads_of_one_block_share_the_buffer() {
    let (disk, cache) = mem_cache(8, 4);
    let acquired = Barrier::new(2);
    let release = AtomicBool::new(false);

    crossbeam::thread::scope(|s| {
        s.spawn(|_| {
            let block = cache.read(0, 5).unwrap();
            acquired.wait();
            while !release.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            drop(block);
        });
        s.spawn(|_| {
            acquired.wait();
            // Blocks behind the first holder's content lock.
            let block = cache.read(0, 5).unwrap();
            assert_eq!(block[0], 0);
        });

        while cache.reference_count(0, 5) != Some(2) {
            thread::yield_now();
        }
        release.store(true, Ordering::SeqCst);
    })
    .unwrap();

    assert_eq!(cache.reference_count(0, 5), Some(0));
    assert_eq!(disk.reads(), 1);
}

/// With every slot referenced, the next lookup is a fatal condition, never
/// a silent wrong result.
#[test]
fn lookup_with_every_slot_held_is_fatal() {
    let (_disk, cache) = mem_cache(2, 1);

    let _a = cache.read(0, 1).unwrap();
    let _b = cache.read(0, 2).unwrap();

    crossbeam::thread::scope(|s| {
        let result = s
            .spawn(|_| {
                let _ = cache.read(0, 3);
            })
            .join();
        assert!(result.is_err(), "expected the lookup to panic");
    })
    .unwrap();
}

#[test]
fn saturated_bucket_borrows_a_slot_from_another() -> Result<()> {
    // Two buckets with two slots each; holding three even blocks forces a
    // migration out of the odd bucket.
    let (disk, cache) = mem_cache(4, 2);

    let g0 = cache.read(0, 0)?;
    let g2 = cache.read(0, 2)?;
    let g4 = cache.read(0, 4)?;
    assert_eq!(disk.reads(), 3);

    drop(g4);
    drop(g2);
    drop(g0);

    // Still cached after the migration.
    drop(cache.read(0, 4)?);
    assert_eq!(disk.reads(), 3);
    Ok(())
}

#[test]
fn pinned_journal_block_stays_resident() -> Result<()> {
    let (disk, cache) = mem_cache(2, 1);

    let pin = {
        let block = cache.read(0, 1)?;
        block.pin()
    };

    for blockno in 2..=7 {
        drop(cache.read(0, blockno)?);
    }

    // One load for block 1, six for the churned blocks; re-reading block 1
    // is still a hit.
    drop(cache.read(0, 1)?);
    assert_eq!(disk.reads(), 7);

    cache.unpin(pin);
    Ok(())
}

#[test]
fn parallel_readers_see_consistent_blocks() -> Result<()> {
    let (disk, cache) = mem_cache(16, 4);
    let workers = 4;
    let rounds = 200;

    let cache = &cache;
    crossbeam::thread::scope(|s| {
        for w in 0..workers {
            s.spawn(move |_| {
                for round in 0..rounds {
                    let blockno = ((w * 7 + round) % 24) as u32;
                    let mut block = cache.read(0, blockno).unwrap();
                    // Each block always carries its own number.
                    let tag = block[0];
                    assert!(tag == 0 || tag == blockno as u8, "block {} carried tag {}", blockno, tag);
                    block[0] = blockno as u8;
                    block.commit().unwrap();
                }
            });
        }
    })
    .unwrap();

    assert!(disk.writes() >= (workers * rounds) as u64);
    Ok(())
}

#[test]
fn file_backed_volume_round_trips() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("volume.img");

    {
        let cache = BufferCache::new(FileDisk::open(&path)?, 8, 2);
        let mut block = cache.read(0, 9)?;
        block[..6].copy_from_slice(b"gamyun");
        block.commit()?;
    }

    // A fresh cache over the same image sees the committed payload.
    let cache = BufferCache::new(FileDisk::open(&path)?, 8, 2);
    let block = cache.read(0, 9)?;
    assert_eq!(&block[..6], b"gamyun");

    // Blocks never written read as zeroes.
    let empty = cache.read(0, 2)?;
    assert!(empty.iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn garbage_files_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("not-a-volume");
    std::fs::write(&path, b"plain text, not an image")?;

    assert!(FileDisk::open(&path).is_err());
    Ok(())
}
