// Frame allocator integration tests

use anyhow::Result;

use gamayun_mm::{AllocError, FrameAllocator};

/// Exhausting one core's shard pulls exactly half of a donor shard over,
/// rounded up, and no more.
#[test]
fn stealing_moves_half_of_the_donor_list() -> Result<()> {
    let pool = FrameAllocator::new(12, 3);
    let core0 = pool.core(0);

    let mut held = Vec::new();
    while pool.free_count(0) > 0 {
        held.push(core0.allocate()?);
    }
    let donor_before = pool.free_count(1);
    assert_eq!(donor_before, 4);

    held.push(core0.allocate()?);

    let stolen = donor_before - pool.free_count(1);
    assert_eq!(stolen, donor_before.div_ceil(2));
    assert_eq!(pool.free_count(0), stolen - 1);

    for frame in held {
        core0.free(frame);
    }
    assert_eq!(pool.total_free(), 12);
    Ok(())
}

#[test]
fn allocation_failure_is_an_error_not_a_crash() -> Result<()> {
    let pool = FrameAllocator::new(6, 2);
    let core0 = pool.core(0);

    let mut held = Vec::new();
    loop {
        match core0.allocate() {
            Ok(frame) => held.push(frame),
            Err(AllocError::Exhausted) => break,
        }
    }
    assert_eq!(held.len(), 6);
    assert_eq!(pool.total_free(), 0);

    // The caller recovers by giving something back.
    let frame = held.pop().unwrap();
    core0.free(frame);
    assert_eq!(core0.allocate()?, frame);
    core0.free(frame);
    for frame in held {
        core0.free(frame);
    }
    Ok(())
}

#[test]
fn references_balance_across_cores() -> Result<()> {
    let pool = FrameAllocator::new(4, 2);
    let core0 = pool.core(0);
    let core1 = pool.core(1);

    let frame = core0.allocate()?;
    pool.add_reference(frame);

    // Either side may drop its reference first; the frame is reclaimed on
    // the second free, onto the freeing core's shard.
    core0.free(frame);
    assert_eq!(pool.reference_count(frame), 1);
    assert_eq!(pool.total_free(), 3);

    core1.free(frame);
    assert_eq!(pool.reference_count(frame), 0);
    assert_eq!(pool.total_free(), 4);
    assert_eq!(pool.free_count(1), 3);
    Ok(())
}

/// Hammer allocate/free from one thread per core; every frame must come
/// back at the end and no frame may be handed out twice concurrently.
#[test]
fn no_frame_is_lost_or_duplicated_under_contention() {
    use std::collections::HashSet;

    let pool = FrameAllocator::new(64, 4);
    let pool = &pool;

    crossbeam::thread::scope(|s| {
        for core_id in 0..pool.core_count() {
            s.spawn(move |_| {
                let core = pool.core(core_id);
                let mut held = Vec::new();
                for round in 0..500 {
                    // Vary pressure so shards drain and refill.
                    let want = (core_id + round) % 24;
                    while held.len() < want {
                        match core.allocate() {
                            Ok(frame) => held.push(frame),
                            Err(AllocError::Exhausted) => break,
                        }
                    }
                    // A thread's held frames are distinct.
                    let unique: HashSet<_> = held.iter().copied().collect();
                    assert_eq!(unique.len(), held.len());
                    while held.len() > want / 2 {
                        core.free(held.pop().unwrap());
                    }
                }
                for frame in held {
                    core.free(frame);
                }
            });
        }
    })
    .unwrap();

    assert_eq!(pool.total_free(), 64);
    for frame in 0..64 {
        assert_eq!(pool.reference_count(frame), 0);
    }
}
