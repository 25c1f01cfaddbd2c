//! End-to-end tests through the public allocator and buffer contracts

use chunkslab::slab::{LONG_BYTES, LONG_SENTINEL};
use chunkslab::{Allocator, AllocatorConfig, LongBuffer, SlabAllocator};
use std::sync::Arc;
use std::thread;

fn small_slab() -> SlabAllocator {
    SlabAllocator::new(&AllocatorConfig::new(1024, 64).with_parallelism(4))
        .expect("Failed to create allocator")
}

/// Consumers only see the two capabilities
fn fill_through_contract<A: Allocator>(allocator: &A, bytes: usize) -> Option<Vec<i64>> {
    let mut buffer = allocator.allocate(bytes)?;
    let mut next = 0i64;
    while buffer.put_long(next) {
        next += 1;
    }
    let values: Vec<i64> = buffer.iter().collect();
    buffer.release();
    Some(values)
}

#[test]
fn test_allocate_bytes_rounds_up_to_chunks() {
    let slab = small_slab();
    assert_eq!(slab.chunk_size(), 64);

    let buffer = slab.allocate(100).expect("allocate(100) should succeed");
    assert_eq!(buffer.capacity(), 128);
    assert_eq!(slab.allocated_bytes(), 128);

    buffer.release();
    assert_eq!(slab.allocated_bytes(), 0);
}

#[test]
fn test_fresh_pair_coalesces_into_one_chunk() {
    let slab = small_slab();

    let buffer = slab.allocate_chunks(2).unwrap();
    assert_eq!(buffer.chunk_count(), 1);
    assert_eq!(buffer.chunks()[0].weight(), 2);
    assert_eq!(buffer.capacity(), slab.chunk_size() * 2);
}

#[test]
fn test_sequential_round_trip() {
    let slab = small_slab();
    let values = fill_through_contract(&slab, 200).unwrap();

    // 200 bytes → 4 chunks of 64 → 32 longs
    assert_eq!(values.len(), 32);
    assert!(values.iter().copied().eq(0..32));
    assert_eq!(slab.allocated_bytes(), 0);
}

#[test]
fn test_put_long_accepts_exactly_capacity_over_eight() {
    let slab = small_slab();
    let mut buffer = slab.allocate_chunks(3).unwrap();
    let k = buffer.capacity() / LONG_BYTES;

    for i in 0..k {
        assert!(buffer.put_long(i as i64), "put {} of {} failed", i, k);
    }
    assert!(!buffer.put_long(-1));
    assert_eq!(buffer.len(), k);
}

#[test]
fn test_random_access_reads_back_writes() {
    let slab = small_slab();
    let mut buffer = slab.allocate_chunks(4).unwrap();

    for pos in (0..buffer.capacity()).step_by(LONG_BYTES).rev() {
        assert!(buffer.put_long_at(pos, pos as i64 * 3));
    }
    for pos in (0..buffer.capacity()).step_by(LONG_BYTES) {
        assert_eq!(buffer.get_long(pos), pos as i64 * 3);
    }

    assert!(!buffer.put_long_at(buffer.capacity(), 1));
    assert_eq!(buffer.get_long(buffer.capacity()), LONG_SENTINEL);
}

#[test]
fn test_each_iterator_restarts_at_zero() {
    let slab = small_slab();
    let mut buffer = slab.allocate_chunks(1).unwrap();
    for v in [7, 8, 9] {
        assert!(buffer.put_long(v));
    }

    let mut first = buffer.iter();
    assert_eq!(first.next(), Some(7));
    assert_eq!(first.next(), Some(8));

    let second: Vec<i64> = buffer.iter().collect();
    assert_eq!(second, vec![7, 8, 9]);

    assert_eq!(first.next(), Some(9));
    assert_eq!(first.next(), None);
}

#[test]
fn test_exhaustion_returns_none_and_recovers() {
    let slab = small_slab();
    let total = slab.num_chunks();

    let all = slab.allocate_chunks(total).unwrap();
    assert_eq!(all.capacity(), slab.capacity());
    assert!(slab.allocate_chunks(1).is_none());
    assert!(slab.allocate(1).is_none());
    assert_eq!(slab.allocated_bytes(), slab.capacity());

    all.release();
    assert_eq!(slab.free_bytes(), slab.capacity());
    assert!(slab.allocate_chunks(1).is_some());
}

#[test]
fn test_nearly_full_pool_grants_remainder() {
    let slab = small_slab();
    let total = slab.num_chunks();

    let _most = slab.allocate_chunks(total - 3).unwrap();
    let rest = slab.allocate_chunks(10).unwrap();
    assert_eq!(rest.capacity(), 3 * slab.chunk_size());
    assert!(slab.allocate_chunks(1).is_none());
}

#[test]
fn test_dropping_buffer_returns_memory() {
    let slab = small_slab();
    {
        let _buffer = slab.allocate_chunks(5).unwrap();
        assert_eq!(slab.allocated_bytes(), 5 * slab.chunk_size());
    }
    assert_eq!(slab.allocated_bytes(), 0);
    assert!(slab.bitmap_snapshot().iter().all(|&b| b == 0));
}

#[test]
fn test_buffers_never_share_memory() {
    let slab = small_slab();
    let mut a = slab.allocate_chunks(3).unwrap();
    let mut b = slab.allocate_chunks(3).unwrap();

    while a.put_long(1) {}
    while b.put_long(2) {}

    assert!(a.iter().all(|v| v == 1));
    assert!(b.iter().all(|v| v == 2));
}

#[test]
fn test_stats_serialize() {
    let slab = small_slab();
    let _buffer = slab.allocate_chunks(2).unwrap();

    let json = serde_json::to_value(slab.stats()).unwrap();
    assert_eq!(json["chunk_size"], 64);
    assert_eq!(json["allocated_chunks"], 2);
    assert_eq!(json["allocated_bytes"], 128);
}

#[test]
fn test_config_from_toml_drives_geometry() {
    let cfg = AllocatorConfig::from_toml_str(
        r#"
        capacity = 65536
        chunk_size = 256
        parallelism = 2
        "#,
    )
    .unwrap();
    let slab = SlabAllocator::new(&cfg).unwrap();

    assert_eq!(slab.chunk_size(), 256);
    assert_eq!(slab.capacity(), 65536);
    assert_eq!(slab.num_chunks() % slab.lock_section_size(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    assert!(SlabAllocator::new(&AllocatorConfig::new(0, 64)).is_err());
    assert!(SlabAllocator::new(&AllocatorConfig::new(1024, 0)).is_err());
}

#[test]
fn test_threads_share_one_allocator() {
    let slab = Arc::new(small_slab());

    thread::scope(|s| {
        for t in 0..4i64 {
            let slab = Arc::clone(&slab);
            s.spawn(move || {
                for _ in 0..500 {
                    let Some(mut buffer) = slab.allocate_chunks(2) else {
                        continue;
                    };
                    while buffer.put_long(t) {}
                    assert!(buffer.iter().all(|v| v == t));
                    buffer.release();
                }
            });
        }
    });

    assert_eq!(slab.allocated_bytes(), 0);
}
