use std::ops::Range;

use freeheap::{AllocError, ArenaPtr, Block, DynamicAllocator, FreeList, FreeListConfig};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn backing(
  total_size: u64,
  config: &FreeListConfig,
) -> Vec<u64> {
  vec![0u64; FreeList::memory_requirement(total_size, config).div_ceil(8)]
}

fn bytes(memory: &mut [u64]) -> &mut [u8] {
  bytemuck::cast_slice_mut(memory)
}

fn assert_sorted_and_coalesced(ranges: &[Range<u64>]) {
  for pair in ranges.windows(2) {
    assert!(
      pair[0].end < pair[1].start,
      "free ranges overlap or touch: {ranges:?}"
    );
  }
}

#[test]
fn test_fill_exactly_then_fail() {
  let config = FreeListConfig::default();
  let mut memory = backing(1024, &config);
  let mut list = FreeList::create(1024, bytes(&mut memory), &config).unwrap();

  assert_eq!(list.allocate_block(128).unwrap(), 0);
  assert_eq!(list.allocate_block(896).unwrap(), 128);

  assert_eq!(
    list.allocate_block(1).unwrap_err(),
    AllocError::OutOfSpace {
      requested: 1,
      available: 0,
    }
  );
  assert_eq!(list.free_space(), 0);
}

#[test]
fn test_free_everything_coalesces_to_one_node() {
  let config = FreeListConfig::default();
  let mut memory = backing(512, &config);
  let mut list = FreeList::create(512, bytes(&mut memory), &config).unwrap();

  assert_eq!(list.allocate_block(256).unwrap(), 0);
  assert_eq!(list.allocate_block(256).unwrap(), 256);

  list.free_block(256, 0).unwrap();
  list.free_block(256, 256).unwrap();

  assert_eq!(list.free_space(), 512);
  assert_eq!(list.ranges().collect::<Vec<_>>(), vec![0..512]);
}

#[test]
fn test_first_fit_reuses_gap() {
  let config = FreeListConfig::default();
  let mut memory = backing(1000, &config);
  let mut list = FreeList::create(1000, bytes(&mut memory), &config).unwrap();

  assert_eq!(list.allocate_block(100).unwrap(), 0);
  assert_eq!(list.allocate_block(100).unwrap(), 100);
  assert_eq!(list.allocate_block(100).unwrap(), 200);

  list.free_block(100, 100).unwrap();

  assert_eq!(list.allocate_block(50).unwrap(), 100);
  assert_eq!(list.ranges().collect::<Vec<_>>(), vec![150..200, 300..1000]);
}

#[test]
fn test_node_pool_saturation_fails_cleanly() {
  let config = FreeListConfig::with_max_entries(4);
  let mut memory = backing(1024, &config);
  let mut list = FreeList::create(1024, bytes(&mut memory), &config).unwrap();

  for expected in (0..1024).step_by(64) {
    assert_eq!(list.allocate_block(64).unwrap(), expected);
  }
  assert_eq!(list.node_count(), 0);

  for offset in [0, 128, 256, 384] {
    list.free_block(64, offset).unwrap();
  }
  assert_eq!(list.node_count(), 4);

  let before: Vec<_> = list.ranges().collect();
  assert_eq!(
    list.free_block(64, 512).unwrap_err(),
    AllocError::NodePoolExhausted { max_entries: 4 }
  );
  assert_eq!(list.ranges().collect::<Vec<_>>(), before);
  assert_eq!(list.free_space(), 256);

  // A free that merges needs no new slot and releases one.
  list.free_block(64, 64).unwrap();
  assert_eq!(list.node_count(), 3);

  list.free_block(64, 512).unwrap();
  assert_eq!(
    list.ranges().collect::<Vec<_>>(),
    vec![0..192, 256..320, 384..448, 512..576]
  );
}

#[test]
fn test_allocate_free_round_trip() {
  let config = FreeListConfig::default();
  let mut memory = backing(4096, &config);
  let mut list = FreeList::create(4096, bytes(&mut memory), &config).unwrap();

  for size in [1, 7, 64, 4095, 4096] {
    let offset = list.allocate_block(size).unwrap();
    list.free_block(size, offset).unwrap();

    assert_eq!(list.ranges().collect::<Vec<_>>(), vec![0..4096]);
  }
}

#[test]
fn test_clear_restores_full_space() {
  let config = FreeListConfig::with_max_entries(16);
  let mut memory = backing(2048, &config);
  let mut list = FreeList::create(2048, bytes(&mut memory), &config).unwrap();

  let offsets: Vec<_> = (0..10).map(|_| list.allocate_block(100).unwrap()).collect();
  for offset in offsets.iter().step_by(3) {
    list.free_block(100, *offset).unwrap();
  }

  list.clear();

  assert_eq!(list.free_space(), 2048);
  assert_eq!(list.node_count(), 1);
}

#[test]
fn test_random_workload_keeps_invariants() {
  const TOTAL: u64 = 64 * 1024;

  let config = FreeListConfig::with_max_entries(256);
  let required = DynamicAllocator::memory_requirement(TOTAL, &config).unwrap();
  let mut allocator = DynamicAllocator::create(TOTAL, Block::allocate(required).unwrap(), &config).unwrap();

  let mut rng = StdRng::seed_from_u64(0x5EED);
  let mut live: Vec<(ArenaPtr, u64)> = Vec::new();

  for _ in 0..5_000 {
    let allocate = live.is_empty() || (live.len() < 200 && rng.gen_bool(0.55));

    if allocate {
      let size = rng.gen_range(1..=512);
      match allocator.allocate(size) {
        Ok(ptr) => live.push((ptr, size)),
        Err(AllocError::OutOfSpace { .. }) => {}
        Err(err) => panic!("unexpected allocation failure: {err}"),
      }
    } else {
      let (ptr, size) = live.swap_remove(rng.gen_range(0..live.len()));
      allocator.free(ptr, size).unwrap();
    }

    let ranges: Vec<_> = allocator.view().unwrap().ranges().collect();
    let live_bytes: u64 = live.iter().map(|(_, size)| size).sum();

    assert_sorted_and_coalesced(&ranges);
    assert_eq!(allocator.free_space() + live_bytes, TOTAL);
  }

  for (ptr, size) in live.drain(..) {
    allocator.free(ptr, size).unwrap();
  }
  assert_eq!(allocator.view().unwrap().ranges().collect::<Vec<_>>(), vec![0..TOTAL]);
}

#[test]
fn test_allocations_do_not_overlap() {
  let config = FreeListConfig::default();
  let required = DynamicAllocator::memory_requirement(1024, &config).unwrap();
  let mut allocator = DynamicAllocator::create(1024, Block::allocate(required).unwrap(), &config).unwrap();

  let ptrs: Vec<_> = (0..8u8)
    .map(|fill| {
      let ptr = allocator.allocate(32).unwrap();
      allocator.bytes_mut(ptr, 32).unwrap().fill(fill);
      ptr
    })
    .collect();

  for (fill, ptr) in ptrs.iter().enumerate() {
    assert!(
      allocator
        .bytes(*ptr, 32)
        .unwrap()
        .iter()
        .all(|&b| b == fill as u8)
    );
  }
}
