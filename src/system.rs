//! Tagged front end over a [`DynamicAllocator`].
//!
//! A [`MemorySystem`] is created once at startup from a single platform
//! block and passed by reference to whatever needs memory. It keeps byte
//! totals per [`MemoryTag`] so usage can be reported by category.

use std::fmt;

use tracing::{info, warn};

use crate::{
  config::MemorySystemConfig,
  dynamic::{ArenaPtr, DynamicAllocator},
  error::{AllocError, Result},
  platform::{Block, copy_memory, set_memory, zero_memory},
};

/// Category an allocation is accounted under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryTag {
  /// Temporary; re-class the allocation under a real tag.
  Unknown,
  Array,
  LinearAllocator,
  DArray,
  Dict,
  RingQueue,
  Bst,
  String,
  Application,
  Job,
  Texture,
  MaterialInstance,
  Renderer,
  Game,
  Transform,
  Entity,
  EntityNode,
  Scene,
}

impl MemoryTag {
  /// Number of tags.
  pub const COUNT: usize = Self::ALL.len();

  /// Every tag, in report order.
  pub const ALL: [MemoryTag; 18] = [
    MemoryTag::Unknown,
    MemoryTag::Array,
    MemoryTag::LinearAllocator,
    MemoryTag::DArray,
    MemoryTag::Dict,
    MemoryTag::RingQueue,
    MemoryTag::Bst,
    MemoryTag::String,
    MemoryTag::Application,
    MemoryTag::Job,
    MemoryTag::Texture,
    MemoryTag::MaterialInstance,
    MemoryTag::Renderer,
    MemoryTag::Game,
    MemoryTag::Transform,
    MemoryTag::Entity,
    MemoryTag::EntityNode,
    MemoryTag::Scene,
  ];

  /// Label used in usage reports.
  pub const fn label(self) -> &'static str {
    match self {
      MemoryTag::Unknown => "UNKNOWN",
      MemoryTag::Array => "ARRAY",
      MemoryTag::LinearAllocator => "LINEAR_ALLOCATOR",
      MemoryTag::DArray => "DARRAY",
      MemoryTag::Dict => "DICT",
      MemoryTag::RingQueue => "RING_QUEUE",
      MemoryTag::Bst => "BST",
      MemoryTag::String => "STRING",
      MemoryTag::Application => "APPLICATION",
      MemoryTag::Job => "JOB",
      MemoryTag::Texture => "TEXTURE",
      MemoryTag::MaterialInstance => "MAT_INST",
      MemoryTag::Renderer => "RENDERER",
      MemoryTag::Game => "GAME",
      MemoryTag::Transform => "TRANSFORM",
      MemoryTag::Entity => "ENTITY",
      MemoryTag::EntityNode => "ENTITY_NODE",
      MemoryTag::Scene => "SCENE",
    }
  }

  #[inline]
  const fn index(self) -> usize {
    self as usize
  }
}

/// Running allocation totals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
  total_allocated: u64,
  tagged: [u64; MemoryTag::COUNT],
}

impl MemoryStats {
  /// Bytes currently allocated across all tags.
  #[inline]
  pub fn total_allocated(&self) -> u64 {
    self.total_allocated
  }

  /// Bytes currently allocated under `tag`.
  #[inline]
  pub fn tagged(
    &self,
    tag: MemoryTag,
  ) -> u64 {
    self.tagged[tag.index()]
  }

  fn record_allocation(
    &mut self,
    size: u64,
    tag: MemoryTag,
  ) {
    self.total_allocated += size;
    self.tagged[tag.index()] += size;
  }

  fn record_free(
    &mut self,
    size: u64,
    tag: MemoryTag,
  ) {
    self.total_allocated = self.total_allocated.saturating_sub(size);
    self.tagged[tag.index()] = self.tagged[tag.index()].saturating_sub(size);
  }
}

impl fmt::Display for MemoryStats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    writeln!(f, "System memory use (tagged):")?;

    for tag in MemoryTag::ALL {
      let bytes = self.tagged(tag);
      let (amount, unit) = match bytes {
        b if b >= GIB => (b as f64 / GIB as f64, "GiB"),
        b if b >= MIB => (b as f64 / MIB as f64, "MiB"),
        b if b >= KIB => (b as f64 / KIB as f64, "KiB"),
        b => (b as f64, "B"),
      };

      writeln!(f, "  {:<19}: {amount:.2}{unit}", tag.label())?;
    }

    Ok(())
  }
}

/// The engine's memory context: one dynamic allocator plus usage accounting.
#[derive(Debug)]
pub struct MemorySystem {
  config: MemorySystemConfig,
  allocator: DynamicAllocator,
  stats: MemoryStats,
  alloc_count: u64,
}

impl MemorySystem {
  /// Obtains one platform block large enough for the configured arena and
  /// sets the allocator up inside it.
  pub fn new(config: MemorySystemConfig) -> Result<Self> {
    let required = DynamicAllocator::memory_requirement(config.total_alloc_size, &config.freelist)?;
    let block = Block::allocate(required)?;
    let allocator = DynamicAllocator::create(config.total_alloc_size, block, &config.freelist)?;

    info!(total_alloc_size = config.total_alloc_size, required, "memory system successfully allocated");

    Ok(Self {
      config,
      allocator,
      stats: MemoryStats::default(),
      alloc_count: 0,
    })
  }

  #[inline]
  pub fn config(&self) -> &MemorySystemConfig {
    &self.config
  }

  /// Allocates `size` zeroed bytes accounted under `tag`.
  pub fn allocate(
    &mut self,
    size: u64,
    tag: MemoryTag,
  ) -> Result<ArenaPtr> {
    if tag == MemoryTag::Unknown {
      warn!(size, "allocate called using MemoryTag::Unknown, re-class this allocation");
    }

    let ptr = self.allocator.allocate(size)?;

    self.stats.record_allocation(size, tag);
    self.alloc_count += 1;

    Ok(ptr)
  }

  /// Releases `size` bytes at `ptr` previously allocated under `tag`.
  pub fn free(
    &mut self,
    ptr: ArenaPtr,
    size: u64,
    tag: MemoryTag,
  ) -> Result<()> {
    if tag == MemoryTag::Unknown {
      warn!(size, "free called using MemoryTag::Unknown, re-class this allocation");
    }

    self.allocator.free(ptr, size)?;
    self.stats.record_free(size, tag);

    Ok(())
  }

  /// Zeroes `len` bytes at `ptr`.
  pub fn zero(
    &mut self,
    ptr: ArenaPtr,
    len: usize,
  ) -> Result<()> {
    zero_memory(self.region_mut(ptr, len)?);
    Ok(())
  }

  /// Fills `len` bytes at `ptr` with `value`.
  pub fn set(
    &mut self,
    ptr: ArenaPtr,
    value: u8,
    len: usize,
  ) -> Result<()> {
    set_memory(self.region_mut(ptr, len)?, value);
    Ok(())
  }

  /// Copies `source` to `ptr`.
  pub fn copy(
    &mut self,
    ptr: ArenaPtr,
    source: &[u8],
  ) -> Result<()> {
    copy_memory(self.region_mut(ptr, source.len())?, source);
    Ok(())
  }

  /// Number of successful allocations since startup.
  #[inline]
  pub fn alloc_count(&self) -> u64 {
    self.alloc_count
  }

  #[inline]
  pub fn stats(&self) -> &MemoryStats {
    &self.stats
  }

  #[inline]
  pub fn allocator(&self) -> &DynamicAllocator {
    &self.allocator
  }

  #[inline]
  pub fn allocator_mut(&mut self) -> &mut DynamicAllocator {
    &mut self.allocator
  }

  /// Per-tag usage, one line per tag.
  pub fn usage_report(&self) -> String {
    self.stats.to_string()
  }

  /// Destroys the allocator and releases its block to the platform.
  pub fn shutdown(self) {
    let block = self.allocator.destroy();
    info!(size = block.len(), allocations = self.alloc_count, "memory system shut down");
  }

  fn region_mut(
    &mut self,
    ptr: ArenaPtr,
    len: usize,
  ) -> Result<&mut [u8]> {
    let total_size = self.allocator.total_size();
    self
      .allocator
      .bytes_mut(ptr, len)
      .ok_or(AllocError::OutOfBounds {
        offset: ptr.offset(),
        total_size,
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn system(total_alloc_size: u64) -> MemorySystem {
    MemorySystem::new(MemorySystemConfig::new(total_alloc_size)).unwrap()
  }

  #[test]
  fn test_tag_table_matches_enum() {
    for (index, tag) in MemoryTag::ALL.iter().enumerate() {
      assert_eq!(tag.index(), index);
    }
    assert_eq!(MemoryTag::COUNT, 18);
  }

  #[test]
  fn test_tagged_accounting() {
    let mut memory = system(4096);

    let texture = memory.allocate(1000, MemoryTag::Texture).unwrap();
    let game = memory.allocate(24, MemoryTag::Game).unwrap();

    assert_eq!(memory.stats().tagged(MemoryTag::Texture), 1000);
    assert_eq!(memory.stats().tagged(MemoryTag::Game), 24);
    assert_eq!(memory.stats().total_allocated(), 1024);
    assert_eq!(memory.alloc_count(), 2);

    memory.free(texture, 1000, MemoryTag::Texture).unwrap();
    memory.free(game, 24, MemoryTag::Game).unwrap();

    assert_eq!(memory.stats().total_allocated(), 0);
    assert_eq!(memory.allocator().free_space(), 4096);
    assert_eq!(memory.alloc_count(), 2);
  }

  #[test]
  fn test_failed_allocation_not_counted() {
    let mut memory = system(128);

    assert!(memory.allocate(256, MemoryTag::Array).is_err());
    assert_eq!(memory.alloc_count(), 0);
    assert_eq!(memory.stats().total_allocated(), 0);
  }

  #[test]
  fn test_failed_free_keeps_stats() {
    let mut memory = system(128);

    memory.allocate(64, MemoryTag::Array).unwrap();
    let err = memory.free(ArenaPtr::from_offset(4096), 64, MemoryTag::Array).unwrap_err();

    assert!(matches!(err, AllocError::OutOfBounds { .. }));
    assert_eq!(memory.stats().tagged(MemoryTag::Array), 64);
  }

  #[test]
  fn test_bulk_helpers() {
    let mut memory = system(256);
    let ptr = memory.allocate(8, MemoryTag::String).unwrap();

    memory.copy(ptr, b"freeheap").unwrap();
    assert_eq!(memory.allocator().bytes(ptr, 8).unwrap(), b"freeheap");

    memory.set(ptr, b'x', 4).unwrap();
    assert_eq!(memory.allocator().bytes(ptr, 8).unwrap(), b"xxxxheap");

    memory.zero(ptr, 8).unwrap();
    assert_eq!(memory.allocator().bytes(ptr, 8).unwrap(), &[0u8; 8]);

    assert!(memory.zero(ptr, 1024).is_err());
  }

  #[test]
  fn test_usage_report_units() {
    let mut memory = system(4 * 1024 * 1024);

    memory.allocate(2 * 1024 * 1024, MemoryTag::Texture).unwrap();
    memory.allocate(1536, MemoryTag::Scene).unwrap();
    memory.allocate(10, MemoryTag::Job).unwrap();

    let report = memory.usage_report();

    assert!(report.starts_with("System memory use (tagged):\n"));
    assert!(report.contains("TEXTURE            : 2.00MiB"));
    assert!(report.contains("SCENE              : 1.50KiB"));
    assert!(report.contains("JOB                : 10.00B"));
    assert_eq!(report.lines().count(), MemoryTag::COUNT + 1);
  }

  #[test]
  fn test_shutdown() {
    let mut memory = system(1024);
    memory.allocate(16, MemoryTag::Application).unwrap();

    memory.shutdown();
  }
}
