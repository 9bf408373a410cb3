use freeheap::{
  Block, DynamicAllocator, FreeListConfig, MemorySystem, MemorySystemConfig, MemoryTag, Result,
};

/// Prints every free range of the allocator, in offset order.
fn print_free_ranges(
  label: &str,
  allocator: &DynamicAllocator,
) -> Result<()> {
  let view = allocator.view()?;
  println!(
    "[{}] free = {} bytes in {} node(s): {:?}",
    label,
    view.free_space(),
    view.node_count(),
    view.ranges().collect::<Vec<_>>(),
  );
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

  // --------------------------------------------------------------------
  // 0) Two-phase setup: ask for the requirement, then hand over a block.
  // --------------------------------------------------------------------
  let config = FreeListConfig::with_max_entries(8);
  let required = DynamicAllocator::memory_requirement(1024, &config)?;
  println!("[0] a 1024 byte arena needs a {required} byte block");

  let mut allocator = DynamicAllocator::create(1024, Block::allocate(required)?, &config)?;
  print_free_ranges("0", &allocator)?;

  // --------------------------------------------------------------------
  // 1) Three allocations, carved from the front of the arena.
  // --------------------------------------------------------------------
  let a = allocator.allocate(100)?;
  let b = allocator.allocate(100)?;
  let c = allocator.allocate(100)?;
  println!("\n[1] a = {a:?}, b = {b:?}, c = {c:?}");

  if let Some(bytes) = allocator.bytes_mut(b, 8) {
    bytes.copy_from_slice(&0xDEADBEEFu64.to_ne_bytes());
  }
  print_free_ranges("1", &allocator)?;

  // --------------------------------------------------------------------
  // 2) Free the middle one: a hole opens at offset 100.
  // --------------------------------------------------------------------
  allocator.free(b, 100)?;
  print_free_ranges("2", &allocator)?;

  // --------------------------------------------------------------------
  // 3) First fit: a smaller request lands in the hole.
  // --------------------------------------------------------------------
  let d = allocator.allocate(50)?;
  println!("\n[3] d = {d:?} (reused the hole, zeroed: {:?})", allocator.bytes(d, 8));
  print_free_ranges("3", &allocator)?;

  // --------------------------------------------------------------------
  // 4) Free everything: neighbours coalesce back into one range.
  // --------------------------------------------------------------------
  allocator.free(a, 100)?;
  allocator.free(d, 50)?;
  allocator.free(c, 100)?;
  print_free_ranges("4", &allocator)?;

  // --------------------------------------------------------------------
  // 5) A request larger than the arena fails without side effects.
  // --------------------------------------------------------------------
  if let Err(err) = allocator.allocate(4096) {
    println!("\n[5] allocate(4096) failed: {err}");
  }

  let block = allocator.destroy();
  println!("[5] destroyed, {} byte block returned", block.len());

  // --------------------------------------------------------------------
  // 6) The tagged front end.
  // --------------------------------------------------------------------
  let mut memory = MemorySystem::new(MemorySystemConfig::new(8 * 1024 * 1024))?;
  let texture = memory.allocate(3 * 1024 * 1024, MemoryTag::Texture)?;
  let name = memory.allocate(16, MemoryTag::String)?;
  memory.copy(name, b"freeheap demo")?;

  println!("\n[6] {} allocations", memory.alloc_count());
  print!("{}", memory.usage_report());

  memory.free(texture, 3 * 1024 * 1024, MemoryTag::Texture)?;
  memory.free(name, 16, MemoryTag::String)?;
  memory.shutdown();

  Ok(())
}
