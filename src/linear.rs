use tracing::{debug, error, warn};

use crate::{
  align,
  dynamic::ArenaPtr,
  error::{AllocError, Result},
  platform::{Block, zero_memory},
};

/// A bump allocator over one platform block.
///
/// Each allocation moves the cursor forward to the next word boundary past
/// the previous one. Individual allocations cannot be freed; everything is
/// released at once with [`free_all`](Self::free_all).
///
/// ```text
///   ┌─────┬─────┬─────┬──────────────────────────────┐
///   │ A1  │ A2  │ A3  │          Free Space          │
///   └─────┴─────┴─────┴──────────────────────────────┘
///                     ▲                              ▲
///                  allocated                    total_size
/// ```
#[derive(Debug)]
pub struct LinearAllocator {
  block: Block,
  allocated: usize,
}

impl LinearAllocator {
  /// Creates an allocator owning a fresh platform block of `total_size` bytes.
  pub fn new(total_size: usize) -> Result<Self> {
    Ok(Self::from_block(Block::allocate(total_size)?))
  }

  /// Creates an allocator over an existing block, zeroing it.
  pub fn from_block(mut block: Block) -> Self {
    zero_memory(&mut block);
    debug!(total_size = block.len(), "linear allocator created");

    Self { block, allocated: 0 }
  }

  #[inline]
  pub fn total_size(&self) -> usize {
    self.block.len()
  }

  /// Bytes consumed so far, alignment padding included.
  #[inline]
  pub fn allocated(&self) -> usize {
    self.allocated
  }

  #[inline]
  pub fn remaining(&self) -> usize {
    self.total_size() - self.allocated
  }

  /// Hands out `size` bytes at the next word-aligned offset.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<ArenaPtr> {
    if size == 0 {
      warn!("linear allocator asked for zero bytes");
      return Err(AllocError::ZeroSizedRequest);
    }

    let start = align!(self.allocated);

    match start.checked_add(size) {
      Some(end) if end <= self.total_size() => {
        self.allocated = end;
        Ok(ArenaPtr::from_offset(start as u64))
      }
      _ => {
        let remaining = self.remaining();
        error!(requested = size, remaining, "linear allocator out of space");
        Err(AllocError::OutOfSpace {
          requested: size as u64,
          available: remaining as u64,
        })
      }
    }
  }

  /// Releases every allocation and zeroes the block.
  pub fn free_all(&mut self) {
    self.allocated = 0;
    zero_memory(&mut self.block);
  }

  /// The `len` bytes at `ptr`, or `None` when they leave the block.
  pub fn bytes(
    &self,
    ptr: ArenaPtr,
    len: usize,
  ) -> Option<&[u8]> {
    let start = usize::try_from(ptr.offset()).ok()?;
    self.block.get(start..start.checked_add(len)?)
  }

  /// Mutable counterpart of [`bytes`](Self::bytes).
  pub fn bytes_mut(
    &mut self,
    ptr: ArenaPtr,
    len: usize,
  ) -> Option<&mut [u8]> {
    let start = usize::try_from(ptr.offset()).ok()?;
    self.block.get_mut(start..start.checked_add(len)?)
  }

  /// Gives the backing block back.
  pub fn into_block(self) -> Block {
    self.block
  }
}

#[cfg(test)]
mod tests {
  use std::mem;

  use super::*;

  #[test]
  fn test_alloc() {
    let mut allocator = LinearAllocator::new(256).unwrap();

    let first = allocator.allocate(mem::size_of::<u64>()).unwrap();
    allocator.bytes_mut(first, 8).unwrap().copy_from_slice(&3u64.to_ne_bytes());

    let second = allocator.allocate(6 * mem::size_of::<u16>()).unwrap();
    for (i, chunk) in allocator.bytes_mut(second, 12).unwrap().chunks_mut(2).enumerate() {
      chunk.copy_from_slice(&((i + 1) as u16).to_ne_bytes());
    }

    assert_eq!(allocator.bytes(first, 8).unwrap(), &3u64.to_ne_bytes());
    assert_eq!(allocator.bytes(second, 2).unwrap(), &1u16.to_ne_bytes());

    let third = allocator.allocate(mem::size_of::<u32>()).unwrap();
    assert!(third > second);
  }

  #[test]
  fn test_allocations_are_word_aligned() {
    let mut allocator = LinearAllocator::new(128).unwrap();

    allocator.allocate(3).unwrap();
    let next = allocator.allocate(1).unwrap();

    assert_eq!(next.offset() as usize % mem::size_of::<usize>(), 0);
    assert_eq!(next.offset() as usize, mem::size_of::<usize>());
  }

  #[test]
  fn test_out_of_space() {
    let mut allocator = LinearAllocator::new(64).unwrap();

    allocator.allocate(60).unwrap();

    assert_eq!(
      allocator.allocate(8).unwrap_err(),
      AllocError::OutOfSpace {
        requested: 8,
        available: 4,
      }
    );
    assert_eq!(allocator.allocated(), 60);
  }

  #[test]
  fn test_free_all() {
    let mut allocator = LinearAllocator::new(64).unwrap();

    let ptr = allocator.allocate(32).unwrap();
    allocator.bytes_mut(ptr, 32).unwrap().fill(0xCD);

    allocator.free_all();

    assert_eq!(allocator.allocated(), 0);
    assert_eq!(allocator.remaining(), 64);
    assert!(allocator.bytes(ptr, 32).unwrap().iter().all(|&b| b == 0));
    assert_eq!(allocator.allocate(64).unwrap().offset(), 0);
  }
}
