//! General purpose allocator over one fixed arena.
//!
//! ```text
//!   One platform block, carved once at creation:
//!
//!   ┌──────────────┬──────────────────────────┬──────────────────────────────┐
//!   │ Header       │ Free list metadata       │ Arena (total_size bytes)     │
//!   │ total_size   │ header + node pool       │                              │
//!   │ freelist_sz  │                          │  ┌────┬──────┬────┬───────┐  │
//!   └──────────────┴──────────────────────────┘  │ A1 │ free │ A2 │ free  │  │
//!                                                └────┴──────┴────┴───────┘  │
//!                                                ▲                           │
//!                                                └── arena base + offset ────┘
//! ```
//!
//! The allocator keeps no record of allocation sizes: callers pass the size
//! they requested back to [`DynamicAllocator::free`].

use std::{fmt, mem, ops::Range};

use bytemuck::{Pod, Zeroable};
use tracing::{debug, error, warn};

use crate::{
  align::checked_align_up,
  config::FreeListConfig,
  error::{AllocError, Result},
  freelist::{FREELIST_ALIGN, FreeList, FreeListView},
  platform::{Block, zero_memory},
};

const HEADER_SIZE: usize = mem::size_of::<AllocatorHeader>();

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct AllocatorHeader {
  total_size: u64,
  freelist_size: u64,
}

/// Location of an allocation, as a byte offset from the arena base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaPtr(u64);

impl ArenaPtr {
  /// Pointer to `offset` bytes past the arena base.
  #[inline]
  pub const fn from_offset(offset: u64) -> Self {
    Self(offset)
  }

  /// Byte offset from the arena base.
  #[inline]
  pub const fn offset(self) -> u64 {
    self.0
  }
}

/// A first-fit heap backed by a [`FreeList`], living entirely inside one
/// caller-supplied [`Block`].
///
/// # Example
///
/// ```rust
/// use freeheap::{Block, DynamicAllocator, FreeListConfig};
///
/// let config = FreeListConfig::default();
/// let required = DynamicAllocator::memory_requirement(64 * 1024, &config).unwrap();
///
/// let block = Block::allocate(required).unwrap();
/// let mut allocator = DynamicAllocator::create(64 * 1024, block, &config).unwrap();
///
/// let ptr = allocator.allocate(256).unwrap();
/// allocator.bytes_mut(ptr, 256).unwrap().fill(0xAA);
/// allocator.free(ptr, 256).unwrap();
///
/// assert_eq!(allocator.free_space(), 64 * 1024);
/// ```
pub struct DynamicAllocator {
  block: Block,
}

impl DynamicAllocator {
  /// Bytes of memory an allocator managing `total_size` bytes needs: its
  /// header, the free list metadata and the arena itself.
  pub fn memory_requirement(
    total_size: u64,
    config: &FreeListConfig,
  ) -> Result<usize> {
    regions(total_size, config).map(|(_, arena)| arena.end)
  }

  /// Sets up an allocator in `block`, which must be at least
  /// [`memory_requirement`](Self::memory_requirement) bytes long.
  pub fn create(
    total_size: u64,
    mut block: Block,
    config: &FreeListConfig,
  ) -> Result<Self> {
    let (freelist, arena) = regions(total_size, config)?;

    if block.len() < arena.end {
      error!(
        required = arena.end,
        provided = block.len(),
        "dynamic allocator block too small, create failed"
      );
      return Err(AllocError::BufferTooSmall {
        required: arena.end,
        provided: block.len(),
      });
    }

    let header = bytemuck::try_from_bytes_mut::<AllocatorHeader>(&mut block[..HEADER_SIZE])
      .map_err(|_| AllocError::Misaligned { align: FREELIST_ALIGN })?;
    *header = AllocatorHeader {
      total_size,
      freelist_size: freelist.len() as u64,
    };

    FreeList::create(total_size, &mut block[freelist], config)?;
    zero_memory(&mut block[arena.clone()]);

    debug!(total_size, required = arena.end, "dynamic allocator created");
    Ok(Self { block })
  }

  /// Size of the arena in bytes.
  #[inline]
  pub fn total_size(&self) -> u64 {
    self.header().total_size
  }

  /// Hands out `size` zeroed bytes from the first free range large enough.
  pub fn allocate(
    &mut self,
    size: u64,
  ) -> Result<ArenaPtr> {
    if size == 0 {
      warn!("dynamic allocator asked for zero bytes");
      return Err(AllocError::ZeroSizedRequest);
    }

    let (mut list, arena) = self.parts()?;

    let offset = match list.allocate_block(size) {
      Ok(offset) => offset,
      Err(err) => {
        error!(
          requested = size,
          available = list.free_space(),
          "dynamic allocator has no block of memory large enough"
        );
        return Err(err);
      }
    };

    let start = offset as usize;
    zero_memory(&mut arena[start..start + size as usize]);

    Ok(ArenaPtr(offset))
  }

  /// Returns `size` bytes at `ptr` to the allocator.
  ///
  /// `size` must be the size originally requested for `ptr`; a different
  /// size is not detected when it still fits between the neighbouring free
  /// ranges.
  pub fn free(
    &mut self,
    ptr: ArenaPtr,
    size: u64,
  ) -> Result<()> {
    let total_size = self.total_size();

    if ptr.0 >= total_size {
      error!(offset = ptr.0, total_size, "trying to release a block outside the allocator range");
      return Err(AllocError::OutOfBounds {
        offset: ptr.0,
        total_size,
      });
    }

    if size == 0 {
      error!(offset = ptr.0, "dynamic allocator free requires a nonzero size");
      return Err(AllocError::ZeroSizedRequest);
    }

    let (mut list, _) = self.parts()?;
    list.free_block(size, ptr.0).inspect_err(|err| {
      error!(offset = ptr.0, size, %err, "dynamic allocator free failed");
    })
  }

  /// Same as [`free`](Self::free), for a raw address inside the arena.
  pub fn free_raw(
    &mut self,
    address: *const u8,
    size: u64,
  ) -> Result<()> {
    let offset = (address as usize).wrapping_sub(self.arena_base() as usize);
    self.free(ArenaPtr(offset as u64), size)
  }

  /// Total free bytes in the arena. Walks the free list.
  pub fn free_space(&self) -> u64 {
    match self.view() {
      Ok(list) => list.free_space(),
      Err(err) => {
        error!(%err, "dynamic allocator metadata unreadable");
        0
      }
    }
  }

  /// Read-only view of the underlying free list.
  pub fn view(&self) -> Result<FreeListView<'_>> {
    let start = HEADER_SIZE;
    let end = start + self.header().freelist_size as usize;
    FreeListView::inspect(&self.block[start..end])
  }

  /// Address of the first arena byte.
  #[inline]
  pub fn arena_base(&self) -> *const u8 {
    self.block[self.arena_range()].as_ptr()
  }

  /// Address of `ptr`.
  #[inline]
  pub fn address(
    &self,
    ptr: ArenaPtr,
  ) -> *const u8 {
    self.arena_base().wrapping_add(ptr.0 as usize)
  }

  /// Mutable address of `ptr`.
  #[inline]
  pub fn address_mut(
    &mut self,
    ptr: ArenaPtr,
  ) -> *mut u8 {
    let range = self.arena_range();
    self.block[range].as_mut_ptr().wrapping_add(ptr.0 as usize)
  }

  /// The `len` bytes at `ptr`, or `None` when they leave the arena.
  pub fn bytes(
    &self,
    ptr: ArenaPtr,
    len: usize,
  ) -> Option<&[u8]> {
    let range = self.arena_range();
    let (start, end) = span(ptr, len)?;
    self.block[range].get(start..end)
  }

  /// Mutable counterpart of [`bytes`](Self::bytes).
  pub fn bytes_mut(
    &mut self,
    ptr: ArenaPtr,
    len: usize,
  ) -> Option<&mut [u8]> {
    let range = self.arena_range();
    let (start, end) = span(ptr, len)?;
    self.block[range].get_mut(start..end)
  }

  /// Tears the allocator down, zeroing its metadata and arena, and hands the
  /// block back.
  pub fn destroy(mut self) -> Block {
    match self.parts() {
      Ok((list, arena)) => {
        list.destroy();
        zero_memory(arena);
      }
      Err(err) => warn!(%err, "dynamic allocator metadata unreadable on destroy"),
    }

    zero_memory(&mut self.block[..HEADER_SIZE]);
    debug!("dynamic allocator destroyed");
    self.block
  }

  fn header(&self) -> AllocatorHeader {
    bytemuck::pod_read_unaligned(&self.block[..HEADER_SIZE])
  }

  fn arena_range(&self) -> Range<usize> {
    let header = self.header();
    let start = HEADER_SIZE + header.freelist_size as usize;
    start..start + header.total_size as usize
  }

  /// Splits the block into the free list and the arena.
  fn parts(&mut self) -> Result<(FreeList<'_>, &mut [u8])> {
    let freelist_size = self.header().freelist_size as usize;
    let end = self.arena_range().end;

    let (metadata, arena) = self.block[HEADER_SIZE..end].split_at_mut(freelist_size);
    Ok((FreeList::attach(metadata)?, arena))
  }
}

impl fmt::Debug for DynamicAllocator {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("DynamicAllocator")
      .field("total_size", &self.total_size())
      .field("free_space", &self.free_space())
      .field("block", &self.block)
      .finish()
  }
}

/// Byte ranges of the free list metadata and the arena inside the block.
fn regions(
  total_size: u64,
  config: &FreeListConfig,
) -> Result<(Range<usize>, Range<usize>)> {
  if total_size == 0 {
    error!("dynamic allocator cannot have a total_size of 0, create failed");
    return Err(AllocError::ZeroSize);
  }

  let too_large = || {
    error!(total_size, "dynamic allocator arena does not fit the address space");
    AllocError::TooLarge { size: total_size }
  };

  let arena_len = usize::try_from(total_size).map_err(|_| too_large())?;
  let freelist_len = checked_align_up(FreeList::memory_requirement(total_size, config), FREELIST_ALIGN)
    .ok_or_else(too_large)?;

  let arena_start = HEADER_SIZE.checked_add(freelist_len).ok_or_else(too_large)?;
  let arena_end = arena_start.checked_add(arena_len).ok_or_else(too_large)?;

  Ok((HEADER_SIZE..arena_start, arena_start..arena_end))
}

fn span(
  ptr: ArenaPtr,
  len: usize,
) -> Option<(usize, usize)> {
  let start = usize::try_from(ptr.0).ok()?;
  Some((start, start.checked_add(len)?))
}
