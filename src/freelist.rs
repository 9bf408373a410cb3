//! Free-range tracking for a fixed-size arena.
//!
//! ```text
//!   Free list memory (one caller-supplied block):
//!
//!   ┌──────────────────┬────────┬────────┬────────┬─────┬────────────────┐
//!   │ Header           │ slot 0 │ slot 1 │ slot 2 │ ... │ slot max-1     │
//!   │ total_size       │ (head) │        │        │     │                │
//!   │ max_entries      │        │        │        │     │                │
//!   │ head             │        │        │        │     │                │
//!   └──────────────────┴────────┴────────┴────────┴─────┴────────────────┘
//!
//!   Live nodes form a chain sorted by offset, starting at slot 0:
//!
//!   slot 0 [0, 64) ──► slot 3 [128, 256) ──► slot 1 [512, 1024) ──► none
//! ```
//!
//! Unused slots carry `offset == size == u64::MAX` and are found by a linear
//! scan when a free needs a new node.

use std::{fmt, iter, mem, ops::Range};

use bytemuck::{Pod, Zeroable};
use tracing::{debug, error, warn};

use crate::{
  config::FreeListConfig,
  error::{AllocError, Result},
  platform::zero_memory,
};

const INVALID: u64 = u64::MAX;
const HEAD_SLOT: u64 = 0;

const HEADER_SIZE: usize = mem::size_of::<Header>();
const NODE_SIZE: usize = mem::size_of::<FreeNode>();

/// Alignment the memory handed to a [`FreeList`] must have.
pub const FREELIST_ALIGN: usize = mem::align_of::<Header>();

/// One free range inside the arena, stored in a node-pool slot.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct FreeNode {
  offset: u64,
  size: u64,
  next: u64,
}

impl FreeNode {
  const UNUSED: Self = Self {
    offset: INVALID,
    size: INVALID,
    next: INVALID,
  };

  const fn new(
    offset: u64,
    size: u64,
  ) -> Self {
    Self {
      offset,
      size,
      next: INVALID,
    }
  }

  #[inline]
  fn is_unused(&self) -> bool {
    self.offset == INVALID
  }

  #[inline]
  fn end(&self) -> u64 {
    self.offset + self.size
  }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct Header {
  total_size: u64,
  max_entries: u64,
  head: u64,
}

/// Address-ordered list of the free ranges of an arena.
///
/// The list does not own its memory: it is a view over a block that holds
/// the header followed by the node pool. Create it with the two-phase
/// protocol:
///
/// ```rust
/// use freeheap::{FreeList, FreeListConfig};
///
/// let config = FreeListConfig::default();
/// let required = FreeList::memory_requirement(4096, &config);
///
/// let mut backing = vec![0u64; required.div_ceil(8)];
/// let memory: &mut [u8] = bytemuck::cast_slice_mut(backing.as_mut_slice());
///
/// let mut list = FreeList::create(4096, memory, &config).unwrap();
/// let offset = list.allocate_block(128).unwrap();
/// list.free_block(128, offset).unwrap();
/// assert_eq!(list.free_space(), 4096);
/// ```
///
/// Not thread-safe; every mutation takes `&mut self`.
pub struct FreeList<'a> {
  header: &'a mut Header,
  nodes: &'a mut [FreeNode],
}

impl<'a> FreeList<'a> {
  /// Bytes of memory a list tracking `total_size` bytes needs.
  pub fn memory_requirement(
    total_size: u64,
    config: &FreeListConfig,
  ) -> usize {
    required_bytes(config.max_entries_for(total_size))
  }

  /// Bytes of memory [`resize`](Self::resize) needs for `new_total_size`.
  #[inline]
  pub fn resize_requirement(
    new_total_size: u64,
    config: &FreeListConfig,
  ) -> usize {
    Self::memory_requirement(new_total_size, config)
  }

  /// Initializes a list over `memory`, with the whole arena free.
  ///
  /// `memory` must be at least [`memory_requirement`](Self::memory_requirement)
  /// bytes long and aligned to [`FREELIST_ALIGN`]. Extra bytes are left alone.
  pub fn create(
    total_size: u64,
    memory: &'a mut [u8],
    config: &FreeListConfig,
  ) -> Result<Self> {
    if total_size == 0 {
      error!("free list cannot track a zero-sized arena, create failed");
      return Err(AllocError::ZeroSize);
    }

    let max_entries = config.max_entries_for(total_size);
    let required = required_bytes(max_entries);

    if memory.len() < required {
      error!(required, provided = memory.len(), "free list memory too small, create failed");
      return Err(AllocError::BufferTooSmall {
        required,
        provided: memory.len(),
      });
    }

    let min_useful = ((HEADER_SIZE + NODE_SIZE) * 8) as u64;
    if total_size < min_useful {
      warn!(total_size, min_useful, "free lists are inefficient at this size");
    }

    let (header, nodes) = carve(memory, max_entries)?;
    *header = Header {
      total_size,
      max_entries,
      head: HEAD_SLOT,
    };

    let mut list = Self { header, nodes };
    list.clear();

    debug!(total_size, max_entries, "free list created");
    Ok(list)
  }

  /// Re-opens a list previously initialized in `memory` by [`create`](Self::create).
  pub fn attach(memory: &'a mut [u8]) -> Result<Self> {
    let stored = stored_header(memory)?;
    let (header, nodes) = carve(memory, stored.max_entries)?;
    Ok(Self { header, nodes })
  }

  /// Read-only view of the list.
  #[inline]
  pub fn view(&self) -> FreeListView<'_> {
    FreeListView {
      header: &*self.header,
      nodes: &*self.nodes,
    }
  }

  /// Arena size tracked by this list.
  #[inline]
  pub fn total_size(&self) -> u64 {
    self.header.total_size
  }

  /// Capacity of the node pool.
  #[inline]
  pub fn max_entries(&self) -> u64 {
    self.header.max_entries
  }

  /// Free ranges in ascending offset order.
  pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
    self.view().ranges()
  }

  /// Number of live nodes in the chain.
  pub fn node_count(&self) -> usize {
    self.view().node_count()
  }

  /// Total free bytes. See [`FreeListView::free_space`].
  pub fn free_space(&self) -> u64 {
    self.view().free_space()
  }

  /// Takes `size` bytes from the first free range large enough, returning
  /// the offset of the allocated range.
  pub fn allocate_block(
    &mut self,
    size: u64,
  ) -> Result<u64> {
    if size == 0 {
      warn!("free list asked for a zero-byte block");
      return Err(AllocError::ZeroSizedRequest);
    }

    let mut prev = None;
    let mut cursor = self.head();

    while let Some(index) = cursor {
      let node = *self.slot(index);

      if node.size == size {
        match prev {
          Some(prev) => {
            self.slot_mut(prev).next = node.next;
            self.return_node(index);
          }
          None => self.pop_head(),
        }
        return Ok(node.offset);
      }

      if node.size > size {
        let slot = self.slot_mut(index);
        slot.offset += size;
        slot.size -= size;
        return Ok(node.offset);
      }

      prev = cursor;
      cursor = self.next_of(index);
    }

    let available = self.free_space();
    warn!(requested = size, available, "no free block with enough space found");
    Err(AllocError::OutOfSpace {
      requested: size,
      available,
    })
  }

  /// Best-fit allocation.
  ///
  /// Not implemented yet: forwards to [`allocate_block`](Self::allocate_block).
  pub fn allocate_block_best(
    &mut self,
    size: u64,
  ) -> Result<u64> {
    warn!("best fit allocation not implemented, falling back to first fit");
    self.allocate_block(size)
  }

  /// Returns `[offset, offset + size)` to the list, coalescing with
  /// neighbouring free ranges.
  ///
  /// A range starting exactly where a free node starts grows that node by
  /// `size`. A range that overlaps other free ranges or the arena bounds is
  /// rejected as [`AllocError::InvalidFree`]. When no neighbour can absorb
  /// the range and every slot is live the free fails with
  /// [`AllocError::NodePoolExhausted`] and nothing changes.
  pub fn free_block(
    &mut self,
    size: u64,
    offset: u64,
  ) -> Result<()> {
    if size == 0 {
      warn!(offset, "free list asked to free a zero-byte block");
      return Err(AllocError::ZeroSizedRequest);
    }

    match offset.checked_add(size) {
      Some(end) if end <= self.header.total_size => {}
      _ => return Err(self.invalid_free(offset, size)),
    }

    let Some(head) = self.head() else {
      // Arena was fully allocated; this range becomes the whole list.
      *self.slot_mut(HEAD_SLOT) = FreeNode::new(offset, size);
      self.header.head = HEAD_SLOT;
      debug!(offset, size, "free list head re-established");
      return Ok(());
    };

    let mut prev = None;
    let mut cursor = Some(head);

    while let Some(index) = cursor {
      let node = *self.slot(index);

      if node.offset == offset {
        return self.extend_node(index, size);
      }

      if node.offset > offset {
        break;
      }

      prev = cursor;
      cursor = self.next_of(index);
    }

    self.insert_range(prev, cursor, offset, size)
  }

  /// Resets the list to a single node covering the whole arena.
  pub fn clear(&mut self) {
    for node in self.nodes.iter_mut().skip(1) {
      *node = FreeNode::UNUSED;
    }

    self.nodes[HEAD_SLOT as usize] = FreeNode::new(0, self.header.total_size);
    self.header.head = HEAD_SLOT;
  }

  /// Grows the list to track `new_total_size` bytes, moving it into
  /// `new_memory`.
  ///
  /// The free ranges are copied over and the added tail `[old, new)` is
  /// freed, merging into the last range when it touches the old end. The
  /// old memory is released to the caller untouched.
  pub fn resize<'b>(
    self,
    new_total_size: u64,
    new_memory: &'b mut [u8],
    config: &FreeListConfig,
  ) -> Result<FreeList<'b>> {
    let current = self.header.total_size;

    if new_total_size < current {
      warn!(current, requested = new_total_size, "free lists cannot shrink, resize failed");
      return Err(AllocError::ShrinkNotSupported {
        current,
        requested: new_total_size,
      });
    }

    let max_entries = config.max_entries_for(new_total_size);
    let tail_merges = self.ranges().last().is_some_and(|last| last.end == current);
    let needed = self.node_count() as u64 + u64::from(new_total_size > current && !tail_merges);

    if needed > max_entries {
      warn!(needed, max_entries, "resized node pool cannot hold the current free ranges");
      return Err(AllocError::NodePoolExhausted { max_entries });
    }

    let required = required_bytes(max_entries);
    if new_memory.len() < required {
      error!(required, provided = new_memory.len(), "free list memory too small, resize failed");
      return Err(AllocError::BufferTooSmall {
        required,
        provided: new_memory.len(),
      });
    }

    let (header, nodes) = carve(new_memory, max_entries)?;
    nodes.fill(FreeNode::UNUSED);

    let mut copied = 0usize;
    for (index, range) in self.ranges().enumerate() {
      nodes[index] = FreeNode::new(range.start, range.end - range.start);
      if index > 0 {
        nodes[index - 1].next = index as u64;
      }
      copied = index + 1;
    }

    *header = Header {
      total_size: new_total_size,
      max_entries,
      head: if copied > 0 { HEAD_SLOT } else { INVALID },
    };

    let mut list = FreeList { header, nodes };
    if new_total_size > current {
      list.free_block(new_total_size - current, current)?;
    }

    debug!(from = current, to = new_total_size, max_entries, "free list resized");
    Ok(list)
  }

  /// Zeroes the header and the node pool.
  pub fn destroy(self) {
    zero_memory(bytemuck::bytes_of_mut(self.header));
    zero_memory(bytemuck::cast_slice_mut(self.nodes));
  }

  #[inline]
  fn slot(
    &self,
    index: u64,
  ) -> &FreeNode {
    self.view().slot(index)
  }

  #[inline]
  fn slot_mut(
    &mut self,
    index: u64,
  ) -> &mut FreeNode {
    &mut self.nodes[index as usize]
  }

  #[inline]
  fn head(&self) -> Option<u64> {
    self.view().head()
  }

  #[inline]
  fn next_of(
    &self,
    index: u64,
  ) -> Option<u64> {
    self.view().next_of(index)
  }

  /// Finds an unused slot. Slot 0 is reserved for the head.
  fn get_node(&self) -> Option<u64> {
    (1..self.header.max_entries).find(|&index| self.slot(index).is_unused())
  }

  fn return_node(
    &mut self,
    index: u64,
  ) {
    *self.slot_mut(index) = FreeNode::UNUSED;
  }

  /// Removes the head, moving its successor into slot 0.
  fn pop_head(&mut self) {
    match self.next_of(HEAD_SLOT) {
      Some(next) => {
        *self.slot_mut(HEAD_SLOT) = *self.slot(next);
        self.return_node(next);
      }
      None => {
        self.return_node(HEAD_SLOT);
        self.header.head = INVALID;
      }
    }
  }

  /// Makes `[offset, offset + size)` the new head, moving the old head out
  /// of slot 0.
  fn push_head(
    &mut self,
    offset: u64,
    size: u64,
  ) -> Result<()> {
    if self.head().is_none() {
      *self.slot_mut(HEAD_SLOT) = FreeNode::new(offset, size);
      self.header.head = HEAD_SLOT;
      return Ok(());
    }

    let spare = self.get_node().ok_or_else(|| self.pool_exhausted(offset, size))?;

    *self.slot_mut(spare) = *self.slot(HEAD_SLOT);
    *self.slot_mut(HEAD_SLOT) = FreeNode {
      offset,
      size,
      next: spare,
    };
    Ok(())
  }

  fn extend_node(
    &mut self,
    index: u64,
    size: u64,
  ) -> Result<()> {
    let node = *self.slot(index);
    let next = self.next_of(index);
    let limit = next.map_or(self.header.total_size, |next| self.slot(next).offset);

    let end = match node.end().checked_add(size) {
      Some(end) if end <= limit => end,
      _ => return Err(self.invalid_free(node.offset, size)),
    };

    self.slot_mut(index).size += size;

    if let Some(next) = next {
      let following = *self.slot(next);
      if following.offset == end {
        let node = self.slot_mut(index);
        node.size += following.size;
        node.next = following.next;
        self.return_node(next);
      }
    }

    Ok(())
  }

  /// Inserts a range between `prev` and `next` (either may be absent),
  /// merging with whichever neighbours it touches.
  fn insert_range(
    &mut self,
    prev: Option<u64>,
    next: Option<u64>,
    offset: u64,
    size: u64,
  ) -> Result<()> {
    let end = offset + size;
    let before = prev.map(|index| *self.slot(index));
    let after = next.map(|index| *self.slot(index));

    if before.is_some_and(|node| node.end() > offset) || after.is_some_and(|node| end > node.offset) {
      return Err(self.invalid_free(offset, size));
    }

    let touches_prev = before.is_some_and(|node| node.end() == offset);
    let touches_next = after.is_some_and(|node| node.offset == end);

    match (prev, next) {
      (Some(prev), Some(next)) if touches_prev && touches_next => {
        let following = *self.slot(next);
        let node = self.slot_mut(prev);
        node.size += size + following.size;
        node.next = following.next;
        self.return_node(next);
      }
      (Some(prev), _) if touches_prev => {
        self.slot_mut(prev).size += size;
      }
      (_, Some(next)) if touches_next => {
        let node = self.slot_mut(next);
        node.offset = offset;
        node.size += size;
      }
      (None, _) => self.push_head(offset, size)?,
      (Some(prev), next) => {
        let spare = self.get_node().ok_or_else(|| self.pool_exhausted(offset, size))?;
        *self.slot_mut(spare) = FreeNode {
          offset,
          size,
          next: next.unwrap_or(INVALID),
        };
        self.slot_mut(prev).next = spare;
      }
    }

    Ok(())
  }

  fn invalid_free(
    &self,
    offset: u64,
    size: u64,
  ) -> AllocError {
    warn!(
      offset,
      size,
      total_size = self.header.total_size,
      "unable to find block to be freed, corruption possible"
    );
    AllocError::InvalidFree { offset, size }
  }

  fn pool_exhausted(
    &self,
    offset: u64,
    size: u64,
  ) -> AllocError {
    warn!(
      offset,
      size,
      max_entries = self.header.max_entries,
      "free list node pool exhausted"
    );
    AllocError::NodePoolExhausted {
      max_entries: self.header.max_entries,
    }
  }
}

impl fmt::Debug for FreeList<'_> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    fmt::Debug::fmt(&self.view(), f)
  }
}

/// Shared, read-only view of a free list.
///
/// Lets owners that only hold `&` access to the list memory run the
/// diagnostics without re-opening it mutably.
#[derive(Clone, Copy)]
pub struct FreeListView<'a> {
  header: &'a Header,
  nodes: &'a [FreeNode],
}

impl<'a> FreeListView<'a> {
  /// Reads a list previously initialized in `memory`.
  pub fn inspect(memory: &'a [u8]) -> Result<Self> {
    let stored = stored_header(memory)?;
    let required = required_bytes(stored.max_entries);

    if memory.len() < required {
      return Err(AllocError::BufferTooSmall {
        required,
        provided: memory.len(),
      });
    }

    let misaligned = |_| AllocError::Misaligned {
      align: FREELIST_ALIGN,
    };

    let (header, pool) = memory[..required].split_at(HEADER_SIZE);
    let header = bytemuck::try_from_bytes::<Header>(header).map_err(misaligned)?;
    let nodes = bytemuck::try_cast_slice::<u8, FreeNode>(pool).map_err(misaligned)?;

    Ok(Self { header, nodes })
  }

  #[inline]
  pub fn total_size(self) -> u64 {
    self.header.total_size
  }

  #[inline]
  pub fn max_entries(self) -> u64 {
    self.header.max_entries
  }

  /// Free ranges in ascending offset order.
  pub fn ranges(self) -> impl Iterator<Item = Range<u64>> + 'a {
    iter::successors(self.head(), move |&index| self.next_of(index)).map(move |index| {
      let node = self.slot(index);
      node.offset..node.end()
    })
  }

  pub fn node_count(self) -> usize {
    self.ranges().count()
  }

  /// Total free bytes.
  ///
  /// Walks the whole chain; meant for diagnostics, not for hot paths.
  pub fn free_space(self) -> u64 {
    self.ranges().map(|range| range.end - range.start).sum()
  }

  #[inline]
  fn slot(
    self,
    index: u64,
  ) -> &'a FreeNode {
    &self.nodes[index as usize]
  }

  #[inline]
  fn head(self) -> Option<u64> {
    (self.header.head != INVALID).then_some(self.header.head)
  }

  #[inline]
  fn next_of(
    self,
    index: u64,
  ) -> Option<u64> {
    let next = self.slot(index).next;
    (next != INVALID).then_some(next)
  }
}

impl fmt::Debug for FreeListView<'_> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("FreeList")
      .field("total_size", &self.header.total_size)
      .field("max_entries", &self.header.max_entries)
      .field("ranges", &self.ranges().collect::<Vec<_>>())
      .finish()
  }
}

/// Copies the header out of `memory`, rejecting destroyed or foreign memory.
fn stored_header(memory: &[u8]) -> Result<Header> {
  if memory.len() < HEADER_SIZE {
    return Err(AllocError::BufferTooSmall {
      required: HEADER_SIZE,
      provided: memory.len(),
    });
  }

  let header = *bytemuck::try_from_bytes::<Header>(&memory[..HEADER_SIZE]).map_err(|_| {
    AllocError::Misaligned {
      align: FREELIST_ALIGN,
    }
  })?;

  if header.total_size == 0 || header.max_entries == 0 {
    return Err(AllocError::ZeroSize);
  }

  Ok(header)
}

fn required_bytes(max_entries: u64) -> usize {
  usize::try_from(max_entries)
    .unwrap_or(usize::MAX)
    .saturating_mul(NODE_SIZE)
    .saturating_add(HEADER_SIZE)
}

/// Splits `memory` into the header and a pool of `max_entries` nodes.
fn carve(
  memory: &mut [u8],
  max_entries: u64,
) -> Result<(&mut Header, &mut [FreeNode])> {
  let required = required_bytes(max_entries);

  if memory.len() < required {
    return Err(AllocError::BufferTooSmall {
      required,
      provided: memory.len(),
    });
  }

  let misaligned = |_| AllocError::Misaligned {
    align: FREELIST_ALIGN,
  };

  let (header, pool) = memory[..required].split_at_mut(HEADER_SIZE);
  let header = bytemuck::try_from_bytes_mut::<Header>(header).map_err(misaligned)?;
  let nodes = bytemuck::try_cast_slice_mut::<u8, FreeNode>(pool).map_err(misaligned)?;

  Ok((header, nodes))
}
