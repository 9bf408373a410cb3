//! Error types shared by every allocator in the crate.

use thiserror::Error;

/// Errors reported by the free list and the allocators built on it.
///
/// None of these are fatal: the allocator state is left consistent and the
/// caller decides what to do next.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// An allocator was asked to manage zero bytes.
  #[error("cannot manage a zero-sized arena")]
  ZeroSize,

  /// A zero-byte allocation or free was requested.
  #[error("zero-byte requests are not allowed")]
  ZeroSizedRequest,

  /// The memory handed over at construction is smaller than required.
  #[error("provided memory too small: need {required} bytes, got {provided}")]
  BufferTooSmall {
    /// Bytes required.
    required: usize,
    /// Bytes provided.
    provided: usize,
  },

  /// The memory handed over at construction is not suitably aligned.
  #[error("provided memory is not aligned to {align} bytes")]
  Misaligned {
    /// Required alignment in bytes.
    align: usize,
  },

  /// No free range is large enough for the request.
  #[error("out of space: requested {requested} bytes, {available} bytes free")]
  OutOfSpace {
    /// Bytes requested.
    requested: u64,
    /// Total free bytes at the time of the request.
    available: u64,
  },

  /// The freed range does not fit the free list (double free or bad size).
  #[error("invalid free of {size} bytes at offset {offset}, corruption possible")]
  InvalidFree {
    /// Offset of the freed range.
    offset: u64,
    /// Size of the freed range.
    size: u64,
  },

  /// A pointer does not belong to the arena.
  #[error("offset {offset} lies outside the arena of {total_size} bytes")]
  OutOfBounds {
    /// Offending offset relative to the arena base.
    offset: u64,
    /// Arena size.
    total_size: u64,
  },

  /// Every node slot is live and the free needs a new one.
  #[error("node pool exhausted: all {max_entries} entries in use")]
  NodePoolExhausted {
    /// Capacity of the node pool.
    max_entries: u64,
  },

  /// Free lists can only grow.
  #[error("cannot shrink free list from {current} to {requested} bytes")]
  ShrinkNotSupported {
    /// Current size.
    current: u64,
    /// Requested size.
    requested: u64,
  },

  /// The arena plus its metadata does not fit the address space.
  #[error("an arena of {size} bytes does not fit the address space")]
  TooLarge {
    /// Requested arena size.
    size: u64,
  },

  /// The platform could not provide a backing block.
  #[error("platform failed to provide a block of {size} bytes")]
  PlatformAllocation {
    /// Bytes requested from the platform.
    size: usize,
  },
}

/// Result alias for allocator operations.
pub type Result<T> = std::result::Result<T, AllocError>;
