//! Platform memory provider.
//!
//! Every byte the allocators manage comes from a [`Block`] obtained here in
//! one upfront request. The bulk primitives operate on slices so the length
//! is always the one the borrow checker already validated.

use std::{
  fmt,
  ops::{Deref, DerefMut},
  ptr::NonNull,
  slice,
};

use libc::{c_int, c_void};
use tracing::{debug, error};

use crate::error::{AllocError, Result};

/// A zeroed block of memory obtained from the platform allocator.
///
/// The block is released back to the platform when dropped. Its start is
/// aligned for any primitive type (`calloc` guarantees `max_align_t`).
pub struct Block {
  ptr: NonNull<u8>,
  len: usize,
}

// SAFETY: `Block` uniquely owns its allocation.
unsafe impl Send for Block {}

impl Block {
  /// Requests `size` zeroed bytes from the platform.
  pub fn allocate(size: usize) -> Result<Self> {
    if size == 0 {
      error!("platform block of zero bytes requested");
      return Err(AllocError::ZeroSize);
    }

    let raw = unsafe { libc::calloc(size, 1) } as *mut u8;

    match NonNull::new(raw) {
      Some(ptr) => {
        debug!(size, address = ?ptr, "platform block allocated");
        Ok(Self { ptr, len: size })
      }
      None => {
        error!(size, "platform allocation failed");
        Err(AllocError::PlatformAllocation { size })
      }
    }
  }

  /// Size of the block in bytes.
  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }
}

impl Deref for Block {
  type Target = [u8];

  fn deref(&self) -> &[u8] {
    unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
  }
}

impl DerefMut for Block {
  fn deref_mut(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
  }
}

impl Drop for Block {
  fn drop(&mut self) {
    debug!(size = self.len, address = ?self.ptr, "platform block released");
    unsafe { libc::free(self.ptr.as_ptr().cast::<c_void>()) };
  }
}

impl fmt::Debug for Block {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Block")
      .field("address", &self.ptr)
      .field("len", &self.len)
      .finish()
  }
}

/// Fills `dest` with zeroes.
#[inline]
pub fn zero_memory(dest: &mut [u8]) {
  set_memory(dest, 0);
}

/// Fills `dest` with `value`.
pub fn set_memory(
  dest: &mut [u8],
  value: u8,
) {
  if dest.is_empty() {
    return;
  }

  unsafe {
    libc::memset(dest.as_mut_ptr().cast::<c_void>(), c_int::from(value), dest.len());
  }
}

/// Copies as many bytes of `source` as fit into `dest`, returning the count.
pub fn copy_memory(
  dest: &mut [u8],
  source: &[u8],
) -> usize {
  let count = dest.len().min(source.len());

  if count > 0 {
    // Borrow rules guarantee the two slices do not overlap.
    unsafe {
      libc::memcpy(
        dest.as_mut_ptr().cast::<c_void>(),
        source.as_ptr().cast::<c_void>(),
        count,
      );
    }
  }

  count
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_block_is_zeroed_and_writable() {
    let mut block = Block::allocate(64).unwrap();

    assert_eq!(block.len(), 64);
    assert!(block.iter().all(|&b| b == 0));

    block[10] = 0xAB;
    assert_eq!(block[10], 0xAB);
  }

  #[test]
  fn test_block_alignment() {
    let block = Block::allocate(24).unwrap();

    assert_eq!(block.as_ptr() as usize % 8, 0);
  }

  #[test]
  fn test_zero_sized_block_rejected() {
    assert_eq!(Block::allocate(0).unwrap_err(), AllocError::ZeroSize);
  }

  #[test]
  fn test_set_and_zero_memory() {
    let mut block = Block::allocate(16).unwrap();

    set_memory(&mut block[4..8], 0x7F);
    assert_eq!(&block[..9], &[0, 0, 0, 0, 0x7F, 0x7F, 0x7F, 0x7F, 0]);

    zero_memory(&mut block);
    assert!(block.iter().all(|&b| b == 0));
  }

  #[test]
  fn test_copy_memory_truncates_to_destination() {
    let mut dest = [0u8; 3];

    let copied = copy_memory(&mut dest, &[1, 2, 3, 4, 5]);

    assert_eq!(copied, 3);
    assert_eq!(dest, [1, 2, 3]);
  }
}
