use std::mem;

/// Size of a machine word in bytes.
pub const WORD: usize = mem::size_of::<usize>();

/// Rounds `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
pub const fn align_up(
  value: usize,
  align: usize,
) -> usize {
  (value + align - 1) & !(align - 1)
}

/// Same as [`align_up`], returning `None` instead of overflowing.
#[inline]
pub const fn checked_align_up(
  value: usize,
  align: usize,
) -> Option<usize> {
  match value.checked_add(align - 1) {
    Some(bumped) => Some(bumped & !(align - 1)),
    None => None,
  }
}

/// Calculates the machine word alignment for the given size.
///
/// # Examples
///
/// ```rust
/// use freeheap::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align::align_up($value, $crate::align::WORD)
  };
}

/// Rounds a size up to an explicit power-of-two alignment.
///
/// ```rust
/// use freeheap::align_to;
///
/// assert_eq!(align_to!(17, 8), 24);
/// assert_eq!(align_to!(32, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    $crate::align::align_up($value, $align)
  };
}
