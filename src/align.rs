/// Rounding unit applied to every requested size before searching or growing.
pub const GRANULARITY: usize = 4;

/// Rounds a requested byte count up to its size class.
///
/// The class is `((size - 1) / GRANULARITY) * GRANULARITY + GRANULARITY`, so a
/// zero-byte request still takes one full granule. Returns `None` when the
/// class does not fit in a `usize`.
///
/// # Examples
///
/// ```rust
/// use dkalloc::align::size_class;
///
/// assert_eq!(size_class(0), Some(4));
/// assert_eq!(size_class(10), Some(12));
/// assert_eq!(size_class(12), Some(12));
/// assert_eq!(size_class(usize::MAX), None);
/// ```
pub const fn size_class(size: usize) -> Option<usize> {
  let floor = (size.saturating_sub(1) / GRANULARITY) * GRANULARITY;

  floor.checked_add(GRANULARITY)
}
