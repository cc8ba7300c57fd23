use core::{mem, ptr::NonNull};

use static_assertions::{const_assert, const_assert_eq};

use crate::align::GRANULARITY;

/// Metadata written immediately before every payload handed out.
///
/// Packed to the granularity so that headers stay aligned when they are
/// appended after payloads of any size class. Fields must only be accessed
/// through raw place expressions, never through references: copy a field out
/// (`let next = (*header).next;`) before calling methods or `==` on it.
#[repr(C, packed(4))]
pub struct Header {
  pub size: usize,
  pub free: bool,
  pub next: Option<NonNull<Header>>,
}

pub const HEADER_SIZE: usize = mem::size_of::<Header>();

const_assert_eq!(mem::align_of::<Header>(), GRANULARITY);
const_assert_eq!(HEADER_SIZE % GRANULARITY, 0);
const_assert!(HEADER_SIZE <= isize::MAX as usize);

impl Header {
  pub fn new(size: usize) -> Self {
    Self {
      size,
      free: false,
      next: None,
    }
  }

  /// Address of the first usable byte after `header`.
  ///
  /// # Safety
  ///
  /// `header` must point at a header written inside the managed region.
  pub unsafe fn payload(header: NonNull<Header>) -> NonNull<u8> {
    unsafe { header.cast::<u8>().add(HEADER_SIZE) }
  }

  /// Recovers the header sitting `HEADER_SIZE` bytes before `payload`.
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by [`Header::payload`] for a header that
  /// is still listed. Nothing checks this.
  pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<Header> {
    unsafe { payload.sub(HEADER_SIZE).cast::<Header>() }
  }

  /// One past the last payload byte of the block.
  ///
  /// # Safety
  ///
  /// Same as [`Header::payload`].
  pub unsafe fn end(header: NonNull<Header>) -> *mut u8 {
    unsafe { Self::payload(header).as_ptr().add((*header.as_ptr()).size) }
  }

  /// Bytes the block occupies in the region, header included.
  ///
  /// # Safety
  ///
  /// Same as [`Header::payload`].
  pub unsafe fn span(header: NonNull<Header>) -> usize {
    HEADER_SIZE + unsafe { (*header.as_ptr()).size }
  }
}
