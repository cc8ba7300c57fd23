use core::ptr::NonNull;
use std::alloc::{self, Layout};

use libc::{c_void, intptr_t, sbrk};

use crate::{
  align::GRANULARITY,
  error::{Error, Result},
};

/// A contiguous span of memory whose high end (the break) moves by signed
/// deltas, in the manner of `sbrk(2)`.
///
/// # Safety
///
/// On a positive `delta`, the `delta` bytes starting at the returned address
/// must be writable and owned by the caller until they are given back with a
/// negative `delta`. `sbrk` must never allocate through the allocator that
/// owns this region.
pub unsafe trait Region {
  /// Moves the break by `delta` bytes and returns the break as it was before
  /// the call. A `delta` of zero only queries it.
  fn sbrk(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>>;
}

/// The process program break.
#[derive(Debug, Default)]
pub struct SystemBreak {
  _private: (),
}

impl SystemBreak {
  pub const fn new() -> Self {
    Self { _private: () }
  }

  /// Pads the break up to the granularity so the first header is aligned.
  pub fn align_break(&mut self) -> Result<()> {
    let current = self.sbrk(0)?.as_ptr() as usize;
    let padding = current.next_multiple_of(GRANULARITY) - current;

    if padding != 0 {
      self.sbrk(padding as isize)?;
    }

    Ok(())
  }
}

unsafe impl Region for SystemBreak {
  fn sbrk(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>> {
    let previous = unsafe { sbrk(delta as intptr_t) };

    if previous == usize::MAX as *mut c_void {
      return Err(Error::Exhausted {
        requested: delta.unsigned_abs(),
      });
    }

    NonNull::new(previous.cast::<u8>()).ok_or(Error::Exhausted {
      requested: delta.unsigned_abs(),
    })
  }
}

/// A fixed-capacity span that behaves like a private program break.
///
/// Useful for running an allocator next to the system one, for instance in
/// tests where the host's own allocations would otherwise move the real break.
pub struct BufferRegion {
  base: NonNull<u8>,
  len: usize,
  layout: Layout,
}

// The buffer is exclusively owned by this value.
unsafe impl Send for BufferRegion {}

impl BufferRegion {
  const ALIGN: usize = 16;

  pub fn with_capacity(capacity: usize) -> Result<Self> {
    let layout = Layout::from_size_align(capacity.max(1), Self::ALIGN)
      .map_err(|_| Error::Overflow { requested: capacity })?;

    let base = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(Error::Exhausted {
      requested: capacity,
    })?;

    Ok(Self { base, len: 0, layout })
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }
}

unsafe impl Region for BufferRegion {
  fn sbrk(
    &mut self,
    delta: isize,
  ) -> Result<NonNull<u8>> {
    let previous = unsafe { self.base.add(self.len) };

    let len = if delta >= 0 {
      self
        .len
        .checked_add(delta as usize)
        .filter(|len| *len <= self.capacity())
    } else {
      self.len.checked_sub(delta.unsigned_abs())
    };

    self.len = len.ok_or(Error::Exhausted {
      requested: delta.unsigned_abs(),
    })?;

    Ok(previous)
  }
}

impl Drop for BufferRegion {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
  }
}
