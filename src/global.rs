//! The process-wide allocator over the program break.

use core::ptr::NonNull;

use spin::Once;

use crate::{
  allocator::Allocator,
  error::Result,
  region::SystemBreak,
  trace,
};

static GLOBAL: Once<Allocator<SystemBreak>> = Once::new();

/// Builds the process-wide allocator on first call and returns it.
///
/// The break is padded to the granularity before the first block goes in. If
/// that fails nothing is stored and the next call tries again.
pub fn init() -> Result<&'static Allocator<SystemBreak>> {
  GLOBAL.try_call_once(|| -> Result<Allocator<SystemBreak>> {
    let mut region = SystemBreak::new();
    region.align_break()?;

    trace!("process allocator initialised");
    Ok(Allocator::new(region))
  })
}

/// [`Allocator::allocate`] on the process-wide allocator.
pub fn allocate(size: usize) -> Result<NonNull<u8>> {
  init()?.allocate(size)
}

/// [`Allocator::release`] on the process-wide allocator.
///
/// # Safety
///
/// `address` must be null or a live pointer returned by [`allocate`].
pub unsafe fn release(address: *mut u8) {
  if let Some(allocator) = GLOBAL.get() {
    unsafe { allocator.release(address) }
  }
}

// Only the preloaded cdylib should export these: a Rust binary linking the
// rlib would otherwise route its own allocations here while `realloc` still
// goes to the C library.
#[cfg(feature = "c_api")]
mod c_api {
  use core::ptr;

  use libc::{c_void, size_t};

  #[cfg_attr(not(test), unsafe(no_mangle))]
  pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    match super::allocate(size) {
      Ok(address) => address.as_ptr().cast(),
      Err(_) => {
        set_enomem();
        ptr::null_mut()
      },
    }
  }

  #[cfg_attr(not(test), unsafe(no_mangle))]
  pub unsafe extern "C" fn free(address: *mut c_void) {
    unsafe { super::release(address.cast()) }
  }

  #[cfg(target_os = "linux")]
  fn set_enomem() {
    unsafe { *libc::__errno_location() = libc::ENOMEM }
  }

  #[cfg(not(target_os = "linux"))]
  fn set_enomem() {}
}
