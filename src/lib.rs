//! # dkalloc - A First-Fit `sbrk` Allocator
//!
//! This crate provides a drop-in replacement for `malloc` and `free` that
//! carves every block out of the program break, keeps a singly linked list of
//! block headers in allocation order, and serializes every request behind one
//! lock.
//!
//! ## Overview
//!
//! ```text
//!   Managed Region:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌────┬──────┬────┬──────┬────┬──────┬────┬──────┐                  │
//!   │   │ H1 │  A1  │ H2 │ free │ H3 │  A3  │ H4 │  A4  │                  │
//!   │   └────┴──────┴────┴──────┴────┴──────┴────┴──────┘                  │
//!   │     │            ▲ │          ▲ │          ▲      ▲                  │
//!   │     └── next ────┘ └── next ──┘ └── next ──┘      │                  │
//!   │   head                                   tail  Program               │
//!   │                                                 Break                │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation: first free block (oldest first) whose size fits, else grow
//!   the break by header + size and append.
//!   Release: the block touching the break shrinks it, any other is marked
//!   free for reuse.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   dkalloc
//!   ├── align      - Granularity and size classes
//!   ├── block      - Block header layout (internal)
//!   ├── region     - Region trait, SystemBreak and BufferRegion
//!   ├── error      - Error type
//!   ├── allocator  - Allocator<R>, the locked first-fit list
//!   └── global     - Process-wide allocator and the C entry points
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use dkalloc::{Allocator, BufferRegion};
//!
//! let allocator = Allocator::new(BufferRegion::with_capacity(4096).unwrap());
//!
//! let first = allocator.allocate(10).unwrap();
//! let second = allocator.allocate(4).unwrap();
//!
//! unsafe {
//!     // `first` is not next to the break, so it is only marked free...
//!     allocator.release(first.as_ptr());
//!     // ...and handed out again to the next request it can hold.
//!     assert_eq!(allocator.allocate(10).unwrap(), first);
//!
//!     allocator.release(second.as_ptr());
//!     allocator.release(first.as_ptr());
//! }
//!
//! assert_eq!(allocator.stats().blocks, 0);
//! ```
//!
//! ## Preloading
//!
//! Built with the `c_api` feature the cdylib exports `malloc` and `free`:
//!
//! ```bash,ignore
//! cargo build --release --features c_api
//! LD_PRELOAD=target/release/libdkalloc.so ./your_program
//! ```
//!
//! `realloc` and `calloc` are not provided. The feature is meant for the
//! preloaded cdylib only: a Rust program linking the crate with `c_api` on
//! would send its own allocations here and its reallocations to the C
//! library. Unit tests build the entry points without exporting them.
//!
//! ## Block Layout
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ free: false     │  │  │                          │  │
//!   │  │ next: none/ptr  │  │  │  N bytes, N a multiple   │  │
//!   │  └─────────────────┘  │  │  of the granularity      │  │
//!   │  20 bytes (64 bit)    │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! ## Limitations
//!
//! - **No splitting or coalescing**: a reused block is handed out whole and
//!   adjacent free blocks stay separate.
//! - **Tail-only shrinking**: interior blocks return to the OS only once every
//!   later block has been released.
//! - **Granule alignment**: payloads are aligned to 4 bytes, not to
//!   `max_align_t`.
//! - **No misuse detection**: double or foreign releases are undefined
//!   behaviour.
//! - **Unix-only**: requires `libc` and `sbrk`.

pub mod align;
mod allocator;
mod block;
mod error;
mod global;
mod region;

/// Logs through `log::trace!` with the `log` feature, and compiles to nothing
/// otherwise. Must not be used while the heap lock is held.
macro_rules! trace {
  ($($arg:tt)*) => {{
    #[cfg(feature = "log")]
    log::trace!($($arg)*);
    #[cfg(not(feature = "log"))]
    let _ = format_args!($($arg)*);
  }};
}

pub(crate) use trace;

pub use allocator::{Allocator, BlockInfo, HeapStats};
pub use block::HEADER_SIZE;
pub use error::{Error, Result};
pub use global::{allocate, init, release};
pub use region::{BufferRegion, Region, SystemBreak};
