use core::ptr::NonNull;

use spin::{mutex::Mutex, relax::Yield};

use crate::{
  align::size_class,
  block::{HEADER_SIZE, Header},
  error::{Error, Result},
  region::Region,
  trace,
};

/// Snapshot of one listed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub payload: NonNull<u8>,
  pub size: usize,
  pub free: bool,
}

/// Totals gathered by walking the block list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub used_bytes: usize,
  /// Walking from the head ended at the tail and the tail has no successor.
  pub consistent: bool,
}

struct Heap<R> {
  head: Option<NonNull<Header>>,
  tail: Option<NonNull<Header>>,
  region: R,
}

// Headers live inside `region` and are only touched while the heap is locked.
unsafe impl<R: Send> Send for Heap<R> {}

/// First-fit allocator over a single growable region.
///
/// Blocks are appended at the break and listed oldest first. Releasing the
/// block that ends at the break gives its bytes back to the region; any other
/// released block stays listed as free and is handed out again, whole, to the
/// first request it can hold.
///
/// Waiters on the heap lock yield their time slice between attempts, so a
/// holder descheduled mid-`sbrk` is not raced by spinning threads.
pub struct Allocator<R: Region> {
  heap: Mutex<Heap<R>, Yield>,
}

impl<R: Region> Allocator<R> {
  pub const fn new(region: R) -> Self {
    Self {
      heap: Mutex::new(Heap {
        head: None,
        tail: None,
        region,
      }),
    }
  }

  /// Returns at least `size` usable bytes.
  ///
  /// The size is rounded to its size class first; a free listed block of at
  /// least that class is reused before the region is grown.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let class = size_class(size).ok_or(Error::Overflow { requested: size })?;
    let total = class
      .checked_add(HEADER_SIZE)
      .filter(|total| *total <= isize::MAX as usize)
      .ok_or(Error::Overflow { requested: size })?;

    let mut heap = self.heap.lock();

    if let Some(block) = heap.find_free_block(class) {
      unsafe {
        (*block.as_ptr()).free = false;
        let payload = Header::payload(block);
        drop(heap);

        trace!("reused free block at {:?} for {} bytes", payload, size);
        return Ok(payload);
      }
    }

    let address = match heap.region.sbrk(total as isize) {
      Ok(address) => address,
      Err(err) => {
        drop(heap);

        trace!("growing the region by {} bytes failed: {}", total, err);
        return Err(err);
      },
    };

    unsafe {
      let block = address.cast::<Header>();
      block.as_ptr().write(Header::new(class));
      heap.push(block);

      let payload = Header::payload(block);
      drop(heap);

      trace!("grew the region by {} bytes, block at {:?}", total, payload);
      Ok(payload)
    }
  }

  /// Gives back a block obtained from [`Allocator::allocate`]. Null is a no-op.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by `allocate` on this
  /// allocator. Foreign or already released pointers are not detected.
  pub unsafe fn release(
    &self,
    address: *mut u8,
  ) {
    let Some(payload) = NonNull::new(address) else {
      return;
    };

    let mut heap = self.heap.lock();

    unsafe {
      let block = Header::from_payload(payload);
      let brk = heap.region.sbrk(0).ok().map(NonNull::as_ptr);

      if brk != Some(Header::end(block)) {
        (*block.as_ptr()).free = true;
        drop(heap);

        trace!("marked block at {:?} free", payload);
        return;
      }

      heap.pop_tail();

      let span = Header::span(block);
      let shrunk = heap.region.sbrk(-(span as isize));
      drop(heap);

      match shrunk {
        Ok(_) => trace!("shrank the region by {} bytes", span),
        Err(err) => trace!("shrinking the region by {} bytes failed: {}", span, err),
      }
    }
  }

  /// Current end of the managed region.
  pub fn brk(&self) -> Result<NonNull<u8>> {
    self.heap.lock().region.sbrk(0)
  }

  /// Visits every listed block, oldest first. `visit` runs under the heap
  /// lock and must not call back into this allocator.
  pub fn walk(
    &self,
    mut visit: impl FnMut(BlockInfo),
  ) {
    let heap = self.heap.lock();
    let mut current = heap.head;

    while let Some(block) = current {
      unsafe {
        visit(BlockInfo {
          payload: Header::payload(block),
          size: (*block.as_ptr()).size,
          free: (*block.as_ptr()).free,
        });
        current = (*block.as_ptr()).next;
      }
    }
  }

  pub fn stats(&self) -> HeapStats {
    let heap = self.heap.lock();
    let mut stats = HeapStats::default();
    let mut current = heap.head;
    let mut last = None;

    while let Some(block) = current {
      unsafe {
        let size = (*block.as_ptr()).size;

        stats.blocks += 1;
        if (*block.as_ptr()).free {
          stats.free_blocks += 1;
          stats.free_bytes += size;
        } else {
          stats.used_bytes += size;
        }

        last = Some(block);
        current = (*block.as_ptr()).next;
      }
    }

    stats.consistent = last == heap.tail;
    stats
  }
}

impl<R> Heap<R> {
  fn find_free_block(
    &self,
    size: usize,
  ) -> Option<NonNull<Header>> {
    let mut current = self.head;

    while let Some(block) = current {
      unsafe {
        if (*block.as_ptr()).free && (*block.as_ptr()).size >= size {
          return Some(block);
        }
        current = (*block.as_ptr()).next;
      }
    }

    None
  }

  /// Appends a freshly written header as the new tail.
  unsafe fn push(
    &mut self,
    block: NonNull<Header>,
  ) {
    match self.tail {
      Some(tail) => unsafe { (*tail.as_ptr()).next = Some(block) },
      None => self.head = Some(block),
    }

    self.tail = Some(block);
  }

  /// Unlinks the tail, making its predecessor the new tail.
  unsafe fn pop_tail(&mut self) {
    if self.head == self.tail {
      self.head = None;
      self.tail = None;
      return;
    }

    let mut current = self.head;

    while let Some(block) = current {
      unsafe {
        let next = (*block.as_ptr()).next;
        if next == self.tail {
          (*block.as_ptr()).next = None;
          self.tail = Some(block);
          return;
        }
        current = next;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, thread};

  use super::*;
  use crate::{align::GRANULARITY, region::BufferRegion};

  fn allocator(capacity: usize) -> Allocator<BufferRegion> {
    Allocator::new(BufferRegion::with_capacity(capacity).unwrap())
  }

  fn blocks(allocator: &Allocator<BufferRegion>) -> Vec<BlockInfo> {
    let mut blocks = Vec::new();
    allocator.walk(|block| blocks.push(block));
    blocks
  }

  fn distance(
    from: NonNull<u8>,
    to: NonNull<u8>,
  ) -> usize {
    to.as_ptr() as usize - from.as_ptr() as usize
  }

  #[test]
  fn test_alloc() {
    let allocator = allocator(1024);

    unsafe {
      let first_addr = allocator.allocate(8).unwrap().as_ptr() as *mut u64;

      first_addr.write_unaligned(3u64);

      assert_eq!(first_addr.read_unaligned(), 3);

      let size: usize = 6;

      let second_addr = allocator.allocate(size * 2).unwrap().as_ptr() as *mut u16;

      for i in 0..size {
        *(second_addr.add(i)) = (i + 1) as u16;
      }

      assert_eq!(first_addr.read_unaligned(), 3);

      for i in 0..size {
        assert_eq!((i + 1) as u16, *(second_addr.add(i)))
      }

      allocator.release(first_addr as *mut u8);

      let third_addr = allocator.allocate(4).unwrap().as_ptr() as *mut u32;

      assert_eq!(first_addr as *mut u32, third_addr);

      allocator.release(third_addr as *mut u8);

      let fourth_addr = allocator.allocate(16).unwrap().as_ptr() as *mut u128;

      fourth_addr.write_unaligned(25);

      assert!(fourth_addr as usize > third_addr as usize);

      assert_eq!(fourth_addr.read_unaligned(), 25);
    }
  }

  #[test]
  fn test_granted_sizes_follow_size_class() {
    let allocator = allocator(4096);

    for (requested, granted) in [(0, 4), (1, 4), (4, 4), (5, 8), (10, 12), (12, 12), (13, 16)] {
      allocator.allocate(requested).unwrap();
      assert_eq!(blocks(&allocator).last().unwrap().size, granted);
    }
  }

  #[test]
  fn test_scenario() {
    let allocator = allocator(1024);
    let start = allocator.brk().unwrap();

    let first = allocator.allocate(10).unwrap();
    let second = allocator.allocate(4).unwrap();

    assert_eq!(distance(start, first), HEADER_SIZE);
    assert_eq!(distance(first, second), 12 + HEADER_SIZE);
    assert_eq!(
      blocks(&allocator).iter().map(|block| block.size).collect::<Vec<_>>(),
      vec![12, 4]
    );

    let grown = allocator.brk().unwrap();
    unsafe { allocator.release(first.as_ptr()) };
    assert_eq!(allocator.brk().unwrap(), grown);
    assert!(blocks(&allocator)[0].free);

    let again = allocator.allocate(10).unwrap();
    assert_eq!(again, first);
    assert_eq!(allocator.brk().unwrap(), grown);
    assert!(!blocks(&allocator)[0].free);

    unsafe { allocator.release(second.as_ptr()) };
    assert_eq!(distance(allocator.brk().unwrap(), grown), HEADER_SIZE + 4);
    assert_eq!(blocks(&allocator).len(), 1);

    unsafe { allocator.release(first.as_ptr()) };
    assert_eq!(allocator.brk().unwrap(), start);
    assert!(blocks(&allocator).is_empty());
    assert!(allocator.stats().consistent);
  }

  #[test]
  fn test_first_fit_reuses_oldest_fitting_block() {
    let allocator = allocator(1024);

    let small = allocator.allocate(4).unwrap();
    let large = allocator.allocate(32).unwrap();
    let other_large = allocator.allocate(32).unwrap();
    let _guard = allocator.allocate(4).unwrap();

    unsafe {
      allocator.release(small.as_ptr());
      allocator.release(other_large.as_ptr());
      allocator.release(large.as_ptr());
    }

    let brk = allocator.brk().unwrap();

    // The small block is first in the list but too small; the older of the
    // two large blocks wins, whole, even though only 5 bytes were asked for.
    assert_eq!(allocator.allocate(5).unwrap(), large);
    assert_eq!(blocks(&allocator)[1].size, 32);
    assert_eq!(allocator.allocate(1).unwrap(), small);
    assert_eq!(allocator.allocate(20).unwrap(), other_large);
    assert_eq!(allocator.brk().unwrap(), brk);
  }

  #[test]
  fn test_no_reuse_across_size_mismatch() {
    let allocator = allocator(1024);

    let first = allocator.allocate(8).unwrap();
    let _guard = allocator.allocate(4).unwrap();
    unsafe { allocator.release(first.as_ptr()) };

    let brk = allocator.brk().unwrap();
    let bigger = allocator.allocate(9).unwrap();

    assert_ne!(bigger, first);
    assert_eq!(distance(brk, allocator.brk().unwrap()), HEADER_SIZE + 12);
    assert!(blocks(&allocator)[0].free);
  }

  #[test]
  fn test_release_of_interior_block_keeps_break() {
    let allocator = allocator(1024);

    let first = allocator.allocate(16).unwrap();
    let second = allocator.allocate(16).unwrap();
    let third = allocator.allocate(16).unwrap();
    let brk = allocator.brk().unwrap();

    unsafe {
      allocator.release(second.as_ptr());
      assert_eq!(allocator.brk().unwrap(), brk);

      allocator.release(first.as_ptr());
      assert_eq!(allocator.brk().unwrap(), brk);

      // Shrinking stops at the tail: the freed interior blocks are not
      // reclaimed behind it.
      allocator.release(third.as_ptr());
    }

    assert_eq!(distance(allocator.brk().unwrap(), brk), HEADER_SIZE + 16);
    assert_eq!(
      allocator.stats(),
      HeapStats {
        blocks: 2,
        free_blocks: 2,
        free_bytes: 32,
        used_bytes: 0,
        consistent: true,
      }
    );
  }

  #[test]
  fn test_reverse_release_empties_region() {
    let allocator = allocator(4096);
    let start = allocator.brk().unwrap();

    let addresses: Vec<_> = (1..=8).map(|n| allocator.allocate(n * 3).unwrap()).collect();

    for address in addresses.iter().rev() {
      let before = allocator.brk().unwrap();
      let size = blocks(&allocator).last().unwrap().size;

      unsafe { allocator.release(address.as_ptr()) };

      assert_eq!(distance(allocator.brk().unwrap(), before), HEADER_SIZE + size);
      assert!(allocator.stats().consistent);
    }

    assert_eq!(allocator.brk().unwrap(), start);
    assert_eq!(allocator.stats(), HeapStats {
      consistent: true,
      ..HeapStats::default()
    });
  }

  #[test]
  fn test_tail_release_relinks_predecessor() {
    let allocator = allocator(1024);

    let first = allocator.allocate(4).unwrap();
    let second = allocator.allocate(8).unwrap();
    let third = allocator.allocate(12).unwrap();

    unsafe { allocator.release(third.as_ptr()) };
    assert_eq!(
      blocks(&allocator).iter().map(|block| block.payload).collect::<Vec<_>>(),
      vec![first, second]
    );

    // The cut link must not leak the shrunk block back into the list.
    let fourth = allocator.allocate(16).unwrap();
    assert_eq!(fourth, third);
    assert_eq!(
      blocks(&allocator).iter().map(|block| block.size).collect::<Vec<_>>(),
      vec![4, 8, 16]
    );
    assert!(allocator.stats().consistent);
  }

  #[test]
  fn test_null_release_is_noop() {
    let allocator = allocator(256);
    let _block = allocator.allocate(4).unwrap();
    let before = (allocator.brk().unwrap(), allocator.stats());

    unsafe { allocator.release(core::ptr::null_mut()) };

    assert_eq!((allocator.brk().unwrap(), allocator.stats()), before);
  }

  #[test]
  fn test_exhaustion_leaves_list_untouched() {
    let allocator = allocator(64);

    let block = allocator.allocate(8).unwrap();
    let before = (allocator.brk().unwrap(), allocator.stats());

    assert_eq!(
      allocator.allocate(64),
      Err(Error::Exhausted {
        requested: HEADER_SIZE + 64,
      })
    );
    assert_eq!((allocator.brk().unwrap(), allocator.stats()), before);

    unsafe { allocator.release(block.as_ptr()) };
    assert!(allocator.allocate(64 - HEADER_SIZE).is_ok());
  }

  #[test]
  fn test_overflow_is_reported() {
    let allocator = allocator(64);

    assert_eq!(
      allocator.allocate(usize::MAX),
      Err(Error::Overflow {
        requested: usize::MAX,
      })
    );
    assert_eq!(
      allocator.allocate(isize::MAX as usize),
      Err(Error::Overflow {
        requested: isize::MAX as usize,
      })
    );
    assert_eq!(allocator.stats().blocks, 0);
  }

  #[test]
  fn test_payloads_are_granule_aligned() {
    let allocator = allocator(4096);

    for size in [1, 7, 10, 3, 33, 0, 2] {
      let address = allocator.allocate(size).unwrap().as_ptr() as usize;
      assert_eq!(address % GRANULARITY, 0);
    }
  }

  #[test]
  fn test_list_integrity_after_mixed_sequence() {
    let allocator = allocator(8192);
    let mut live = Vec::new();

    for round in 0..64usize {
      let address = allocator.allocate((round * 7) % 40).unwrap();
      live.push(address);

      if round % 3 == 0 {
        let victim = live.remove((round * 5) % live.len());
        unsafe { allocator.release(victim.as_ptr()) };
      }

      let stats = allocator.stats();
      assert!(stats.consistent);
      assert_eq!(stats.blocks - stats.free_blocks, live.len());
    }

    for address in live.drain(..) {
      unsafe { allocator.release(address.as_ptr()) };
      assert!(allocator.stats().consistent);
    }
  }

  #[test]
  fn test_concurrent_allocation() {
    let allocator = Arc::new(allocator(1 << 20));
    let start = allocator.brk().unwrap();

    let workers: Vec<_> = (0..8u8)
      .map(|id| {
        let allocator = Arc::clone(&allocator);

        thread::spawn(move || {
          for round in 0..200usize {
            let size = 1 + (round + id as usize) % 48;
            let address = allocator.allocate(size).unwrap();

            unsafe {
              address.as_ptr().write_bytes(id, size);
              for offset in 0..size {
                assert_eq!(*address.as_ptr().add(offset), id);
              }
              allocator.release(address.as_ptr());
            }
          }
        })
      })
      .collect();

    for worker in workers {
      worker.join().unwrap();
    }

    let stats = allocator.stats();
    assert!(stats.consistent);
    assert_eq!(stats.blocks, stats.free_blocks);
    assert!(allocator.brk().unwrap() >= start);
  }
}
