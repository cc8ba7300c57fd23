use std::io::Read;

use dkalloc::{Allocator, BlockInfo, SystemBreak};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(
  allocator: &Allocator<SystemBreak>,
  label: &str,
) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    allocator.brk(),
  );
}

fn print_blocks(allocator: &Allocator<SystemBreak>) {
  let mut blocks: Vec<BlockInfo> = Vec::new();
  allocator.walk(|block| blocks.push(block));

  for (index, block) in blocks.iter().enumerate() {
    println!(
      "    #{:<2} payload = {:?}, size = {:>5}, {}",
      index,
      block.payload,
      block.size,
      if block.free { "free" } else { "in use" }
    );
  }
}

fn main() -> dkalloc::Result<()> {
  // The process-wide allocator. Other code in this binary (println!, Vec)
  // still goes through the C library, which moves the same break, so a
  // release here does not always shrink it.
  let allocator = dkalloc::init()?;

  print_program_break(allocator, "start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 10 bytes: rounded up to a 12-byte block.
  // --------------------------------------------------------------------
  let first = allocator.allocate(10)?;
  println!("\n[1] Allocate 10 bytes at {:?}", first);
  print_blocks(allocator);
  print_program_break(allocator, "1");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 4 bytes: exactly one granule.
  // --------------------------------------------------------------------
  let second = allocator.allocate(4)?;
  println!("\n[2] Allocate 4 bytes at {:?}", second);
  print_blocks(allocator);
  print_program_break(allocator, "2");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Release the first block. It is not next to the break, so it is
  //    only marked free.
  // --------------------------------------------------------------------
  unsafe { allocator.release(first.as_ptr()) };
  println!("\n[3] Released {:?}", first);
  print_blocks(allocator);
  print_program_break(allocator, "3");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Allocate 10 bytes again: the free block is reused whole.
  // --------------------------------------------------------------------
  let third = allocator.allocate(10)?;
  println!(
    "\n[4] Allocate 10 bytes at {:?}, reused first block? {}",
    third,
    if third == first { "Yes" } else { "No" }
  );
  print_blocks(allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Release in reverse order. Each block that touches the break shrinks
  //    it; the others are marked free.
  // --------------------------------------------------------------------
  unsafe {
    allocator.release(second.as_ptr());
    allocator.release(third.as_ptr());
  }
  println!("\n[5] Released both blocks");
  print_blocks(allocator);
  print_program_break(allocator, "5");

  let stats = allocator.stats();
  println!(
    "\n[6] {} blocks listed, {} free ({} bytes), list consistent: {}",
    stats.blocks, stats.free_blocks, stats.free_bytes, stats.consistent
  );

  Ok(())
}
