use std::io::Read;

use segfit_alloc::Allocator;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how allocations change the program
/// break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { libc::sbrk(0) },
  );
}

fn main() {
  env_logger::init();

  // Our allocator holds a bucket table and the min_block/max_block
  // boundary pointers; init() asks the segment provider for the first page
  // and formats it as one big free block.
  let mut heap = Allocator::new();

  unsafe {
    print_program_break("start");
    assert!(heap.init(), "init() should always succeed on a fresh process");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 1) A handful of small allocations, distinct size classes.
    // ------------------------------------------------------------------
    println!("\n[1] Allocate 24, 40, 100 bytes");
    let a = heap.malloc(24);
    let b = heap.malloc(40);
    let c = heap.malloc(100);
    println!("[1] a = {a:?}, b = {b:?}, c = {c:?}");
    assert!(heap.validate());
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 2) Free the middle allocation and watch it land back in a bucket
    //    instead of just sitting unreachable, the way a bump allocator's
    //    "free" would.
    // ------------------------------------------------------------------
    println!("\n[2] Free b, then allocate something that should reuse it");
    heap.free(b);
    let d = heap.malloc(32);
    println!("[2] d = {d:?} (b was {b:?})");
    assert!(heap.validate());
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 3) Free a and c too — now everything between min_block and
    //    max_block should coalesce back into one free block.
    // ------------------------------------------------------------------
    println!("\n[3] Free a, c, d");
    heap.free(a);
    heap.free(c);
    heap.free(d);
    assert!(heap.validate());
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 4) A large allocation that doesn't fit in the current segment,
    //    forcing get_new_page() to ask sbrk for more.
    // ------------------------------------------------------------------
    print_program_break("before large alloc");
    println!("\n[4] Allocate 64 KiB (forces segment growth)");
    let big = heap.malloc(64 * 1024);
    println!("[4] big = {big:?}");
    print_program_break("after large alloc");
    assert!(!big.is_null());
    assert!(heap.validate());
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 5) realloc both shrinking and growing the same block in place.
    // ------------------------------------------------------------------
    println!("\n[5] realloc big down to 100 bytes, then back up to 50 KiB");
    let shrunk = heap.realloc(big, 100);
    let grown = heap.realloc(shrunk, 50 * 1024);
    println!("[5] shrunk = {shrunk:?}, grown = {grown:?}");
    assert!(heap.validate());
    heap.free(grown);
    block_until_enter_pressed();

    println!("\n[6] End of walkthrough. Process will exit and the OS reclaims everything.");
  }
}
