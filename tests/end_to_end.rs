//! End-to-end scenarios against the public `Allocator` API. Each test here
//! corresponds to one of the documented scenarios the allocator is
//! expected to satisfy, plus a stress pass exercising many blocks at once.
//!
//! These run single-threaded against their own `Allocator` instance — the
//! underlying segment provider (`sbrk`) is process-wide, but each instance
//! only ever walks the region it grew itself, so instances don't interfere
//! with each other's bookkeeping even though they share one process break.

use segfit_alloc::Allocator;

const PAGE_SIZE: usize = 4096;
const HEADER_SIZE: usize = 8;

#[test]
fn scenario_1_single_alloc_leaves_a_bucketed_tail() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let p = heap.malloc(24);
  assert!(!p.is_null());
  assert_eq!(p as usize % 8, 0);
  assert!(heap.validate());
}

#[test]
fn scenario_2_freeing_the_only_allocation_restores_one_free_block() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let p = heap.malloc(24);
  heap.free(p);
  assert!(heap.validate());

  // The whole first page (minus its one header) should be free and
  // reusable as a single block: a request for exactly that much must
  // succeed without growing the segment.
  let whole_page_payload = PAGE_SIZE - HEADER_SIZE;
  let reused = heap.malloc(whole_page_payload);
  assert!(!reused.is_null());
  assert_eq!(reused, p, "the sole free block should satisfy an exact-size request in place");
  assert!(heap.validate());
}

#[test]
fn scenario_3_freeing_two_adjacent_allocations_coalesces_to_one_block() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let a = heap.malloc(24);
  let b = heap.malloc(24);
  heap.free(a);
  heap.free(b);
  assert!(heap.validate());

  // a, its split tail, and b's split tail should all have coalesced into
  // one block spanning everything from the first page.
  let whole_page_payload = PAGE_SIZE - HEADER_SIZE;
  let reused = heap.malloc(whole_page_payload);
  assert!(!reused.is_null());
  assert_eq!(reused, a);
  assert!(heap.validate());
}

#[test]
fn scenario_4_large_allocation_extends_the_segment() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let a = heap.malloc(24);
  let b = heap.malloc(5000);
  assert!(!b.is_null());
  assert!((b as usize) > (a as usize));
  assert!(heap.validate());
}

#[test]
fn scenario_5_realloc_preserves_bytes_whether_or_not_it_moves() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let p = heap.malloc(100);
  unsafe { std::ptr::write_bytes(p, 0xAA, 100) };

  let q = heap.realloc(p, 200);
  assert!(!q.is_null());
  let bytes = unsafe { std::slice::from_raw_parts(q, 100) };
  assert!(bytes.iter().all(|&b| b == 0xAA));
  assert!(heap.validate());
}

#[test]
fn scenario_6_many_allocations_then_frees_returns_to_post_init_state() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let mut ptrs = Vec::with_capacity(100);
  for _ in 0..100 {
    let p = heap.malloc(32);
    assert!(!p.is_null());
    ptrs.push(p);
  }
  assert!(heap.validate());

  for p in ptrs {
    heap.free(p);
  }
  assert!(heap.validate());
}

#[test]
fn mixed_alloc_free_realloc_stress_stays_consistent() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let sizes = [16usize, 24, 40, 100, 256, 17, 4000, 33, 8192];
  let mut live = Vec::new();

  for (i, &size) in sizes.iter().cycle().take(200).enumerate() {
    if i % 3 == 2 && !live.is_empty() {
      let idx = i % live.len();
      let p: *mut u8 = live.swap_remove(idx);
      heap.free(p);
    } else {
      let p = heap.malloc(size);
      assert!(!p.is_null(), "malloc({size}) failed at iteration {i}");
      live.push(p);
    }
    assert!(heap.validate(), "validate() failed at iteration {i}");
  }

  for p in live {
    heap.free(p);
  }
  assert!(heap.validate());
}

#[test]
fn writing_requested_bytes_never_overlaps_a_neighboring_live_block() {
  let mut heap = Allocator::new();
  assert!(heap.init());

  let a = heap.malloc(50);
  let b = heap.malloc(50);
  unsafe {
    std::ptr::write_bytes(a, 0x11, 50);
    std::ptr::write_bytes(b, 0x22, 50);
  }
  let a_bytes = unsafe { std::slice::from_raw_parts(a, 50) };
  let b_bytes = unsafe { std::slice::from_raw_parts(b, 50) };
  assert!(a_bytes.iter().all(|&byte| byte == 0x11));
  assert!(b_bytes.iter().all(|&byte| byte == 0x22));
}

#[test]
fn init_twice_is_indistinguishable_from_once() {
  let mut heap = Allocator::new();
  assert!(heap.init());
  let first = heap.malloc(24);
  heap.free(first);

  assert!(heap.init());
  let second = heap.malloc(24);
  assert!(!second.is_null());
  assert_eq!(second as usize % 8, 0);
  assert!(heap.validate());
}
