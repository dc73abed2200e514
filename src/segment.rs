//! Segment provider: the allocator's external collaborator for raw address
//! space, built directly on `sbrk(2)` and exposing the two-operation
//! interface the allocation engine actually wants (`init_segment` /
//! `extend_segment`) instead of being inlined into `malloc`.
//!
//! The engine assumes every region handed back here is page-aligned and
//! physically contiguous with whatever came before it. `sbrk` gives us
//! both for free as long as nothing else in the process is also moving the
//! break — true of the allocator's own test harness, and the reason this
//! crate is Unix-only.

use libc::{c_void, intptr_t, sbrk};
use log::{debug, warn};

use crate::error::AllocError;

/// Page size assumed by the segment provider. Fixed at the POSIX-typical
/// 4096 rather than read from `sysconf` at runtime: the allocation engine
/// requires `PAGE_SIZE` to be a compile-time constant power of two (see the
/// block-splitting and bucket-sizing arithmetic), and 4096 matches every
/// platform this crate targets.
pub const PAGE_SIZE: usize = 4096;

/// Reserves `pages` contiguous pages and returns their base address,
/// resetting the provider's notion of "the heap" to just this region.
///
/// Returns `Err` if the underlying `sbrk` call fails (out of memory,
/// `RLIMIT_DATA` exceeded, …). A caller that gets `Err` must treat the
/// heap as not yet initialized; no partial state is left behind.
pub fn init_segment(pages: usize) -> Result<*mut u8, AllocError> {
  extend_segment(pages)
}

/// Appends `pages` contiguous pages immediately after the current program
/// break and returns the base address of the new region.
pub fn extend_segment(pages: usize) -> Result<*mut u8, AllocError> {
  let bytes = pages * PAGE_SIZE;
  let base = unsafe { sbrk(bytes as intptr_t) };
  if base == usize::MAX as *mut c_void {
    warn!("sbrk refused to grow the heap by {pages} page(s) ({bytes} bytes)");
    return Err(AllocError::SegmentExhausted { pages });
  }
  debug!("segment grew by {pages} page(s) ({bytes} bytes), base = {base:p}");
  Ok(base as *mut u8)
}
