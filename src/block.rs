//! In-band block header and physical-chain accessors.
//!
//! Every block in the heap is a `Header` immediately followed by its
//! payload. `Header` packs flags into the spare bits of `payloadsz` (sizes
//! are always 8-byte aligned, so the low three bits and the sign bit are
//! free) the same way the C heap allocator this crate descends from does —
//! see the module-level docs in `lib.rs` for the bit layout table.
//!
//! Every function here takes or returns a *payload* pointer (`*mut u8`),
//! never a `Header` pointer, matching how the rest of the engine talks
//! about blocks: a block's identity, as far as callers are concerned, is
//! where its payload starts.

use std::mem;

/// Size in bytes of the in-band header (`payloadsz` + `prevpayloadsz`).
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Minimum payload size: a free block must hold two pointer-width fields
/// (`next_in_bucket`, `prev_in_bucket`).
pub const MIN_PAYLOAD: usize = 2 * mem::size_of::<usize>();

/// Required payload alignment.
pub const ALIGNMENT: usize = 8;

pub const FREE_MASK: u32 = 0x8000_0000;
pub const NEXT_FREE: u32 = 0x0000_0002;
pub const PREV_FREE: u32 = 0x0000_0001;
pub const SIZE_MASK: u32 = 0x7FFF_FFFC;

/// Sentinel written into `prevpayloadsz` of the lowest block in the heap.
/// There is no predecessor to describe, so the field carries this
/// recognizable marker instead of a real size.
pub const INIT_MASK: u32 = 0xFFFF_FFFE;

const _: () = assert!(HEADER_SIZE == 8, "header must stay two u32 words");

/// The in-band per-block header: two packed 32-bit words.
#[repr(C)]
pub struct Header {
  pub payloadsz: u32,
  pub prevpayloadsz: u32,
}

/// Backs up from a payload pointer to its header.
#[inline]
pub unsafe fn header_for_payload(payload: *mut u8) -> *mut Header {
  unsafe { payload.sub(HEADER_SIZE) as *mut Header }
}

/// Advances from a header pointer to its payload.
#[inline]
pub unsafe fn payload_for_header(header: *mut Header) -> *mut u8 {
  unsafe { (header as *mut u8).add(HEADER_SIZE) }
}

/// Raw `payloadsz` word (size bits *and* flag bits).
#[inline]
pub unsafe fn raw_payloadsz(payload: *mut u8) -> u32 {
  unsafe { (*header_for_payload(payload)).payloadsz }
}

/// Overwrites the whole `payloadsz` word, flags included. Callers that want
/// to preserve existing flags must fold them into `value` themselves (this
/// mirrors the block-format's C ancestor, where `set_payload_size` is a
/// plain store, not a read-modify-write).
#[inline]
pub unsafe fn set_raw_payloadsz(payload: *mut u8, value: u32) {
  unsafe {
    (*header_for_payload(payload)).payloadsz = value;
  }
}

/// Payload size in bytes, flags masked off.
#[inline]
pub unsafe fn size(payload: *mut u8) -> u32 {
  unsafe { raw_payloadsz(payload) & SIZE_MASK }
}

/// Sets only the SIZE bits of `payloadsz`, preserving FREE/NEXT_FREE/PREV_FREE.
#[inline]
pub unsafe fn set_size(payload: *mut u8, value: u32) {
  unsafe {
    let flags = raw_payloadsz(payload) & !SIZE_MASK;
    set_raw_payloadsz(payload, flags | (value & SIZE_MASK));
  }
}

/// SIZE of the physically preceding block, flags masked off. Meaningless
/// (by design) for the heap's lowest block, whose `prevpayloadsz` instead
/// holds [`INIT_MASK`].
#[inline]
pub unsafe fn prev_size(payload: *mut u8) -> u32 {
  unsafe { (*header_for_payload(payload)).prevpayloadsz & SIZE_MASK }
}

/// Overwrites the whole `prevpayloadsz` word.
#[inline]
pub unsafe fn set_prev_raw(payload: *mut u8, value: u32) {
  unsafe {
    (*header_for_payload(payload)).prevpayloadsz = value;
  }
}

/// True if `prevpayloadsz` still carries the no-predecessor marker.
#[inline]
pub unsafe fn is_init_marker(payload: *mut u8) -> bool {
  unsafe { (*header_for_payload(payload)).prevpayloadsz == INIT_MASK }
}

#[inline]
pub unsafe fn is_free(payload: *mut u8) -> bool {
  unsafe { raw_payloadsz(payload) & FREE_MASK != 0 }
}

#[inline]
pub unsafe fn has_next_free(payload: *mut u8) -> bool {
  unsafe { raw_payloadsz(payload) & NEXT_FREE != 0 }
}

#[inline]
pub unsafe fn has_prev_free(payload: *mut u8) -> bool {
  unsafe { raw_payloadsz(payload) & PREV_FREE != 0 }
}

/// Marks `payload` FREE, preserving SIZE and the two marker flags.
#[inline]
pub unsafe fn set_free(payload: *mut u8) {
  unsafe { set_raw_payloadsz(payload, raw_payloadsz(payload) | FREE_MASK) }
}

/// Clears FREE on `payload`, preserving SIZE and the two marker flags. The
/// C ancestor clears this implicitly with a plain store to `payloadsz`
/// (`set_payload_size`) whenever a free block is handed out; `set_size`
/// here is a read-modify-write that preserves flags instead, so callers
/// taking a block off a bucket must clear FREE explicitly with this.
#[inline]
pub unsafe fn clear_free(payload: *mut u8) {
  unsafe { set_raw_payloadsz(payload, raw_payloadsz(payload) & !FREE_MASK) }
}

/// Header of the block physically directly above `payload` — i.e. starting
/// right after `payload`'s SIZE bytes. Caller must ensure `payload` is not
/// the heap's `max_block` (there is nothing above it).
#[inline]
pub unsafe fn next_header(payload: *mut u8) -> *mut Header {
  unsafe { payload.add(size(payload) as usize) as *mut Header }
}

/// Payload of the block physically directly above `payload`.
#[inline]
pub unsafe fn next_payload(payload: *mut u8) -> *mut u8 {
  unsafe { payload_for_header(next_header(payload)) }
}

/// Payload of the block physically directly below `payload`, located via
/// `prevpayloadsz`. Caller must ensure `payload` is not the heap's
/// `min_block` (there is nothing below it — `prevpayloadsz` there is
/// [`INIT_MASK`], not a usable size).
#[inline]
pub unsafe fn prev_payload(payload: *mut u8) -> *mut u8 {
  unsafe { payload.sub(HEADER_SIZE + prev_size(payload) as usize) }
}

/// Sets PREV_FREE on the block directly above `payload` — the observable
/// consequence of `payload` itself becoming free. Caller ensures `payload`
/// is below `max_block`.
#[inline]
pub unsafe fn mark_above_prev_free(payload: *mut u8) {
  unsafe {
    let above = next_header(payload);
    (*above).payloadsz |= PREV_FREE;
  }
}

/// Clears PREV_FREE on the block directly above `payload`.
#[inline]
pub unsafe fn clear_above_prev_free(payload: *mut u8) {
  unsafe {
    let above = next_header(payload);
    (*above).payloadsz &= !PREV_FREE;
  }
}

/// Sets NEXT_FREE on the block directly below `payload` — the observable
/// consequence of `payload` itself becoming free. Caller ensures `payload`
/// is above `min_block`.
#[inline]
pub unsafe fn mark_below_next_free(payload: *mut u8) {
  unsafe {
    let below = header_for_payload(prev_payload(payload));
    (*below).payloadsz |= NEXT_FREE;
  }
}

/// Clears NEXT_FREE on the block directly below `payload`.
#[inline]
pub unsafe fn clear_below_next_free(payload: *mut u8) {
  unsafe {
    let below = header_for_payload(prev_payload(payload));
    (*below).payloadsz &= !NEXT_FREE;
  }
}

/// Refreshes `prevpayloadsz` on the block directly above `payload` to match
/// `payload`'s current SIZE. Needed whenever a block's size changes (split,
/// coalesce, in-place resize) and it still has a successor.
#[inline]
pub unsafe fn refresh_above_prevsize(payload: *mut u8) {
  unsafe {
    let above = payload_for_header(next_header(payload));
    set_prev_raw(above, size(payload));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::alloc::{Layout, alloc, dealloc};

  /// Allocates a scratch region big enough for a header plus `payload_len`
  /// bytes and returns a payload pointer into it, alongside the owning
  /// layout (so the test can free it).
  unsafe fn scratch_block(payload_len: usize) -> (*mut u8, Layout) {
    let total = HEADER_SIZE + payload_len;
    let layout = Layout::from_size_align(total, ALIGNMENT).unwrap();
    let base = unsafe { alloc(layout) };
    assert!(!base.is_null());
    (unsafe { base.add(HEADER_SIZE) }, layout)
  }

  #[test]
  fn size_and_flags_round_trip_independently() {
    unsafe {
      let (payload, layout) = scratch_block(64);
      set_raw_payloadsz(payload, 0);

      set_size(payload, 64);
      assert_eq!(size(payload), 64);
      assert!(!is_free(payload));

      set_free(payload);
      assert!(is_free(payload));
      assert_eq!(size(payload), 64, "setting FREE must not disturb SIZE");

      clear_free(payload);
      assert!(!is_free(payload));
      assert_eq!(size(payload), 64, "clearing FREE must not disturb SIZE");

      dealloc(payload.sub(HEADER_SIZE), layout);
    }
  }

  #[test]
  fn next_and_prev_traverse_back_to_each_other() {
    unsafe {
      // Two adjacent blocks hand-laid in one scratch buffer: [hdrA][32][hdrB][16]
      let total = HEADER_SIZE + 32 + HEADER_SIZE + 16;
      let layout = Layout::from_size_align(total, ALIGNMENT).unwrap();
      let base = alloc(layout);
      assert!(!base.is_null());

      let a = base.add(HEADER_SIZE);
      set_raw_payloadsz(a, 32);
      set_prev_raw(a, INIT_MASK);

      let b = next_payload(a);
      set_raw_payloadsz(b, 16);
      set_prev_raw(b, 32);

      assert_eq!(size(a), 32);
      assert_eq!(size(b), 16);
      assert_eq!(prev_payload(b), a);
      assert!(is_init_marker(a));

      dealloc(base, layout);
    }
  }

  #[test]
  fn prev_free_and_next_free_flags_are_independent_bits() {
    unsafe {
      let (payload, layout) = scratch_block(32);
      set_raw_payloadsz(payload, 32 | PREV_FREE);
      assert!(has_prev_free(payload));
      assert!(!has_next_free(payload));

      set_raw_payloadsz(payload, raw_payloadsz(payload) | NEXT_FREE);
      assert!(has_prev_free(payload));
      assert!(has_next_free(payload));

      dealloc(payload.sub(HEADER_SIZE), layout);
    }
  }
}
