//! # segfit-alloc - A Segregated Free-List Memory Allocator
//!
//! This crate provides a **segregated-fit** heap allocator: one physically
//! contiguous region of memory, grown page-at-a-time from the OS via
//! `sbrk(2)`, served by an array of size-class free lists instead of a
//! single linear scan.
//!
//! ## Overview
//!
//! Every block — free or in use — is a small in-band header immediately
//! followed by its payload:
//!
//! ```text
//!   Physical heap (one contiguous region):
//!
//!   ┌────────┬──────────────┬────────┬─────────────┬────────┬───────────┐
//!   │ Header │   Payload    │ Header │   Payload   │ Header │  Payload  │
//!   │ (8 B)  │  (in use)    │ (8 B)  │   (free)    │ (8 B)  │ (in use)  │
//!   └────────┴──────────────┴────────┴─────────────┴────────┴───────────┘
//!   ▲ min_block                                                ▲ max_block
//! ```
//!
//! Each header is two packed `u32` words — `payloadsz` (size plus three
//! status flags) and `prevpayloadsz` (the size of the block directly below,
//! so the chain can be walked in both directions without footers):
//!
//! ```text
//!   payloadsz:  [ F | . . . . . . . . . . . . . . . . . . . . . . . . . . | N | P ]
//!                31                        SIZE (29 bits)                  1   0
//!
//!     F (bit 31) FREE_MASK   - this block is free
//!     N (bit 1)  NEXT_FREE   - the block directly above is free
//!     P (bit 0)  PREV_FREE   - the block directly below is free
//! ```
//!
//! Free blocks are additionally threaded into one of [`bucket::NUM_BUCKETS`]
//! doubly-linked lists, keyed by an approximate log2 of their size, using
//! the first two pointer-words of the payload itself (a free block, by
//! definition, has no user data to protect there yet):
//!
//! ```text
//!   Segregated free lists (one head per size class):
//!
//!   bucket[0]  ──▶ (unreachable: below MIN_PAYLOAD)
//!   bucket[2]  ──▶ [16B free] ↔ [24B free] ↔ [31B free]
//!   bucket[3]  ──▶ [40B free]
//!     ...
//!   bucket[14] ──▶ [huge free block]
//! ```
//!
//! `malloc` does a first-fit search starting at the requested size's bucket
//! and walking upward; a miss there means asking the segment provider for
//! more pages. `free` coalesces with whichever physical neighbors are
//! already free before filing the survivor back into its bucket. `realloc`
//! grows in place when the neighbor above is free and big enough, and falls
//! back to allocate-copy-free otherwise.
//!
//! ## Crate Structure
//!
//! ```text
//!   segfit-alloc
//!   ├── align      - alignment and size-rounding helpers
//!   ├── block      - in-band header layout and physical-chain accessors
//!   ├── bucket     - the segregated free-list index
//!   ├── segment    - sbrk-backed segment provider
//!   ├── error      - typed errors for the segment provider and demos
//!   └── heap       - the Allocator: init / malloc / free / realloc / validate
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segfit_alloc::Allocator;
//!
//! fn main() {
//!     let mut heap = Allocator::new();
//!     assert!(heap.init());
//!
//!     let p = heap.malloc(64);
//!     assert!(!p.is_null());
//!     heap.free(p);
//! }
//! ```
//!
//! ## Features
//!
//! - `strict-validate` — after every `malloc`/`free`/`realloc`, walk the
//!   whole heap and debug-assert that every invariant in the data model
//!   still holds. Expensive; meant for tests and fuzzing, not production
//!   builds.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `Allocator` carries no internal
//!   synchronization; sharing one across threads needs an external lock.
//! - **Unix-only**: the segment provider is built on `sbrk`.
//! - **No return-to-OS**: pages taken from `sbrk` are never released back;
//!   the heap only grows.
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! Pointers returned by `Allocator::malloc`/`realloc` are valid until the
//! matching `free` (or until a `realloc` moves them); using them past that
//! point is undefined behavior, same as the system allocator.

pub mod align;
mod block;
mod bucket;
pub mod error;
mod heap;
mod segment;

pub use error::AllocError;
pub use heap::Allocator;
pub use segment::PAGE_SIZE;
